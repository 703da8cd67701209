//! Per-arena delayed marking state.
//!
//! Heaps embed a `DelayedMarkingLink` in each arena header. The marker threads
//! its delayed marking list through these links, so linking and unlinking an
//! arena never allocates.

use bitflags::bitflags;

use crate::cell::{ArenaId, MarkColor};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DelayedMarkingFlags: u8 {
        /// The arena is linked into the delayed marking list
        const ON_LIST = 1 << 0;
        /// Black cells in this arena still need their children traced
        const BLACK = 1 << 1;
        /// Gray cells in this arena still need their children traced
        const GRAY = 1 << 2;
    }
}

impl DelayedMarkingFlags {
    #[inline]
    fn for_color(color: MarkColor) -> DelayedMarkingFlags {
        match color {
            MarkColor::Black => DelayedMarkingFlags::BLACK,
            MarkColor::Gray => DelayedMarkingFlags::GRAY,
        }
    }
}

/// Intrusive delayed marking list entry stored in an arena header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DelayedMarkingLink {
    flags: DelayedMarkingFlags,
    next: Option<ArenaId>,
}

impl DelayedMarkingLink {
    pub const fn new() -> DelayedMarkingLink {
        DelayedMarkingLink {
            flags: DelayedMarkingFlags::empty(),
            next: None,
        }
    }

    #[inline]
    pub fn is_on_list(&self) -> bool {
        self.flags.contains(DelayedMarkingFlags::ON_LIST)
    }

    #[inline]
    pub fn next(&self) -> Option<ArenaId> {
        self.next
    }

    #[inline]
    pub fn has_delayed_marking(&self, color: MarkColor) -> bool {
        self.flags.contains(DelayedMarkingFlags::for_color(color))
    }

    #[inline]
    pub fn has_any_delayed_marking(&self) -> bool {
        self.flags
            .intersects(DelayedMarkingFlags::BLACK | DelayedMarkingFlags::GRAY)
    }

    #[inline]
    pub fn set_delayed_marking(&mut self, color: MarkColor, value: bool) {
        debug_assert!(self.is_on_list());
        self.flags.set(DelayedMarkingFlags::for_color(color), value);
    }

    /// Link the arena in front of `next`.
    #[inline]
    pub(crate) fn link(&mut self, next: Option<ArenaId>) {
        debug_assert!(!self.is_on_list());
        self.flags.insert(DelayedMarkingFlags::ON_LIST);
        self.next = next;
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: Option<ArenaId>) {
        debug_assert!(self.is_on_list());
        self.next = next;
    }

    /// Remove the arena from the list and drop any pending work flags.
    #[inline]
    pub(crate) fn unlink(&mut self) {
        *self = DelayedMarkingLink::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_and_flags() {
        let mut link = DelayedMarkingLink::new();
        assert!(!link.is_on_list());

        link.link(Some(ArenaId::new(3)));
        assert!(link.is_on_list());
        assert_eq!(link.next(), Some(ArenaId::new(3)));
        assert!(!link.has_any_delayed_marking());

        link.set_delayed_marking(MarkColor::Gray, true);
        assert!(link.has_delayed_marking(MarkColor::Gray));
        assert!(!link.has_delayed_marking(MarkColor::Black));
        assert!(link.has_any_delayed_marking());

        link.set_delayed_marking(MarkColor::Gray, false);
        assert!(!link.has_any_delayed_marking());
        assert!(link.is_on_list());

        link.unlink();
        assert_eq!(link, DelayedMarkingLink::default());
    }
}
