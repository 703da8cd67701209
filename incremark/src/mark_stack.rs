//! Mark stack for incremental tri-color marking
//!
//! A single Vec holds pending work for both mark colors. Entries below
//! `gray_position` were pushed while marking gray, entries at or above it
//! while marking black. Pushes beyond the current capacity grow the stack
//! geometrically, up to an optional hard cap. A push that cannot grow the
//! stack fails without changing it, and the caller falls back to delayed
//! marking.

use alloc::vec::Vec;

use crate::{
    cell::{CellId, MarkColor, SlotsKind},
    error::{AllocError, AllocResult},
};

/// Capacity reserved when a marker is created and restored after each cycle.
pub const MARK_STACK_BASE_CAPACITY: usize = 4096;

/// A resumable span of a container's slots or elements.
///
/// Only the start offset is stored. The end is read from the container when
/// the entry is popped, since the container may have shrunk in the meantime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotsRange {
    pub kind: SlotsKind,
    pub cell: CellId,
    pub start: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackEntry {
    /// A marked cell whose children have not been traced yet
    Cell(CellId),
    /// A rope saved while eagerly flattening a rope tree
    TempRope(CellId),
    /// Part of a container's slots or elements still to be traced
    Range(SlotsRange),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackTag {
    Cell,
    TempRope,
    Range,
}

/// A popped pointer entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaggedCell {
    Cell(CellId),
    TempRope(CellId),
}

impl StackEntry {
    #[inline]
    pub fn tag(&self) -> StackTag {
        match self {
            StackEntry::Cell(_) => StackTag::Cell,
            StackEntry::TempRope(_) => StackTag::TempRope,
            StackEntry::Range(_) => StackTag::Range,
        }
    }
}

pub struct MarkStack {
    entries: Vec<StackEntry>,
    /// Number of entries that may be pushed before the stack has to grow
    capacity: usize,
    base_capacity: usize,
    max_capacity: Option<usize>,
    /// Entries below this index are gray
    gray_position: usize,
    mark_color: MarkColor,
}

impl MarkStack {
    /// Create an empty stack. No memory is reserved until `init` is called.
    pub const fn new(base_capacity: usize, max_capacity: Option<usize>) -> MarkStack {
        MarkStack {
            entries: Vec::new(),
            capacity: 0,
            base_capacity,
            max_capacity,
            gray_position: 0,
            mark_color: MarkColor::Black,
        }
    }

    /// Reserve the base capacity.
    pub fn init(&mut self) -> AllocResult<()> {
        debug_assert!(self.is_empty());
        let capacity = self.clamp_capacity(self.base_capacity);
        self.entries
            .try_reserve_exact(capacity)
            .map_err(|_| AllocError)?;
        self.capacity = capacity;
        Ok(())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries on the stack.
    #[inline]
    pub fn position(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn mark_color(&self) -> MarkColor {
        self.mark_color
    }

    #[inline]
    pub fn gray_position(&self) -> usize {
        self.gray_position
    }

    /// Change the color of future pushes. Entries already on the stack keep
    /// their color.
    pub fn set_mark_color(&mut self, color: MarkColor) {
        if self.mark_color == color {
            return;
        }

        // Gray marking must not start while black work is pending, otherwise the
        // pending black entries would be relabelled gray.
        debug_assert!(color == MarkColor::Black || !self.has_black_entries());

        self.gray_position = self.entries.len();
        self.mark_color = color;
    }

    #[inline]
    pub fn has_black_entries(&self) -> bool {
        self.entries.len() > self.gray_position
    }

    #[inline]
    pub fn has_gray_entries(&self) -> bool {
        self.gray_position > 0
    }

    #[inline]
    pub fn has_entries(&self, color: MarkColor) -> bool {
        match color {
            MarkColor::Black => self.has_black_entries(),
            MarkColor::Gray => self.has_gray_entries(),
        }
    }

    #[inline]
    pub fn push(&mut self, cell: CellId) -> AllocResult<()> {
        self.push_entry(StackEntry::Cell(cell))
    }

    #[inline]
    pub fn push_temp_rope(&mut self, rope: CellId) -> AllocResult<()> {
        self.push_entry(StackEntry::TempRope(rope))
    }

    #[inline]
    pub fn push_range(&mut self, cell: CellId, kind: SlotsKind, start: usize) -> AllocResult<()> {
        self.push_entry(StackEntry::Range(SlotsRange { kind, cell, start }))
    }

    pub fn push_entry(&mut self, entry: StackEntry) -> AllocResult<()> {
        if self.entries.len() >= self.capacity {
            self.grow()?;
        }

        self.entries.push(entry);
        if self.mark_color == MarkColor::Gray {
            self.gray_position = self.entries.len();
        }

        Ok(())
    }

    #[inline]
    pub fn peek_tag(&self) -> Option<StackTag> {
        self.entries.last().map(StackEntry::tag)
    }

    /// Pop the top entry, whatever its tag.
    #[inline]
    pub fn pop(&mut self) -> Option<StackEntry> {
        let entry = self.entries.pop()?;
        self.gray_position = self.gray_position.min(self.entries.len());
        Some(entry)
    }

    /// Pop the top entry, which must be a cell or temp rope entry.
    pub fn pop_ptr(&mut self) -> Option<TaggedCell> {
        debug_assert!(!self.is_empty());
        debug_assert_ne!(self.peek_tag(), Some(StackTag::Range));

        match self.entries.last()? {
            StackEntry::Cell(cell) => {
                let cell = *cell;
                self.pop();
                Some(TaggedCell::Cell(cell))
            }
            StackEntry::TempRope(rope) => {
                let rope = *rope;
                self.pop();
                Some(TaggedCell::TempRope(rope))
            }
            StackEntry::Range(_) => None,
        }
    }

    /// Pop the top entry, which must be a range entry.
    pub fn pop_range(&mut self) -> Option<SlotsRange> {
        debug_assert_eq!(self.peek_tag(), Some(StackTag::Range));

        match self.entries.last()? {
            StackEntry::Range(range) => {
                let range = *range;
                self.pop();
                Some(range)
            }
            _ => None,
        }
    }

    /// Discard all entries. Mark bits are untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.gray_position = 0;
    }

    pub fn set_max_capacity(&mut self, max_capacity: Option<usize>) {
        self.max_capacity = max_capacity;
        self.capacity = self.clamp_capacity(self.capacity);
    }

    /// Release memory beyond the base capacity. Must be called on an empty stack.
    pub fn reset_stack_capacity(&mut self) {
        debug_assert!(self.is_empty());
        let capacity = self.clamp_capacity(self.base_capacity);
        if self.entries.capacity() > capacity {
            self.entries.shrink_to(capacity);
        }
        self.capacity = capacity.min(self.entries.capacity());
    }

    pub fn size_in_bytes(&self) -> usize {
        self.entries.capacity() * core::mem::size_of::<StackEntry>()
    }

    fn grow(&mut self) -> AllocResult<()> {
        let len = self.entries.len();
        let doubled = self.capacity.max(1).saturating_mul(2);
        let new_capacity = self.clamp_capacity(doubled.max(self.base_capacity));
        if new_capacity <= len {
            return Err(AllocError);
        }

        self.entries
            .try_reserve_exact(new_capacity - len)
            .map_err(|_| AllocError)?;
        self.capacity = new_capacity;

        log::trace!("mark stack grew to {new_capacity} entries");
        Ok(())
    }

    #[inline]
    fn clamp_capacity(&self, capacity: usize) -> usize {
        match self.max_capacity {
            Some(max) => capacity.min(max),
            None => capacity,
        }
    }
}

impl Default for MarkStack {
    fn default() -> Self {
        Self::new(MARK_STACK_BASE_CAPACITY, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(index: usize) -> CellId {
        CellId::new(index)
    }

    #[test]
    fn test_push_pop_round_trip() {
        let mut stack = MarkStack::default();
        stack.init().unwrap();

        stack.push(cell(1)).unwrap();
        stack.push_range(cell(2), SlotsKind::Elements, 128).unwrap();
        stack.push_temp_rope(cell(3)).unwrap();
        stack.push_range(cell(4), SlotsKind::DynamicSlots, 0).unwrap();

        assert_eq!(stack.position(), 4);
        assert_eq!(stack.peek_tag(), Some(StackTag::Range));
        assert_eq!(
            stack.pop_range(),
            Some(SlotsRange {
                kind: SlotsKind::DynamicSlots,
                cell: cell(4),
                start: 0
            })
        );
        assert_eq!(stack.pop_ptr(), Some(TaggedCell::TempRope(cell(3))));
        assert_eq!(
            stack.pop_range(),
            Some(SlotsRange {
                kind: SlotsKind::Elements,
                cell: cell(2),
                start: 128
            })
        );
        assert_eq!(stack.pop_ptr(), Some(TaggedCell::Cell(cell(1))));
        assert!(stack.is_empty());
        assert_eq!(stack.peek_tag(), None);
    }

    #[test]
    fn test_gray_black_boundary() {
        let mut stack = MarkStack::default();
        stack.init().unwrap();

        stack.set_mark_color(MarkColor::Gray);
        stack.push(cell(1)).unwrap();
        stack.push(cell(2)).unwrap();
        assert!(stack.has_gray_entries());
        assert!(!stack.has_black_entries());
        assert_eq!(stack.gray_position(), 2);

        stack.set_mark_color(MarkColor::Black);
        stack.push(cell(3)).unwrap();
        assert!(stack.has_black_entries());
        assert!(stack.has_entries(MarkColor::Gray));
        assert_eq!(stack.gray_position(), 2);

        assert_eq!(stack.pop(), Some(StackEntry::Cell(cell(3))));
        assert!(!stack.has_black_entries());
        assert!(stack.has_gray_entries());

        stack.set_mark_color(MarkColor::Gray);
        assert_eq!(stack.pop(), Some(StackEntry::Cell(cell(2))));
        assert_eq!(stack.gray_position(), 1);
        assert_eq!(stack.pop(), Some(StackEntry::Cell(cell(1))));
        assert!(!stack.has_gray_entries());
    }

    #[test]
    fn test_max_capacity_refuses_push() {
        let mut stack = MarkStack::new(MARK_STACK_BASE_CAPACITY, Some(2));
        stack.init().unwrap();
        assert_eq!(stack.capacity(), 2);

        stack.push(cell(1)).unwrap();
        stack.push(cell(2)).unwrap();
        assert_eq!(stack.push(cell(3)), Err(AllocError));
        assert_eq!(stack.position(), 2);

        stack.set_max_capacity(None);
        stack.push(cell(3)).unwrap();
        assert!(stack.capacity() >= 3);
    }

    #[test]
    fn test_growth_is_geometric() {
        let mut stack = MarkStack::new(4, None);
        stack.init().unwrap();

        for i in 0..5 {
            stack.push(cell(i)).unwrap();
        }
        assert_eq!(stack.capacity(), 8);

        for i in 5..9 {
            stack.push(cell(i)).unwrap();
        }
        assert_eq!(stack.capacity(), 16);
    }

    #[test]
    fn test_reset_capacity() {
        let mut stack = MarkStack::new(4, None);
        stack.init().unwrap();
        for i in 0..100 {
            stack.push(cell(i)).unwrap();
        }
        assert!(stack.size_in_bytes() >= 100 * core::mem::size_of::<StackEntry>());

        stack.clear();
        stack.reset_stack_capacity();
        assert_eq!(stack.capacity(), 4);
        assert!(!stack.has_gray_entries());
    }
}
