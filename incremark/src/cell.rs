//! Cell identities, colors and kind tags.
//!
//! The marker never sees cell memory. Heaps describe cells through a small
//! set of copyable handles (`CellId`, `ArenaId`, `ZoneId`) plus the kind tag
//! used to pick a traversal strategy.

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub const fn new(index: usize) -> $name {
                debug_assert!(index <= u32::MAX as usize);
                $name(index as u32)
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_index!(
    /// Handle to a cell owned by a heap.
    CellId
);

define_index!(
    /// Handle to an arena, a fixed-size region holding cells of a single kind.
    ArenaId
);

define_index!(
    /// Handle to a zone, the unit of sweep bookkeeping.
    ZoneId
);

/// Mark state of a cell during a collection.
///
/// Ordered so that a "stronger" color compares greater: `White < Gray < Black`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CellColor {
    /// Not reached this cycle
    #[default]
    White = 0,
    /// Reached only through gray roots
    Gray = 1,
    /// Reached through black roots
    Black = 2,
}

impl CellColor {
    #[inline]
    pub fn is_marked(self) -> bool {
        self != CellColor::White
    }

    /// Whether this color is at least as strong as `color`.
    #[inline]
    pub fn is_marked_at_least(self, color: MarkColor) -> bool {
        self >= CellColor::from(color)
    }
}

/// The color the marker is currently marking with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkColor {
    Gray,
    Black,
}

impl MarkColor {
    /// The mark color matching a cell's color, or `None` if the cell is white.
    #[inline]
    pub fn of(color: CellColor) -> Option<MarkColor> {
        match color {
            CellColor::White => None,
            CellColor::Gray => Some(MarkColor::Gray),
            CellColor::Black => Some(MarkColor::Black),
        }
    }
}

impl From<MarkColor> for CellColor {
    #[inline]
    fn from(color: MarkColor) -> CellColor {
        match color {
            MarkColor::Gray => CellColor::Gray,
            MarkColor::Black => CellColor::Black,
        }
    }
}

/// How the marker processes the children of a newly marked cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Traversal {
    /// Push onto the mark stack for later, budgeted processing.
    Push,
    /// Scan immediately with a bounded loop. Used for kinds with small fan-out.
    Eager,
    /// Flatten the rope tree immediately, using the mark stack as scratch space.
    Rope,
    /// No outgoing edges.
    Leaf,
}

/// Kind tag for a cell. The marker only needs this to dispatch traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellKind {
    Object,
    WeakMap,
    Script,
    JitCode,
    Shape,
    Scope,
    String,
    Rope,
    Symbol,
    BigInt,
}

impl CellKind {
    pub const ALL: [CellKind; 10] = [
        CellKind::Object,
        CellKind::WeakMap,
        CellKind::Script,
        CellKind::JitCode,
        CellKind::Shape,
        CellKind::Scope,
        CellKind::String,
        CellKind::Rope,
        CellKind::Symbol,
        CellKind::BigInt,
    ];

    #[inline]
    pub fn traversal(self) -> Traversal {
        match self {
            CellKind::Object | CellKind::WeakMap | CellKind::Script | CellKind::JitCode => {
                Traversal::Push
            }
            CellKind::Shape | CellKind::Scope | CellKind::String | CellKind::Symbol => {
                Traversal::Eager
            }
            CellKind::Rope => Traversal::Rope,
            CellKind::BigInt => Traversal::Leaf,
        }
    }

    /// Whether cells of this kind own slot and element spans that are traced
    /// in chunks through range entries.
    #[inline]
    pub fn has_slots(self) -> bool {
        matches!(self, CellKind::Object | CellKind::WeakMap)
    }

    /// Position of this kind's arenas in the rebuilt delayed marking list.
    /// Arenas of kinds with a higher order are processed after all others.
    #[inline]
    pub fn delayed_marking_order(self) -> u8 {
        match self {
            CellKind::WeakMap => 1,
            _ => 0,
        }
    }
}

/// Which span of a container a range entry refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotsKind {
    Elements,
    FixedSlots,
    DynamicSlots,
}

impl SlotsKind {
    pub const ALL: [SlotsKind; 3] = [
        SlotsKind::Elements,
        SlotsKind::FixedSlots,
        SlotsKind::DynamicSlots,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            SlotsKind::Elements => 0,
            SlotsKind::FixedSlots => 1,
            SlotsKind::DynamicSlots => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_ordering() {
        assert!(CellColor::White < CellColor::Gray);
        assert!(CellColor::Gray < CellColor::Black);
        assert!(MarkColor::Gray < MarkColor::Black);

        assert!(CellColor::Black.is_marked_at_least(MarkColor::Gray));
        assert!(!CellColor::Gray.is_marked_at_least(MarkColor::Black));
        assert!(!CellColor::White.is_marked());
    }

    #[test]
    fn test_mark_color_of() {
        assert_eq!(MarkColor::of(CellColor::White), None);
        assert_eq!(MarkColor::of(CellColor::Gray), Some(MarkColor::Gray));
        assert_eq!(CellColor::from(MarkColor::Black), CellColor::Black);
    }

    #[test]
    fn test_traversal_strategies() {
        assert_eq!(CellKind::Object.traversal(), Traversal::Push);
        assert_eq!(CellKind::Shape.traversal(), Traversal::Eager);
        assert_eq!(CellKind::Rope.traversal(), Traversal::Rope);
        assert_eq!(CellKind::BigInt.traversal(), Traversal::Leaf);
        assert!(CellKind::WeakMap.has_slots());
        assert!(!CellKind::Script.has_slots());
    }
}
