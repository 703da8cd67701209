//! Edge visitor and heap traits
//!
//! These traits decouple the marking engine from any concrete heap layout.
//! - `EdgeVisitor`: implemented by the marker (and the verifier), called by heaps to report edges
//! - `MarkingHeap`: implemented by the heap, provides colors, arenas, roots and per-kind tracing

use alloc::vec::Vec;

use crate::{
    arena::DelayedMarkingLink,
    cell::{ArenaId, CellColor, CellId, CellKind, SlotsKind, ZoneId},
};

/// Receives the outgoing references of a cell.
pub trait EdgeVisitor {
    /// Report a strong edge to `target`. `name` describes the edge for debugging.
    fn on_edge(&mut self, target: CellId, name: &'static str);

    /// Report a weak map entry. The value is only reachable through the entry if
    /// both the map and the key are reachable.
    fn on_weak_entry(&mut self, key: CellId, value: CellId) {
        let _ = (key, value);
    }
}

/// The marker's view of a heap.
///
/// Cells are grouped into arenas. Every arena header embeds a
/// `DelayedMarkingLink` owned by the marker while a collection is in progress.
///
/// # Example
/// ```ignore
/// impl MarkingHeap for MyHeap {
///     fn trace_children(&self, cell: CellId, visitor: &mut dyn EdgeVisitor) {
///         for (target, name) in &self.cells[cell.index()].fields {
///             visitor.on_edge(*target, name);
///         }
///     }
///     // ...
/// }
/// ```
pub trait MarkingHeap {
    fn kind(&self, cell: CellId) -> CellKind;

    fn color(&self, cell: CellId) -> CellColor;

    fn set_color(&mut self, cell: CellId, color: CellColor);

    fn arena_of(&self, cell: CellId) -> ArenaId;

    fn zone_of(&self, cell: CellId) -> ZoneId;

    /// Number of arenas. Arena ids range over `0..arena_count()`.
    fn arena_count(&self) -> usize;

    fn arena_kind(&self, arena: ArenaId) -> CellKind;

    /// Number of cell positions in the arena, including free ones.
    fn arena_len(&self, arena: ArenaId) -> usize;

    /// The cell at `index` in the arena, or `None` if the position is free.
    fn arena_cell(&self, arena: ArenaId, index: usize) -> Option<CellId>;

    fn delayed_link(&self, arena: ArenaId) -> &DelayedMarkingLink;

    fn delayed_link_mut(&mut self, arena: ArenaId) -> &mut DelayedMarkingLink;

    /// Enumerate the roots that must be marked black.
    fn trace_roots(&self, visitor: &mut dyn EdgeVisitor);

    /// Enumerate the roots that must be marked gray.
    fn trace_gray_roots(&self, visitor: &mut dyn EdgeVisitor) {
        let _ = visitor;
    }

    /// Enumerate the strong edges of a cell, excluding slot and element spans.
    fn trace_children(&self, cell: CellId, visitor: &mut dyn EdgeVisitor);

    /// Length of a slot or element span. Only called for kinds with slots.
    fn slots_len(&self, cell: CellId, kind: SlotsKind) -> usize {
        let _ = (cell, kind);
        0
    }

    /// Enumerate the edges stored in `start..end` of a slot or element span.
    fn trace_slots(
        &self,
        cell: CellId,
        kind: SlotsKind,
        start: usize,
        end: usize,
        visitor: &mut dyn EdgeVisitor,
    ) {
        let _ = (cell, kind, start, end, visitor);
    }

    /// Enumerate the entries of a weak map through `EdgeVisitor::on_weak_entry`.
    fn trace_weak_entries(&self, map: CellId, visitor: &mut dyn EdgeVisitor) {
        let _ = (map, visitor);
    }

    /// The delegate of a weak map key. A key whose delegate is reachable is
    /// itself preserved.
    fn weak_delegate(&self, key: CellId) -> Option<CellId> {
        let _ = key;
        None
    }

    /// Called the first time a cell in `zone` is marked during root marking.
    fn note_zone_marked(&mut self, zone: ZoneId) {
        let _ = zone;
    }
}

/// Collects strong edge targets into a buffer.
pub(crate) struct EdgeCollector<'a> {
    pub edges: &'a mut Vec<CellId>,
}

impl EdgeVisitor for EdgeCollector<'_> {
    #[inline]
    fn on_edge(&mut self, target: CellId, _: &'static str) {
        self.edges.push(target);
    }
}

/// Collects weak map entries into a buffer.
pub(crate) struct WeakEntryCollector<'a> {
    pub entries: &'a mut Vec<(CellId, CellId)>,
}

impl EdgeVisitor for WeakEntryCollector<'_> {
    fn on_edge(&mut self, _: CellId, _: &'static str) {}

    #[inline]
    fn on_weak_entry(&mut self, key: CellId, value: CellId) {
        self.entries.push((key, value));
    }
}
