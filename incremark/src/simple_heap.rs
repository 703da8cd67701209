//! SimpleHeap - a small index-based heap implementing `MarkingHeap`
//!
//! Design:
//! - Cells live in a Vec and are addressed by `CellId`
//! - Each cell is placed in an arena holding cells of one kind and zone
//! - Edges, slot spans and weak map entries are plain Vecs on the cell
//!
//! Used by tests, benchmarks and the demo binary. Cells are never freed.

use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::{
    arena::DelayedMarkingLink,
    cell::{ArenaId, CellColor, CellId, CellKind, SlotsKind, ZoneId},
    visitor::{EdgeVisitor, MarkingHeap},
};

/// Default number of cells per arena
pub const DEFAULT_ARENA_SIZE: usize = 16;

struct SimpleCell {
    kind: CellKind,
    color: CellColor,
    arena: ArenaId,
    zone: ZoneId,
    edges: Vec<(CellId, &'static str)>,
    slots: [Vec<CellId>; 3],
    weak_entries: Vec<(CellId, CellId)>,
    delegate: Option<CellId>,
}

struct SimpleArena {
    kind: CellKind,
    cells: Vec<CellId>,
    delayed: DelayedMarkingLink,
}

pub struct SimpleHeap {
    cells: Vec<SimpleCell>,
    arenas: Vec<SimpleArena>,
    /// Arena currently being filled for each kind and zone
    open_arenas: HashMap<(CellKind, ZoneId), ArenaId>,
    arena_size: usize,
    roots: Vec<CellId>,
    gray_roots: Vec<CellId>,
    /// Zones reported through `note_zone_marked`, in report order
    marked_zones: Vec<ZoneId>,
}

impl SimpleHeap {
    pub fn new() -> SimpleHeap {
        SimpleHeap::with_arena_size(DEFAULT_ARENA_SIZE)
    }

    pub fn with_arena_size(arena_size: usize) -> SimpleHeap {
        SimpleHeap {
            cells: Vec::new(),
            arenas: Vec::new(),
            open_arenas: HashMap::new(),
            arena_size: arena_size.max(1),
            roots: Vec::new(),
            gray_roots: Vec::new(),
            marked_zones: Vec::new(),
        }
    }

    /// Allocate a white cell in zone 0.
    pub fn alloc(&mut self, kind: CellKind) -> CellId {
        self.alloc_in_zone(kind, ZoneId::new(0))
    }

    pub fn alloc_in_zone(&mut self, kind: CellKind, zone: ZoneId) -> CellId {
        let id = CellId::new(self.cells.len());
        let arena = self.arena_for(kind, zone);
        self.arenas[arena.index()].cells.push(id);

        self.cells.push(SimpleCell {
            kind,
            color: CellColor::White,
            arena,
            zone,
            edges: Vec::new(),
            slots: [Vec::new(), Vec::new(), Vec::new()],
            weak_entries: Vec::new(),
            delegate: None,
        });

        id
    }

    fn arena_for(&mut self, kind: CellKind, zone: ZoneId) -> ArenaId {
        if let Some(&arena) = self.open_arenas.get(&(kind, zone)) {
            if self.arenas[arena.index()].cells.len() < self.arena_size {
                return arena;
            }
        }

        let arena = ArenaId::new(self.arenas.len());
        self.arenas.push(SimpleArena {
            kind,
            cells: Vec::with_capacity(self.arena_size),
            delayed: DelayedMarkingLink::new(),
        });
        self.open_arenas.insert((kind, zone), arena);
        arena
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// All cell ids in allocation order.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> {
        (0..self.cells.len()).map(CellId::new)
    }

    pub fn add_edge(&mut self, from: CellId, to: CellId, name: &'static str) {
        self.cells[from.index()].edges.push((to, name));
    }

    /// Remove every strong edge from `from` to `to`.
    pub fn remove_edge(&mut self, from: CellId, to: CellId) {
        self.cells[from.index()].edges.retain(|&(target, _)| target != to);
    }

    pub fn push_slot(&mut self, cell: CellId, kind: SlotsKind, target: CellId) {
        debug_assert!(self.cells[cell.index()].kind.has_slots());
        self.cells[cell.index()].slots[kind.index()].push(target);
    }

    pub fn truncate_slots(&mut self, cell: CellId, kind: SlotsKind, len: usize) {
        self.cells[cell.index()].slots[kind.index()].truncate(len);
    }

    pub fn add_weak_entry(&mut self, map: CellId, key: CellId, value: CellId) {
        debug_assert_eq!(self.cells[map.index()].kind, CellKind::WeakMap);
        self.cells[map.index()].weak_entries.push((key, value));
    }

    pub fn set_delegate(&mut self, key: CellId, delegate: Option<CellId>) {
        self.cells[key.index()].delegate = delegate;
    }

    pub fn add_root(&mut self, cell: CellId) {
        self.roots.push(cell);
    }

    pub fn add_gray_root(&mut self, cell: CellId) {
        self.gray_roots.push(cell);
    }

    pub fn clear_roots(&mut self) {
        self.roots.clear();
        self.gray_roots.clear();
    }

    /// Reset every cell to white, as the collector does before a new cycle.
    pub fn clear_marks(&mut self) {
        for cell in &mut self.cells {
            cell.color = CellColor::White;
        }
        self.marked_zones.clear();
    }

    #[inline]
    pub fn is_marked(&self, cell: CellId) -> bool {
        self.cells[cell.index()].color.is_marked()
    }

    /// Colors of all cells, indexed by cell id.
    pub fn colors(&self) -> Vec<CellColor> {
        self.cells.iter().map(|cell| cell.color).collect()
    }

    pub fn marked_zones(&self) -> &[ZoneId] {
        &self.marked_zones
    }

    /// Whether any arena is still linked into a delayed marking list.
    pub fn has_delayed_arenas(&self) -> bool {
        self.arenas.iter().any(|arena| arena.delayed.is_on_list())
    }
}

impl Default for SimpleHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkingHeap for SimpleHeap {
    #[inline]
    fn kind(&self, cell: CellId) -> CellKind {
        self.cells[cell.index()].kind
    }

    #[inline]
    fn color(&self, cell: CellId) -> CellColor {
        self.cells[cell.index()].color
    }

    #[inline]
    fn set_color(&mut self, cell: CellId, color: CellColor) {
        self.cells[cell.index()].color = color;
    }

    #[inline]
    fn arena_of(&self, cell: CellId) -> ArenaId {
        self.cells[cell.index()].arena
    }

    #[inline]
    fn zone_of(&self, cell: CellId) -> ZoneId {
        self.cells[cell.index()].zone
    }

    fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    fn arena_kind(&self, arena: ArenaId) -> CellKind {
        self.arenas[arena.index()].kind
    }

    fn arena_len(&self, arena: ArenaId) -> usize {
        self.arenas[arena.index()].cells.len()
    }

    fn arena_cell(&self, arena: ArenaId, index: usize) -> Option<CellId> {
        self.arenas[arena.index()].cells.get(index).copied()
    }

    fn delayed_link(&self, arena: ArenaId) -> &DelayedMarkingLink {
        &self.arenas[arena.index()].delayed
    }

    fn delayed_link_mut(&mut self, arena: ArenaId) -> &mut DelayedMarkingLink {
        &mut self.arenas[arena.index()].delayed
    }

    fn trace_roots(&self, visitor: &mut dyn EdgeVisitor) {
        for &root in &self.roots {
            visitor.on_edge(root, "root");
        }
    }

    fn trace_gray_roots(&self, visitor: &mut dyn EdgeVisitor) {
        for &root in &self.gray_roots {
            visitor.on_edge(root, "gray root");
        }
    }

    fn trace_children(&self, cell: CellId, visitor: &mut dyn EdgeVisitor) {
        let cell = &self.cells[cell.index()];
        for &(target, name) in &cell.edges {
            visitor.on_edge(target, name);
        }
        if let Some(delegate) = cell.delegate {
            visitor.on_edge(delegate, "delegate");
        }
    }

    fn slots_len(&self, cell: CellId, kind: SlotsKind) -> usize {
        self.cells[cell.index()].slots[kind.index()].len()
    }

    fn trace_slots(
        &self,
        cell: CellId,
        kind: SlotsKind,
        start: usize,
        end: usize,
        visitor: &mut dyn EdgeVisitor,
    ) {
        let slots = &self.cells[cell.index()].slots[kind.index()];
        let end = end.min(slots.len());
        let name = match kind {
            SlotsKind::Elements => "element",
            SlotsKind::FixedSlots => "fixed slot",
            SlotsKind::DynamicSlots => "dynamic slot",
        };

        for &target in slots.get(start..end).unwrap_or(&[]) {
            visitor.on_edge(target, name);
        }
    }

    fn trace_weak_entries(&self, map: CellId, visitor: &mut dyn EdgeVisitor) {
        for &(key, value) in &self.cells[map.index()].weak_entries {
            visitor.on_weak_entry(key, value);
        }
    }

    fn weak_delegate(&self, key: CellId) -> Option<CellId> {
        self.cells[key.index()].delegate
    }

    fn note_zone_marked(&mut self, zone: ZoneId) {
        self.marked_zones.push(zone);
    }
}
