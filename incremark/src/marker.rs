//! Marker - incremental tri-color marking engine
//!
//! Design:
//! - Marked cells are pushed onto a `MarkStack` and their children traced later,
//!   in slices bounded by a `SliceBudget`
//! - Kinds with small fan-out are scanned eagerly with a bounded loop instead
//! - Large slot and element spans are traced in chunks through range entries
//! - When the stack cannot grow, the cell's arena is put on the delayed marking
//!   list and its children are traced once the stack drains (see `delayed`)
//! - Weak maps feed an ephemeron edge table that is resolved in weak marking
//!   mode (see `weak`)
//!
//! States: `NotActive -> RegularMarking <-> RootMarking`, and
//! `RegularMarking <-> WeakMarking`. `stop` and `reset` return to `NotActive`.

use alloc::vec::Vec;
use core::mem;

use hashbrown::HashSet;

use crate::{
    budget::{IncrementalProgress, SliceBudget},
    cell::{ArenaId, CellColor, CellId, CellKind, MarkColor, SlotsKind, Traversal, ZoneId},
    ephemeron::{EphemeronEdge, EphemeronEdgeTable, WeakMapList},
    error::AllocResult,
    mark_stack::{MarkStack, SlotsRange, StackEntry, StackTag, TaggedCell},
    options::MarkerOptions,
    owner::MarkingOwner,
    stats::MarkerStats,
    visitor::{EdgeCollector, MarkingHeap},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkingState {
    /// No collection in progress
    NotActive,
    /// Marking roots. The first marked cell of each zone is reported to the heap.
    RootMarking,
    /// Marking through strong edges
    RegularMarking,
    /// Every newly marked cell is looked up in the ephemeron edge table
    WeakMarking,
}

/// Whether delayed marking should be timed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportMarkTime {
    Report,
    DontReport,
}

pub struct Marker {
    pub(crate) options: MarkerOptions,

    pub(crate) state: MarkingState,

    /// Pending traversal work for both colors
    pub(crate) stack: MarkStack,

    pub(crate) ephemeron_edges: EphemeronEdgeTable,

    /// Weak maps traversed this cycle
    pub(crate) weak_maps: WeakMapList,

    /// Cleared when an ephemeron table insertion fails. Linear weak marking is
    /// unavailable for the rest of the cycle once this is false.
    pub(crate) have_all_implicit_edges: bool,

    /// Cells marked during weak marking whose ephemeron edges are unresolved
    pub(crate) pending_implicit_edges: Vec<CellId>,

    /// Ephemeron targets waiting for the marker to switch to their color
    pub(crate) deferred_black: Vec<CellId>,
    pub(crate) deferred_gray: Vec<CellId>,

    /// Head of the delayed marking list threaded through arena headers
    pub(crate) delayed_marking_list: Option<ArenaId>,
    pub(crate) delayed_marking_work_added: bool,

    /// Zones reported to the heap during root marking this cycle
    marked_zones: HashSet<ZoneId>,

    pub(crate) owner: MarkingOwner,

    pub(crate) stats: MarkerStats,

    /// Reused buffer for collecting edges
    edge_buffer: Vec<CellId>,
}

impl Marker {
    /// Create a marker and reserve its base mark stack capacity.
    pub fn new(options: MarkerOptions) -> AllocResult<Marker> {
        let mut stack = MarkStack::new(options.base_stack_capacity, options.max_stack_capacity);
        stack.init()?;

        Ok(Marker {
            ephemeron_edges: EphemeronEdgeTable::new(options.max_ephemeron_edges),
            options,
            state: MarkingState::NotActive,
            stack,
            weak_maps: WeakMapList::new(),
            have_all_implicit_edges: true,
            pending_implicit_edges: Vec::new(),
            deferred_black: Vec::new(),
            deferred_gray: Vec::new(),
            delayed_marking_list: None,
            delayed_marking_work_added: false,
            marked_zones: HashSet::new(),
            owner: MarkingOwner::Mutator,
            stats: MarkerStats::default(),
            edge_buffer: Vec::new(),
        })
    }

    #[inline]
    pub fn state(&self) -> MarkingState {
        self.state
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state != MarkingState::NotActive
    }

    #[inline]
    pub fn is_regular_marking(&self) -> bool {
        self.state == MarkingState::RegularMarking
    }

    #[inline]
    pub fn is_weak_marking(&self) -> bool {
        self.state == MarkingState::WeakMarking
    }

    #[inline]
    pub fn is_root_marking(&self) -> bool {
        self.state == MarkingState::RootMarking
    }

    #[inline]
    pub fn mark_color(&self) -> MarkColor {
        self.stack.mark_color()
    }

    #[inline]
    pub fn options(&self) -> &MarkerOptions {
        &self.options
    }

    #[inline]
    pub fn stats(&self) -> &MarkerStats {
        &self.stats
    }

    #[inline]
    pub fn stack(&self) -> &MarkStack {
        &self.stack
    }

    #[inline]
    pub fn ephemeron_edges(&self) -> &EphemeronEdgeTable {
        &self.ephemeron_edges
    }

    /// Memory held by the mark stack and the ephemeron table bookkeeping.
    pub fn size_in_bytes(&self) -> usize {
        self.stack.size_in_bytes()
            + self.ephemeron_edges.edge_count() * mem::size_of::<EphemeronEdge>()
    }

    pub fn set_max_stack_capacity(&mut self, max_capacity: Option<usize>) {
        self.options.max_stack_capacity = max_capacity;
        self.stack.set_max_capacity(max_capacity);
    }

    /// Change the ephemeron table capacity. Once the table holds this many
    /// edges, the next insertion aborts linear weak marking for the cycle.
    pub fn set_max_ephemeron_edges(&mut self, max_edges: Option<usize>) {
        self.options.max_ephemeron_edges = max_edges;
        self.ephemeron_edges.set_max_edges(max_edges);
    }

    #[inline]
    pub fn has_black_entries(&self) -> bool {
        self.stack.has_black_entries()
    }

    #[inline]
    pub fn has_gray_entries(&self) -> bool {
        self.stack.has_gray_entries()
    }

    #[inline]
    pub fn has_delayed_children(&self) -> bool {
        self.delayed_marking_list.is_some()
    }

    /// Whether there is no marking work left of any kind.
    pub fn is_drained(&self) -> bool {
        self.stack.is_empty()
            && !self.has_delayed_children()
            && self.deferred_black.is_empty()
            && self.deferred_gray.is_empty()
            && self.pending_implicit_edges.is_empty()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Begin a marking cycle. Mark bits must already be cleared by the caller.
    pub fn start(&mut self) {
        debug_assert_eq!(self.state, MarkingState::NotActive);
        debug_assert!(self.is_drained());
        debug_assert_eq!(self.owner, MarkingOwner::Mutator);

        self.state = MarkingState::RegularMarking;
        self.have_all_implicit_edges = true;
        self.delayed_marking_work_added = false;
        self.stack.set_mark_color(MarkColor::Black);
        self.marked_zones.clear();
        self.stats = MarkerStats::default();

        log::debug!("marking started");
    }

    /// Finish a marking cycle. All work must have been drained.
    pub fn stop(&mut self) {
        debug_assert!(self.is_active());
        debug_assert!(self.is_drained());
        debug_assert_eq!(self.mark_color(), MarkColor::Black);
        debug_assert_eq!(self.owner, MarkingOwner::Mutator);

        self.state = MarkingState::NotActive;
        self.stack.reset_stack_capacity();
        self.ephemeron_edges.clear();
        self.weak_maps.clear();
        self.marked_zones.clear();

        log::debug!(
            "marking stopped: {} cells marked, {} entries processed",
            self.stats.cells_marked,
            self.stats.entries_processed
        );
    }

    /// Abandon the current cycle from any state, discarding all pending work.
    /// Mark bits are left as they are.
    pub fn reset<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) {
        debug_assert_eq!(self.owner, MarkingOwner::Mutator);

        self.stack.clear();
        self.stack.set_mark_color(MarkColor::Black);
        self.stack.reset_stack_capacity();
        self.ephemeron_edges.clear();
        self.weak_maps.clear();
        self.pending_implicit_edges.clear();
        self.deferred_black.clear();
        self.deferred_gray.clear();
        self.unlink_delayed_marking_list(heap);
        self.marked_zones.clear();
        self.have_all_implicit_edges = true;
        self.state = MarkingState::NotActive;

        log::debug!("marking reset");
    }

    pub fn set_root_marking_mode(&mut self, root_marking: bool) {
        debug_assert!(matches!(
            self.state,
            MarkingState::RootMarking | MarkingState::RegularMarking
        ));

        self.state = if root_marking {
            MarkingState::RootMarking
        } else {
            MarkingState::RegularMarking
        };

        log::trace!("root marking mode {}", if root_marking { "on" } else { "off" });
    }

    /// Mark the heap's roots. Black roots are traversed immediately, gray roots
    /// are marked once the marker next switches to gray.
    pub fn mark_roots<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) {
        debug_assert!(self.is_regular_marking());
        debug_assert_eq!(self.owner, MarkingOwner::Mutator);

        let mut roots = self.take_buffer();
        heap.trace_roots(&mut EdgeCollector { edges: &mut roots });

        self.set_root_marking_mode(true);
        for &root in &roots {
            self.mark_and_traverse_cell(heap, root);
        }
        self.set_root_marking_mode(false);

        roots.clear();
        heap.trace_gray_roots(&mut EdgeCollector { edges: &mut roots });
        self.deferred_gray.extend_from_slice(&roots);

        self.return_buffer(roots);
    }

    /// Run `f` with the marker marking `color`, then restore the previous color.
    ///
    /// Switching to gray requires that no black entries are on the stack.
    pub fn with_mark_color<R>(&mut self, color: MarkColor, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.stack.mark_color();
        self.stack.set_mark_color(color);
        let result = f(self);
        self.stack.set_mark_color(previous);
        result
    }

    // ========================================================================
    // Traversal loop
    // ========================================================================

    /// Mark until all work is done or the budget runs out.
    pub fn mark_until_budget_exhausted<H, B>(&mut self, heap: &mut H, budget: &mut B) -> IncrementalProgress
    where
        H: MarkingHeap + ?Sized,
        B: SliceBudget + ?Sized,
    {
        self.mark_until_budget_exhausted_with(heap, budget, ReportMarkTime::Report)
    }

    pub fn mark_until_budget_exhausted_with<H, B>(
        &mut self,
        heap: &mut H,
        budget: &mut B,
        report_time: ReportMarkTime,
    ) -> IncrementalProgress
    where
        H: MarkingHeap + ?Sized,
        B: SliceBudget + ?Sized,
    {
        debug_assert!(self.is_active());
        debug_assert_eq!(self.mark_color(), MarkColor::Black);

        if budget.is_over_budget() {
            return if self.is_drained() {
                IncrementalProgress::Finished
            } else {
                IncrementalProgress::NotFinished
            };
        }

        self.drain_implicit_edges(heap);

        loop {
            while self.has_work(MarkColor::Black) {
                self.step_marking(heap, budget);
                if budget.is_over_budget() {
                    return IncrementalProgress::NotFinished;
                }
            }

            if self.has_work(MarkColor::Gray) {
                let over_budget = self.with_mark_color(MarkColor::Gray, |marker| {
                    while marker.deferred_black.is_empty() && marker.has_work(MarkColor::Gray) {
                        marker.step_marking(heap, budget);
                        if budget.is_over_budget() {
                            return true;
                        }
                    }
                    false
                });

                if over_budget {
                    return IncrementalProgress::NotFinished;
                }
            }

            // Gray marking can uncover ephemeron targets that must be black.
            if self.has_work(MarkColor::Black) {
                continue;
            }

            if !self.has_delayed_children() {
                break;
            }

            if !self.mark_all_delayed_children(heap, budget, report_time) {
                return IncrementalProgress::NotFinished;
            }
        }

        debug_assert!(self.is_drained());
        IncrementalProgress::Finished
    }

    /// Whether any stack entries or deferred targets of `color` remain.
    #[inline]
    pub(crate) fn has_work(&self, color: MarkColor) -> bool {
        match color {
            MarkColor::Black => self.stack.has_black_entries() || !self.deferred_black.is_empty(),
            MarkColor::Gray => self.stack.has_gray_entries() || !self.deferred_gray.is_empty(),
        }
    }

    /// Do one unit of work for the current mark color.
    pub(crate) fn step_marking<H, B>(&mut self, heap: &mut H, budget: &mut B)
    where
        H: MarkingHeap + ?Sized,
        B: SliceBudget + ?Sized,
    {
        let deferred = match self.mark_color() {
            MarkColor::Black => self.deferred_black.pop(),
            MarkColor::Gray => self.deferred_gray.pop(),
        };

        match deferred {
            Some(cell) => {
                budget.step(1);
                self.mark_and_traverse_cell(heap, cell);
                self.drain_implicit_edges(heap);
            }
            None => self.process_mark_stack_top(heap, budget),
        }
    }

    fn process_mark_stack_top<H, B>(&mut self, heap: &mut H, budget: &mut B)
    where
        H: MarkingHeap + ?Sized,
        B: SliceBudget + ?Sized,
    {
        let Some(entry) = self.stack.pop() else {
            return;
        };
        self.stats.entries_processed += 1;

        match entry {
            StackEntry::Cell(cell) => {
                budget.step(1);
                self.process_cell(heap, cell);
            }
            StackEntry::TempRope(rope) => {
                budget.step(1);
                self.eagerly_mark_rope(heap, rope);
            }
            StackEntry::Range(range) => {
                let traced = self.process_range(heap, range);
                budget.step(traced.max(1));
            }
        }

        self.drain_implicit_edges(heap);
    }

    /// Trace the children of a cell popped from the stack.
    fn process_cell<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        debug_assert!(heap.color(cell).is_marked());

        let kind = heap.kind(cell);
        match kind.traversal() {
            Traversal::Push if kind.has_slots() => self.scan_object(heap, cell, kind),
            Traversal::Push => self.trace_children_of(heap, cell),
            Traversal::Eager => self.scan_children(heap, cell),
            Traversal::Rope => self.eagerly_mark_rope(heap, cell),
            Traversal::Leaf => {}
        }
    }

    /// Trace an object's direct children and push range entries for its slot
    /// and element spans.
    fn scan_object<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, object: CellId, kind: CellKind) {
        self.trace_children_of(heap, object);

        if kind == CellKind::WeakMap {
            self.mark_weak_map_entries(heap, object);
        }

        for slots_kind in SlotsKind::ALL {
            if heap.slots_len(object, slots_kind) == 0 {
                continue;
            }

            if self.stack.push_range(object, slots_kind, 0).is_err() {
                self.note_push_failure();
                self.delay_marking_children(heap, object);
                return;
            }
            self.note_stack_depth();
        }
    }

    /// Trace one chunk of a range entry, re-pushing the remainder first.
    /// Returns the number of slots traced.
    fn process_range<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, range: SlotsRange) -> usize {
        let SlotsRange { kind, cell, start } = range;
        debug_assert!(heap.color(cell).is_marked());

        // The container may have shrunk since the entry was pushed.
        let end = heap.slots_len(cell, kind);
        if start >= end {
            return 0;
        }

        let chunk_end = end.min(start.saturating_add(self.options.range_chunk_size));
        if chunk_end < end {
            if self.stack.push_range(cell, kind, chunk_end).is_err() {
                self.note_push_failure();
                self.delay_marking_children(heap, cell);
            } else {
                self.note_stack_depth();
            }
        }

        let mut slots = self.take_buffer();
        heap.trace_slots(cell, kind, start, chunk_end, &mut EdgeCollector { edges: &mut slots });
        for &target in &slots {
            self.mark_and_traverse_cell(heap, target);
        }
        self.return_buffer(slots);

        self.stats.ranges_processed += 1;
        chunk_end - start
    }

    fn trace_children_of<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        let mut children = self.take_buffer();
        heap.trace_children(cell, &mut EdgeCollector { edges: &mut children });
        for &child in &children {
            self.mark_and_traverse_cell(heap, child);
        }
        self.return_buffer(children);
    }

    /// Trace every outgoing edge of a cell in one go, including whole slot
    /// spans and weak map entries. Used for cells whose push was refused.
    pub(crate) fn trace_all_children<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        let kind = heap.kind(cell);

        let mut edges = self.take_buffer();
        heap.trace_children(cell, &mut EdgeCollector { edges: &mut edges });
        if kind.has_slots() {
            for slots_kind in SlotsKind::ALL {
                let len = heap.slots_len(cell, slots_kind);
                if len > 0 {
                    heap.trace_slots(cell, slots_kind, 0, len, &mut EdgeCollector { edges: &mut edges });
                }
            }
        }

        for &target in &edges {
            self.mark_and_traverse_cell(heap, target);
        }
        self.return_buffer(edges);

        if kind == CellKind::WeakMap {
            self.mark_weak_map_entries(heap, cell);
        }
    }

    // ========================================================================
    // Marking
    // ========================================================================

    /// If `cell` is not yet marked with the current color, mark it and
    /// traverse its children.
    pub fn mark_and_traverse<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        debug_assert!(self.is_active());
        self.mark_and_traverse_cell(heap, cell);
        self.drain_implicit_edges(heap);
    }

    /// Mark `cell` with the current color without tracing its children.
    /// Returns whether the cell's color was strengthened.
    pub fn mark<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) -> bool {
        debug_assert!(self.is_active());
        let marked = self.mark_cell(heap, cell);
        self.drain_implicit_edges(heap);
        marked
    }

    pub(crate) fn mark_and_traverse_cell<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        if self.mark_cell(heap, cell) {
            self.traverse(heap, cell);
        }
    }

    pub(crate) fn mark_cell<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) -> bool {
        let color = CellColor::from(self.mark_color());
        if heap.color(cell) >= color {
            return false;
        }

        heap.set_color(cell, color);
        self.stats.cells_marked += 1;

        match self.state {
            MarkingState::RootMarking => {
                let zone = heap.zone_of(cell);
                if self.marked_zones.insert(zone) {
                    heap.note_zone_marked(zone);
                }
            }
            MarkingState::WeakMarking => self.pending_implicit_edges.push(cell),
            MarkingState::RegularMarking | MarkingState::NotActive => {}
        }

        true
    }

    /// Process the children of a newly marked cell according to its kind.
    fn traverse<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        match heap.kind(cell).traversal() {
            Traversal::Push => self.push_or_delay(heap, cell),
            Traversal::Eager => self.scan_children(heap, cell),
            Traversal::Rope => self.eagerly_mark_rope(heap, cell),
            Traversal::Leaf => {}
        }
    }

    fn push_or_delay<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        if self.stack.push(cell).is_err() {
            self.note_push_failure();
            self.delay_marking_children(heap, cell);
        } else {
            self.note_stack_depth();
        }
    }

    /// Scan an eager kind's children in a loop. One eager child at a time is
    /// followed directly, everything else is pushed. At most
    /// `eager_scan_limit` cells are followed.
    fn scan_children<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        let limit = self.options.eager_scan_limit;
        let mut followed = 0;
        let mut next = Some(cell);
        let mut children = self.take_buffer();

        while let Some(current) = next.take() {
            children.clear();
            heap.trace_children(current, &mut EdgeCollector { edges: &mut children });

            for &child in &children {
                if !self.mark_cell(heap, child) {
                    continue;
                }

                match heap.kind(child).traversal() {
                    Traversal::Eager if next.is_none() && followed < limit => {
                        next = Some(child);
                        followed += 1;
                    }
                    Traversal::Leaf => {}
                    _ => self.push_or_delay(heap, child),
                }
            }
        }

        self.return_buffer(children);
    }

    /// Mark a rope tree without recursion. Ropes still to be visited are saved
    /// as temp rope entries on the mark stack. On return the stack is back at
    /// the depth it had on entry.
    fn eagerly_mark_rope<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, rope: CellId) {
        let saved_position = self.stack.position();
        let mut children = self.take_buffer();
        let mut leaves = Vec::new();
        let mut current = rope;

        loop {
            children.clear();
            heap.trace_children(current, &mut EdgeCollector { edges: &mut children });

            // Right to left, so that the leftmost rope is followed next.
            let mut next = None;
            for &child in children.iter().rev() {
                if !self.mark_cell(heap, child) {
                    continue;
                }

                if heap.kind(child) == CellKind::Rope {
                    if let Some(previous) = next.replace(child) {
                        if self.stack.push_temp_rope(previous).is_err() {
                            self.note_push_failure();
                            self.delay_marking_children(heap, previous);
                        } else {
                            self.note_stack_depth();
                        }
                    }
                } else {
                    leaves.push(child);
                }
            }

            if let Some(next) = next {
                current = next;
            } else if self.stack.position() > saved_position {
                debug_assert_eq!(self.stack.peek_tag(), Some(StackTag::TempRope));
                let Some(TaggedCell::TempRope(saved)) = self.stack.pop_ptr() else {
                    break;
                };
                current = saved;
            } else {
                break;
            }
        }

        debug_assert_eq!(self.stack.position(), saved_position);
        self.return_buffer(children);

        // Traversed last so that nothing else lands on the stack between temp ropes.
        for leaf in leaves {
            self.traverse(heap, leaf);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    pub(crate) fn note_push_failure(&mut self) {
        if self.stats.stack_push_failures == 0 {
            log::warn!(
                "mark stack full at {} entries, falling back to delayed marking",
                self.stack.position()
            );
        }
        self.stats.stack_push_failures += 1;
    }

    #[inline]
    fn note_stack_depth(&mut self) {
        self.stats.max_stack_depth = self.stats.max_stack_depth.max(self.stack.position());
    }

    #[inline]
    pub(crate) fn take_buffer(&mut self) -> Vec<CellId> {
        let mut buffer = mem::take(&mut self.edge_buffer);
        buffer.clear();
        buffer
    }

    #[inline]
    pub(crate) fn return_buffer(&mut self, mut buffer: Vec<CellId>) {
        if buffer.capacity() > self.edge_buffer.capacity() {
            buffer.clear();
            self.edge_buffer = buffer;
        }
    }
}
