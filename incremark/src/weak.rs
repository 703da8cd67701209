//! Weak marking
//!
//! A weak map entry `(map, key) -> value` keeps `value` alive at
//! `min(color of map, color of key)`. A key with a delegate is itself kept
//! alive at `min(color of map, color of delegate)`.
//!
//! While marking, weak maps whose keys are not yet marked leave edges in the
//! ephemeron table: `key -> (map color, value)` and, for keys with a delegate,
//! `delegate -> (map color, key)`. In weak marking mode every newly marked cell
//! is looked up in the table and its edges are marked through, which reaches
//! the weak fixpoint in a single linear pass.
//!
//! If the table cannot grow, linear weak marking is aborted for the rest of the
//! cycle and `mark_weak_references` falls back to rescanning every recorded weak
//! map until a pass marks nothing new.

use alloc::vec::Vec;

use crate::{
    budget::{IncrementalProgress, UnlimitedBudget},
    cell::{CellId, MarkColor},
    ephemeron::EphemeronEdge,
    marker::{Marker, MarkingState},
    owner::MarkingOwner,
    visitor::{MarkingHeap, WeakEntryCollector},
};

impl Marker {
    /// Switch from regular to weak marking. Returns false if linear weak
    /// marking has been aborted this cycle, in which case the state is unchanged.
    ///
    /// Ephemeron edges from cells that are already marked are resolved before
    /// returning. Work they produce is left on the mark stack.
    pub fn enter_weak_marking_mode<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) -> bool {
        debug_assert_eq!(self.state, MarkingState::RegularMarking);

        if !self.have_all_implicit_edges {
            return false;
        }

        self.state = MarkingState::WeakMarking;
        log::debug!("entering weak marking mode");

        if !self.options.incremental_weak_map_marking {
            // The table was not populated during regular marking, so build it now.
            let mut index = 0;
            while let Some(map) = self.weak_maps.get(index) {
                index += 1;
                if heap.color(map).is_marked() {
                    self.mark_weak_map_entries(heap, map);
                }
                if !self.have_all_implicit_edges {
                    return false;
                }
            }
        }

        for source in self.ephemeron_edges.sources() {
            if heap.color(source).is_marked() {
                self.pending_implicit_edges.push(source);
            }
        }
        self.drain_implicit_edges(heap);

        self.is_weak_marking()
    }

    /// Switch back to regular marking. The ephemeron table is kept for later
    /// weak marking passes in this cycle.
    pub fn leave_weak_marking_mode(&mut self) {
        debug_assert!(self.pending_implicit_edges.is_empty());

        if self.state == MarkingState::WeakMarking {
            self.state = MarkingState::RegularMarking;
            log::debug!("leaving weak marking mode");
        }
    }

    /// Stop using the ephemeron table for the rest of this cycle.
    pub fn abort_linear_weak_marking(&mut self) {
        if !self.have_all_implicit_edges {
            return;
        }

        log::warn!(
            "aborting linear weak marking with {} ephemeron edges recorded",
            self.ephemeron_edges.edge_count()
        );

        self.have_all_implicit_edges = false;
        self.ephemeron_edges.clear();
        self.pending_implicit_edges.clear();
        if self.state == MarkingState::WeakMarking {
            self.state = MarkingState::RegularMarking;
        }
    }

    /// Whether linear weak marking is still available this cycle.
    #[inline]
    pub fn has_all_implicit_edges(&self) -> bool {
        self.have_all_implicit_edges
    }

    /// Complete the weak marking phase. The marker must be drained.
    ///
    /// Uses linear weak marking when possible. Otherwise every recorded weak map
    /// is rescanned, followed by a full drain, until a pass marks nothing new.
    pub fn mark_weak_references<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) {
        debug_assert!(self.is_drained());
        debug_assert!(self.is_regular_marking());

        let mut unlimited = UnlimitedBudget;

        if self.enter_weak_marking_mode(heap) {
            let progress = self.mark_until_budget_exhausted(heap, &mut unlimited);
            debug_assert_eq!(progress, IncrementalProgress::Finished);
            self.leave_weak_marking_mode();

            if self.have_all_implicit_edges {
                return;
            }
        }

        loop {
            let marked_before = self.stats.cells_marked;
            self.stats.weak_marking_fallback_passes += 1;

            self.mark_weak_maps_iteratively(heap);
            let progress = self.mark_until_budget_exhausted(heap, &mut unlimited);
            debug_assert_eq!(progress, IncrementalProgress::Finished);

            if self.stats.cells_marked == marked_before {
                break;
            }
        }

        log::debug!(
            "weak marking fallback finished after {} passes",
            self.stats.weak_marking_fallback_passes
        );
    }

    /// Mark through the entries of every recorded weak map that is marked.
    /// Returns whether any cell was marked or queued for marking.
    pub fn mark_weak_maps_iteratively<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) -> bool {
        let marked_before = self.stats.cells_marked;
        let deferred_before = self.deferred_black.len() + self.deferred_gray.len();

        let mut index = 0;
        while let Some(map) = self.weak_maps.get(index) {
            index += 1;
            if heap.color(map).is_marked() {
                self.mark_weak_map_entries(heap, map);
            }
        }

        self.stats.cells_marked != marked_before
            || self.deferred_black.len() + self.deferred_gray.len() != deferred_before
    }

    /// `delegate` is no longer the delegate of `key`.
    ///
    /// The `delegate -> key` edge is lost. The delegate is assumed to end up
    /// black, so the key is marked through the edge before it is removed.
    pub fn sever_weak_delegate<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, key: CellId, delegate: CellId) {
        debug_assert_eq!(self.owner, MarkingOwner::Mutator);

        if !self.is_active() || !self.have_all_implicit_edges {
            return;
        }

        let Some(edges) = self.ephemeron_edges.get(delegate) else {
            return;
        };
        let severed: Vec<EphemeronEdge> = edges.iter().copied().filter(|edge| edge.target == key).collect();
        if severed.is_empty() {
            return;
        }

        self.ephemeron_edges.remove_targeting(delegate, key);
        self.mark_ephemeron_edges(heap, &severed, MarkColor::Black);
        self.drain_implicit_edges(heap);
    }

    /// `delegate` is now the delegate of `key`.
    ///
    /// If `key` has ephemeron edges, a black `delegate -> key` edge is added so
    /// the key stays alive with its delegate.
    pub fn restore_weak_delegate<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, key: CellId, delegate: CellId) {
        debug_assert_eq!(self.owner, MarkingOwner::Mutator);

        if !self.is_active() || !self.have_all_implicit_edges {
            return;
        }

        if !self.ephemeron_edges.contains(key) {
            return;
        }

        let edge = EphemeronEdge {
            color: MarkColor::Black,
            target: key,
        };
        if !self.add_ephemeron_edge(delegate, edge) {
            return;
        }

        if self.is_weak_marking() && heap.color(delegate).is_marked() {
            self.pending_implicit_edges.push(delegate);
            self.drain_implicit_edges(heap);
        }
    }

    /// Mark through the entries of a marked weak map and record edges for
    /// entries whose key is not yet marked strongly enough.
    pub(crate) fn mark_weak_map_entries<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, map: CellId) {
        let Some(map_color) = MarkColor::of(heap.color(map)) else {
            return;
        };

        self.weak_maps.insert(map);

        let mut entries = Vec::new();
        heap.trace_weak_entries(map, &mut WeakEntryCollector { entries: &mut entries });

        let populate = self.have_all_implicit_edges
            && (self.options.incremental_weak_map_marking || self.is_weak_marking());

        for (key, value) in entries {
            self.mark_weak_entry(heap, map_color, key, value, populate);
        }
    }

    fn mark_weak_entry<H: MarkingHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        map_color: MarkColor,
        key: CellId,
        value: CellId,
        populate: bool,
    ) {
        let delegate = heap.weak_delegate(key);

        // A key is preserved by its delegate.
        if let Some(delegate) = delegate {
            if let Some(delegate_color) = MarkColor::of(heap.color(delegate)) {
                self.mark_ephemeron_target(heap, key, delegate_color.min(map_color));
            }
        }

        let key_color = heap.color(key);
        if let Some(key_mark_color) = MarkColor::of(key_color) {
            self.mark_ephemeron_target(heap, value, key_mark_color.min(map_color));
        }

        if populate && !key_color.is_marked_at_least(map_color) {
            let value_edge = EphemeronEdge {
                color: map_color,
                target: value,
            };
            if !self.add_ephemeron_edge(key, value_edge) {
                return;
            }

            if let Some(delegate) = delegate {
                let key_edge = EphemeronEdge {
                    color: map_color,
                    target: key,
                };
                self.add_ephemeron_edge(delegate, key_edge);
            }
        }
    }

    /// Record an ephemeron edge, aborting linear weak marking if the table is
    /// full. Returns whether the edge was recorded.
    fn add_ephemeron_edge(&mut self, source: CellId, edge: EphemeronEdge) -> bool {
        if !self.have_all_implicit_edges {
            return false;
        }

        if self.ephemeron_edges.add_edge(source, edge).is_err() {
            self.abort_linear_weak_marking();
            return false;
        }

        self.stats.ephemeron_edges_added += 1;
        true
    }

    /// Resolve the ephemeron edges of cells marked during weak marking.
    pub(crate) fn drain_implicit_edges<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) {
        while let Some(cell) = self.pending_implicit_edges.pop() {
            self.mark_implicit_edges(heap, cell);
        }
    }

    fn mark_implicit_edges<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        if !self.is_weak_marking() {
            return;
        }

        let Some(source_color) = MarkColor::of(heap.color(cell)) else {
            return;
        };
        let Some(edges) = self.ephemeron_edges.take(cell) else {
            return;
        };

        self.mark_ephemeron_edges(heap, &edges, source_color);

        // A gray source may still turn black, which would strengthen its targets.
        if source_color == MarkColor::Gray
            && self.have_all_implicit_edges
            && self.ephemeron_edges.restore(cell, edges).is_err()
        {
            self.abort_linear_weak_marking();
        }
    }

    /// Mark the targets of `edges` from a source of color `source_color`. Each
    /// target is marked at `min(edge color, source color)`.
    pub(crate) fn mark_ephemeron_edges<H: MarkingHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        edges: &[EphemeronEdge],
        source_color: MarkColor,
    ) {
        for edge in edges {
            let target_color = edge.color.min(source_color);
            if self.mark_ephemeron_target(heap, edge.target, target_color) {
                self.stats.ephemeron_edges_marked += 1;
            }
        }
    }

    /// Mark `target` at `color`, now if that is the current mark color or once
    /// the marker switches to it. Returns false if the target already had that
    /// color or a stronger one.
    fn mark_ephemeron_target<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, target: CellId, color: MarkColor) -> bool {
        if heap.color(target).is_marked_at_least(color) {
            return false;
        }

        if color == self.mark_color() {
            self.mark_and_traverse_cell(heap, target);
        } else {
            match color {
                MarkColor::Black => self.deferred_black.push(target),
                MarkColor::Gray => self.deferred_gray.push(target),
            }
        }

        true
    }
}
