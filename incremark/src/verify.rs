//! Tri-color invariant checker
//!
//! After a finished marking cycle every strong edge of a marked cell must lead
//! to a cell marked at least as strongly. In a marked weak map, an entry with a
//! marked key must have its value marked at least `min(map color, key color)`,
//! and an entry whose key has a marked delegate must have its key marked at
//! least `min(map color, delegate color)`.

use alloc::vec::Vec;

use crate::{
    cell::{ArenaId, CellId, MarkColor, SlotsKind},
    error::MarkingViolation,
    visitor::{EdgeVisitor, MarkingHeap},
};

/// Records every edge of one cell, with its name.
struct NamedEdges {
    edges: Vec<(CellId, &'static str)>,
    weak_entries: Vec<(CellId, CellId)>,
}

impl EdgeVisitor for NamedEdges {
    fn on_edge(&mut self, target: CellId, name: &'static str) {
        self.edges.push((target, name));
    }

    fn on_weak_entry(&mut self, key: CellId, value: CellId) {
        self.weak_entries.push((key, value));
    }
}

/// Check every marked cell in the heap. Returns the first violating edge.
pub fn check_tricolor<H: MarkingHeap + ?Sized>(heap: &H) -> Result<(), MarkingViolation> {
    let mut visitor = NamedEdges {
        edges: Vec::new(),
        weak_entries: Vec::new(),
    };

    for arena in (0..heap.arena_count()).map(ArenaId::new) {
        for index in 0..heap.arena_len(arena) {
            let Some(cell) = heap.arena_cell(arena, index) else {
                continue;
            };
            check_cell(heap, cell, &mut visitor)?;
        }
    }

    Ok(())
}

fn check_cell<H: MarkingHeap + ?Sized>(
    heap: &H,
    cell: CellId,
    visitor: &mut NamedEdges,
) -> Result<(), MarkingViolation> {
    let source_color = heap.color(cell);
    let Some(source_mark) = MarkColor::of(source_color) else {
        return Ok(());
    };

    visitor.edges.clear();
    visitor.weak_entries.clear();

    heap.trace_children(cell, visitor);
    if heap.kind(cell).has_slots() {
        for kind in SlotsKind::ALL {
            let len = heap.slots_len(cell, kind);
            heap.trace_slots(cell, kind, 0, len, visitor);
        }
    }
    heap.trace_weak_entries(cell, visitor);

    let violation = |target: CellId, edge_name| MarkingViolation {
        source: cell,
        source_color,
        target,
        target_color: heap.color(target),
        edge_name,
    };

    for &(target, name) in &visitor.edges {
        if !heap.color(target).is_marked_at_least(source_mark) {
            return Err(violation(target, name));
        }
    }

    for &(key, value) in &visitor.weak_entries {
        let delegate_mark = heap
            .weak_delegate(key)
            .and_then(|delegate| MarkColor::of(heap.color(delegate)));
        if let Some(delegate_mark) = delegate_mark {
            if !heap.color(key).is_marked_at_least(delegate_mark.min(source_mark)) {
                return Err(violation(key, "weak map key"));
            }
        }

        let Some(key_mark) = MarkColor::of(heap.color(key)) else {
            continue;
        };
        if !heap.color(value).is_marked_at_least(key_mark.min(source_mark)) {
            return Err(violation(value, "weak map value"));
        }
    }

    Ok(())
}

