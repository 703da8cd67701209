//! Delayed marking
//!
//! When a push onto the mark stack fails, the cell's arena is linked into a
//! list threaded through arena headers and flagged with the current mark
//! color. Once the stack drains, every flagged arena is revisited and the
//! children of each cell marked with that color are traced in full. Tracing
//! can overflow the stack again, which flags more arenas; the list is walked
//! until a pass adds no new work.

use crate::{
    budget::SliceBudget,
    cell::{ArenaId, CellId, MarkColor},
    marker::{Marker, ReportMarkTime},
    visitor::MarkingHeap,
};

/// Head and tail of a delayed marking list under construction.
#[derive(Default)]
struct ListBuilder {
    head: Option<ArenaId>,
    tail: Option<ArenaId>,
}

impl Marker {
    /// Put `cell`'s arena on the delayed marking list so its children are
    /// traced later. An arena is linked at most once.
    pub(crate) fn delay_marking_children<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H, cell: CellId) {
        debug_assert!(heap.color(cell).is_marked());

        let arena = heap.arena_of(cell);
        let color = self.mark_color();
        let head = self.delayed_marking_list;

        let link = heap.delayed_link_mut(arena);
        if !link.is_on_list() {
            link.link(head);
            self.delayed_marking_list = Some(arena);
            self.stats.delayed_arenas += 1;
            log::trace!("delaying marking of arena {arena:?}");
        }

        let link = heap.delayed_link_mut(arena);
        if !link.has_delayed_marking(color) {
            link.set_delayed_marking(color, true);
            self.delayed_marking_work_added = true;
        }
    }

    /// Process the delayed marking list, black arenas first. Returns false if
    /// the budget ran out, in which case unprocessed arenas keep their flags and
    /// the next call resumes from them.
    pub fn mark_all_delayed_children<H, B>(
        &mut self,
        heap: &mut H,
        budget: &mut B,
        report_time: ReportMarkTime,
    ) -> bool
    where
        H: MarkingHeap + ?Sized,
        B: SliceBudget + ?Sized,
    {
        debug_assert!(self.has_delayed_children());
        debug_assert_eq!(self.mark_color(), MarkColor::Black);

        #[cfg(feature = "std")]
        let started = (report_time == ReportMarkTime::Report).then(std::time::Instant::now);
        #[cfg(not(feature = "std"))]
        let _ = report_time;

        self.stats.delayed_marking_passes += 1;

        let mut finished = true;
        for color in [MarkColor::Black, MarkColor::Gray] {
            if !self.process_delayed_marking_list(heap, color, budget) {
                finished = false;
                break;
            }
        }

        if finished {
            self.rebuild_delayed_marking_list(heap);
        }

        #[cfg(feature = "std")]
        if let Some(started) = started {
            self.stats.delayed_marking_time += started.elapsed();
        }

        finished
    }

    fn process_delayed_marking_list<H, B>(&mut self, heap: &mut H, color: MarkColor, budget: &mut B) -> bool
    where
        H: MarkingHeap + ?Sized,
        B: SliceBudget + ?Sized,
    {
        self.with_mark_color(color, |marker| loop {
            marker.delayed_marking_work_added = false;

            // Arenas linked during the walk go to the head and are picked up by
            // the next iteration.
            let mut cursor = marker.delayed_marking_list;
            while let Some(arena) = cursor {
                cursor = heap.delayed_link(arena).next();

                if heap.delayed_link(arena).has_delayed_marking(color) {
                    heap.delayed_link_mut(arena).set_delayed_marking(color, false);
                    let work = marker.mark_delayed_children(heap, arena, color);
                    budget.step(work);
                }
            }

            while marker.has_work(color) {
                if budget.is_over_budget() {
                    return false;
                }
                marker.step_marking(heap, budget);
            }

            if !marker.delayed_marking_work_added {
                return true;
            }

            if budget.is_over_budget() {
                return false;
            }
        })
    }

    /// Trace the children of every cell in the arena marked exactly `color`.
    /// Returns the number of cell positions examined.
    fn mark_delayed_children<H: MarkingHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        arena: ArenaId,
        color: MarkColor,
    ) -> usize {
        let len = heap.arena_len(arena);
        for index in 0..len {
            let Some(cell) = heap.arena_cell(arena, index) else {
                continue;
            };

            if MarkColor::of(heap.color(cell)) == Some(color) {
                self.trace_all_children(heap, cell);
                self.drain_implicit_edges(heap);
            }
        }

        len
    }

    /// Drop arenas with no pending work from the list. Arenas of kinds with a
    /// later delayed marking order are moved after all other arenas.
    pub fn rebuild_delayed_marking_list<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) {
        let mut ordinary = ListBuilder::default();
        let mut late = ListBuilder::default();

        let mut cursor = self.delayed_marking_list.take();
        while let Some(arena) = cursor {
            let link = heap.delayed_link_mut(arena);
            cursor = link.next();

            if !link.has_any_delayed_marking() {
                link.unlink();
                continue;
            }

            let list = if heap.arena_kind(arena).delayed_marking_order() > 0 {
                &mut late
            } else {
                &mut ordinary
            };
            Self::append_to_delayed_marking_list(heap, list, arena);
        }

        match ordinary.tail {
            Some(tail) => {
                heap.delayed_link_mut(tail).set_next(late.head);
                self.delayed_marking_list = ordinary.head;
            }
            None => self.delayed_marking_list = late.head,
        }

        log::trace!(
            "delayed marking list rebuilt, {}",
            if self.has_delayed_children() { "work remains" } else { "now empty" }
        );
    }

    fn append_to_delayed_marking_list<H: MarkingHeap + ?Sized>(
        heap: &mut H,
        list: &mut ListBuilder,
        arena: ArenaId,
    ) {
        heap.delayed_link_mut(arena).set_next(None);
        match list.tail {
            Some(tail) => heap.delayed_link_mut(tail).set_next(Some(arena)),
            None => list.head = Some(arena),
        }
        list.tail = Some(arena);
    }

    /// Unlink every arena on the delayed marking list, dropping its pending work.
    pub(crate) fn unlink_delayed_marking_list<H: MarkingHeap + ?Sized>(&mut self, heap: &mut H) {
        let mut cursor = self.delayed_marking_list.take();
        while let Some(arena) = cursor {
            let link = heap.delayed_link_mut(arena);
            cursor = link.next();
            link.unlink();
        }
        self.delayed_marking_work_added = false;
    }
}
