//! Marking ownership
//!
//! Marking state is touched by one logical owner at a time: the mutator, which
//! drives collection slices and runs barriers, or a helper thread that runs a
//! marking slice on its behalf. Ownership moves only at slice boundaries, by
//! handing the `&mut Marker` over. No locks are involved, exclusive borrows
//! already guarantee the two owners never overlap.
//!
//! Root marking, lifecycle transitions and weak delegate updates are
//! mutator-only and assert it in debug builds.

use crate::marker::Marker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkingOwner {
    /// The thread that triggers collection slices
    Mutator,
    /// A background thread running a marking slice
    Helper,
}

impl Marker {
    #[inline]
    pub fn owner(&self) -> MarkingOwner {
        self.owner
    }

    /// Transfer logical ownership of the marking state.
    pub fn hand_off(&mut self, to: MarkingOwner) {
        debug_assert_ne!(self.owner, to, "marking state handed off to its current owner");
        log::trace!("marking handed off from {:?} to {:?}", self.owner, to);
        self.owner = to;
    }
}

#[cfg(feature = "std")]
pub use helper::run_slice_on_helper;

#[cfg(feature = "std")]
mod helper {
    use std::{panic, thread};

    use crate::{
        budget::{IncrementalProgress, SliceBudget},
        marker::Marker,
        visitor::MarkingHeap,
    };

    use super::MarkingOwner;

    /// Run one budgeted marking slice on a helper thread and wait for it.
    ///
    /// The marker and heap are lent to the helper for the duration of the
    /// slice and come back to the mutator when it finishes.
    pub fn run_slice_on_helper<H, B>(marker: &mut Marker, heap: &mut H, budget: &mut B) -> IncrementalProgress
    where
        H: MarkingHeap + Send + ?Sized,
        B: SliceBudget + Send + ?Sized,
    {
        marker.hand_off(MarkingOwner::Helper);

        let result = thread::scope(|scope| {
            let marker = &mut *marker;
            let slice = scope.spawn(move || {
                debug_assert_eq!(marker.owner(), MarkingOwner::Helper);
                marker.mark_until_budget_exhausted(heap, budget)
            });
            slice.join()
        });

        marker.hand_off(MarkingOwner::Mutator);

        match result {
            Ok(progress) => progress,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}
