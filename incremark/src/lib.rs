//! Incremark
//!
//! The incremental tri-color marking engine of a tracing garbage collector.
//! Marking can be sliced across time budgets, survives mark stack exhaustion
//! through delayed marking, and resolves weak map entries in a single linear
//! weak marking pass.
//!
//! Key types:
//! - `Marker`: the marking state machine and traversal loop
//! - `MarkStack`: the work-list shared by black and gray marking
//! - `EphemeronEdgeTable`: dependent edges recorded for weak maps
//! - `SimpleHeap`: a small reference heap
//!
//! Key traits:
//! - `MarkingHeap`: implemented by the heap, provides colors, arenas, roots and tracing
//! - `EdgeVisitor`: implemented by the marker, used by heaps to report edges
//! - `SliceBudget`: bounds the work done by one marking slice

#![no_std]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod arena;
mod budget;
mod cell;
mod delayed;
mod ephemeron;
mod error;
mod mark_stack;
mod marker;
mod options;
mod owner;
mod simple_heap;
mod stats;
pub mod verify;
mod visitor;
mod weak;

pub use arena::{DelayedMarkingFlags, DelayedMarkingLink};
#[cfg(feature = "std")]
pub use budget::TimeBudget;
pub use budget::{IncrementalProgress, SliceBudget, UnlimitedBudget, WorkBudget};
pub use cell::{ArenaId, CellColor, CellId, CellKind, MarkColor, SlotsKind, Traversal, ZoneId};
pub use ephemeron::{EphemeronEdge, EphemeronEdgeTable, WeakMapList};
pub use error::{AllocError, AllocResult, MarkingViolation};
pub use mark_stack::{MarkStack, SlotsRange, StackEntry, StackTag, TaggedCell, MARK_STACK_BASE_CAPACITY};
pub use marker::{Marker, MarkingState, ReportMarkTime};
pub use options::{MarkerOptions, MarkerOptionsBuilder, DEFAULT_EAGER_SCAN_LIMIT, DEFAULT_RANGE_CHUNK_SIZE};
#[cfg(feature = "std")]
pub use owner::run_slice_on_helper;
pub use owner::MarkingOwner;
pub use simple_heap::{SimpleHeap, DEFAULT_ARENA_SIZE};
pub use stats::MarkerStats;
pub use visitor::{EdgeVisitor, MarkingHeap};
