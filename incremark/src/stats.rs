use core::time::Duration;

/// Counters for one marking cycle. Reset by `Marker::start`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkerStats {
    /// Mark stack entries popped and processed
    pub entries_processed: usize,
    /// Cells whose color was strengthened
    pub cells_marked: usize,
    /// Range entries traced
    pub ranges_processed: usize,
    /// Pushes refused because the mark stack could not grow
    pub stack_push_failures: usize,
    /// Arenas linked into the delayed marking list
    pub delayed_arenas: usize,
    /// Calls to `mark_all_delayed_children`
    pub delayed_marking_passes: usize,
    pub ephemeron_edges_added: usize,
    pub ephemeron_edges_marked: usize,
    /// Passes of the iterative weak marking fallback
    pub weak_marking_fallback_passes: usize,
    /// Deepest mark stack observed
    pub max_stack_depth: usize,
    /// Time spent in delayed marking when time reporting was requested.
    /// Only measured with the `std` feature.
    pub delayed_marking_time: Duration,
}
