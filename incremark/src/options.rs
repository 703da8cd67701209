use crate::mark_stack::MARK_STACK_BASE_CAPACITY;

/// Default number of slots traced per popped range entry
pub const DEFAULT_RANGE_CHUNK_SIZE: usize = 256;

/// Default number of cells one eager scan follows before pushing the rest
pub const DEFAULT_EAGER_SCAN_LIMIT: usize = 64;

/// Marker configuration
#[derive(Clone, Debug)]
pub struct MarkerOptions {
    /// Mark stack capacity reserved up front and restored after each cycle
    pub base_stack_capacity: usize,
    /// Hard cap on mark stack growth. Pushes beyond it fall back to delayed marking.
    pub max_stack_capacity: Option<usize>,
    /// Maximum number of slots or elements traced per popped range entry
    pub range_chunk_size: usize,
    /// Maximum number of cells followed by one eager scan
    pub eager_scan_limit: usize,
    /// Populate the ephemeron table during regular marking. Otherwise the table
    /// is built from the recorded weak maps when weak marking starts.
    pub incremental_weak_map_marking: bool,
    /// Simulated ephemeron table capacity, exceeding it aborts linear weak marking
    pub max_ephemeron_edges: Option<usize>,
}

impl Default for MarkerOptions {
    fn default() -> Self {
        MarkerOptionsBuilder::new().build()
    }
}

pub struct MarkerOptionsBuilder(MarkerOptions);

impl MarkerOptionsBuilder {
    /// Create new options with default values.
    pub fn new() -> Self {
        Self(MarkerOptions {
            base_stack_capacity: MARK_STACK_BASE_CAPACITY,
            max_stack_capacity: None,
            range_chunk_size: DEFAULT_RANGE_CHUNK_SIZE,
            eager_scan_limit: DEFAULT_EAGER_SCAN_LIMIT,
            incremental_weak_map_marking: true,
            max_ephemeron_edges: None,
        })
    }

    /// Return the options that have been built, consuming the builder.
    pub fn build(self) -> MarkerOptions {
        self.0
    }

    pub fn base_stack_capacity(mut self, base_stack_capacity: usize) -> Self {
        self.0.base_stack_capacity = base_stack_capacity;
        self
    }

    pub fn max_stack_capacity(mut self, max_stack_capacity: Option<usize>) -> Self {
        self.0.max_stack_capacity = max_stack_capacity;
        self
    }

    pub fn range_chunk_size(mut self, range_chunk_size: usize) -> Self {
        self.0.range_chunk_size = range_chunk_size.max(1);
        self
    }

    pub fn eager_scan_limit(mut self, eager_scan_limit: usize) -> Self {
        self.0.eager_scan_limit = eager_scan_limit;
        self
    }

    pub fn incremental_weak_map_marking(mut self, incremental_weak_map_marking: bool) -> Self {
        self.0.incremental_weak_map_marking = incremental_weak_map_marking;
        self
    }

    pub fn max_ephemeron_edges(mut self, max_ephemeron_edges: Option<usize>) -> Self {
        self.0.max_ephemeron_edges = max_ephemeron_edges;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_and_overrides() {
        let options = MarkerOptions::default();
        assert_eq!(options.base_stack_capacity, MARK_STACK_BASE_CAPACITY);
        assert!(options.incremental_weak_map_marking);
        assert_eq!(options.max_stack_capacity, None);

        let options = MarkerOptionsBuilder::new()
            .max_stack_capacity(Some(1))
            .range_chunk_size(0)
            .incremental_weak_map_marking(false)
            .build();
        assert_eq!(options.max_stack_capacity, Some(1));
        assert_eq!(options.range_chunk_size, 1);
        assert!(!options.incremental_weak_map_marking);
    }
}
