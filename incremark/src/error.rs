use core::fmt;

use crate::cell::{CellColor, CellId};

/// Result type for operations that may need to allocate
pub type AllocResult<T> = Result<T, AllocError>;

/// Allocation error. Returned when marking work-lists cannot grow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("marking work-list allocation failed")
    }
}

impl core::error::Error for AllocError {}

/// An edge that breaks the tri-color invariant after marking completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkingViolation {
    pub source: CellId,
    pub source_color: CellColor,
    pub target: CellId,
    pub target_color: CellColor,
    pub edge_name: &'static str,
}

impl fmt::Display for MarkingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} cell {:?} has edge '{}' to {:?} cell {:?}",
            self.source_color, self.source, self.edge_name, self.target_color, self.target
        )
    }
}

impl core::error::Error for MarkingViolation {}
