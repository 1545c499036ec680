use std::collections::TryReserveError;

use thiserror::Error;

use crate::Position;

/// Failures surfaced by the tree.
///
/// Invariant violations are not represented here: a corrupted treap cannot be
/// repaired in place, so those panic instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("node storage exhausted: capacity {capacity}")]
    OutOfNodes { capacity: usize },
    #[error("node allocation failed: {0}")]
    AllocationFailed(#[from] TryReserveError),
    #[error("address range overflow: {0:#x}, len: {1:#x}")]
    RangeOverflow(Position, usize),
}
