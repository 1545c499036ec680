//! # vma-tree
//!
//! Interval tracking for virtual memory: which address ranges are reserved or
//! committed, attributed to which call stack and memory tag.
//!
//! Two layers:
//!
//! - [`Treap`]: a randomized ordered map built on `split`/`merge`, generic
//!   over its key comparator and its node allocator.
//! - [`VmaTree`]: addresses as keys, state transitions as values. Mutations
//!   split, overwrite and coalesce intervals and return a [`SummaryDiff`] so
//!   callers can keep per-tag totals without re-scanning.
//!
//! Neither layer is synchronized; callers serialize access.
//!
//! ## Example
//!
//! ```rust
//! use vma_tree::{MemTag, RegionData, StackIndex, VmaTree};
//!
//! let mut tree = VmaTree::new();
//! let gc = RegionData::new(StackIndex::new(0), MemTag::Gc);
//!
//! let diff = tree.reserve_mapping(0x1000, 0x4000, gc).unwrap();
//! assert_eq!(diff[MemTag::Gc].reserve, 0x4000);
//!
//! let diff = tree.commit_mapping(0x2000, 0x1000, gc, false).unwrap();
//! assert_eq!(diff[MemTag::Gc].commit, 0x1000);
//! assert_eq!(diff[MemTag::Gc].reserve, 0);
//!
//! let diff = tree.release_mapping(0x1000, 0x4000).unwrap();
//! assert_eq!(diff[MemTag::Gc].reserve, -0x4000);
//! assert!(tree.is_empty());
//! ```

#![deny(unsafe_code)]

pub mod arena;
mod error;
mod summary;
mod tag;
pub mod treap;
pub mod vma_tree;

pub use arena::{NodeAllocator, NodeArena, NodeId};
pub use error::TreeError;
pub use summary::{SingleDiff, SummaryDiff};
pub use tag::{MemTag, UnknownTag};
pub use treap::{Comparator, OrdComparator, Treap, TreapNode};
pub use vma_tree::{
    IntervalChange, IntervalState, Region, RegionData, StackIndex, StateType, VmaNode, VmaTree,
};

/// An address in the tracked address space.
pub type Position = usize;

#[cfg(test)]
mod proptests;
