//! # memtrack - Native Memory Tracking
//!
//! Records which parts of a process's address space are reserved or
//! committed, by whom (call stack) and for what (memory tag), and renders
//! summary and detail reports.
//!
//! ## Architecture
//!
//! Every address space is a [`vma_tree::VmaTree`]. Each mutation returns a
//! per-tag diff that is folded into a [`MemorySnapshot`], so totals never
//! require a scan. Two kinds of address space are tracked:
//!
//! 1. **Virtual memory** ([`VirtualMemory`]): the process address space.
//! 2. **Memory files** ([`MemoryFileTracker`]): devices with their own offsets.
//!
//! [`MemTracker`] owns both behind one lock and is the usual entry point.
//!
//! ## Example
//!
//! ```rust
//! use memtrack::{Config, MemTracker, NativeStack, TrackingLevel};
//! use vma_tree::MemTag;
//!
//! let tracker = MemTracker::new(Config::default().with_level(TrackingLevel::Detail));
//! let stack = NativeStack::new(&[0x4000_1000, 0x4000_2000]);
//!
//! tracker.record_virtual_memory_reserve(0x10_0000, 0x10_0000, &stack, MemTag::Gc).unwrap();
//! tracker.record_virtual_memory_commit(0x10_0000, 0x1000, &stack).unwrap();
//!
//! let summary = tracker.virtual_memory_summary();
//! assert_eq!(summary[MemTag::Gc].committed, 0x1000);
//!
//! let mut report = Vec::new();
//! tracker.report(&mut report).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

mod config;
mod error;
pub mod memory_file;
pub mod report;
mod snapshot;
mod stack;
mod tracker;
mod virtual_memory;

pub use config::{Config, ConfigError, TrackingLevel};
pub use error::TrackerError;
pub use memory_file::{FileId, MemoryFile, MemoryFileTracker};
pub use snapshot::{MemorySnapshot, TagTotals};
pub use stack::{CallStackStorage, NativeStack, MAX_FRAMES};
pub use tracker::MemTracker;
pub use virtual_memory::VirtualMemory;

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
