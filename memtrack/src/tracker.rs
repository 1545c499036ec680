use std::io::{self, Write};

use log::debug;
use parking_lot::Mutex;
use vma_tree::{MemTag, Position};

use crate::report;
use crate::{
    CallStackStorage, Config, FileId, MemoryFileTracker, MemorySnapshot, NativeStack,
    TrackerError, TrackingLevel, VirtualMemory,
};

struct TrackerState {
    virtual_memory: VirtualMemory,
    files: MemoryFileTracker,
    stacks: CallStackStorage,
}

/// Thread-safe entry point for recording memory operations.
///
/// Every method takes the tracker's lock for its whole duration, so the trees
/// underneath never see concurrent mutation. At [`TrackingLevel::Off`] every
/// method returns immediately without locking.
pub struct MemTracker {
    level: TrackingLevel,
    state: Mutex<TrackerState>,
}

impl MemTracker {
    pub fn new(config: Config) -> Self {
        debug!("memory tracking: {}", config.level);
        Self {
            level: config.level,
            state: Mutex::new(TrackerState {
                virtual_memory: VirtualMemory::new(&config),
                files: MemoryFileTracker::new(&config),
                stacks: CallStackStorage::new(config.level),
            }),
        }
    }

    pub fn level(&self) -> TrackingLevel {
        self.level
    }

    fn enabled(&self) -> bool {
        self.level != TrackingLevel::Off
    }

    pub fn record_virtual_memory_reserve(
        &self,
        base: Position,
        size: usize,
        stack: &NativeStack,
        tag: MemTag,
    ) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let stack = state.stacks.push(stack);
        state
            .virtual_memory
            .add_reserved_region(base, size, stack, tag)?;
        Ok(())
    }

    /// Reserves and commits `[base, base + size)` under one lock.
    pub fn record_virtual_memory_reserve_and_commit(
        &self,
        base: Position,
        size: usize,
        stack: &NativeStack,
        tag: MemTag,
    ) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let stack = state.stacks.push(stack);
        state
            .virtual_memory
            .add_reserved_region(base, size, stack, tag)?;
        state
            .virtual_memory
            .add_committed_region(base, size, stack)?;
        Ok(())
    }

    pub fn record_virtual_memory_commit(
        &self,
        base: Position,
        size: usize,
        stack: &NativeStack,
    ) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let stack = state.stacks.push(stack);
        state
            .virtual_memory
            .add_committed_region(base, size, stack)?;
        Ok(())
    }

    pub fn record_virtual_memory_uncommit(
        &self,
        base: Position,
        size: usize,
    ) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        self.state
            .lock()
            .virtual_memory
            .remove_uncommitted_region(base, size)?;
        Ok(())
    }

    pub fn record_virtual_memory_release(
        &self,
        base: Position,
        size: usize,
    ) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        self.state
            .lock()
            .virtual_memory
            .remove_released_region(base, size)?;
        Ok(())
    }

    pub fn set_memory_tag(&self, base: Position, size: usize, tag: MemTag) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        self.state.lock().virtual_memory.set_tag(base, size, tag)?;
        Ok(())
    }

    /// Starts tracking a device. `None` when tracking is off.
    pub fn make_memory_file(&self, name: &str) -> Option<FileId> {
        if !self.enabled() {
            return None;
        }
        Some(self.state.lock().files.make_file(name))
    }

    pub fn free_memory_file(&self, id: FileId) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        self.state.lock().files.free_file(id).map(drop)
    }

    pub fn allocate_memory_in(
        &self,
        id: FileId,
        offset: Position,
        size: usize,
        stack: &NativeStack,
        tag: MemTag,
    ) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let stack = state.stacks.push(stack);
        state.files.allocate_memory(id, offset, size, stack, tag)
    }

    pub fn free_memory_in(&self, id: FileId, offset: Position, size: usize) -> Result<(), TrackerError> {
        if !self.enabled() {
            return Ok(());
        }
        self.state.lock().files.free_memory(id, offset, size)
    }

    /// Per-tag totals of the address space.
    pub fn virtual_memory_summary(&self) -> MemorySnapshot {
        if !self.enabled() {
            return MemorySnapshot::new();
        }
        *self.state.lock().virtual_memory.snapshot()
    }

    /// Per-tag totals over every memory file.
    pub fn memory_file_summary(&self) -> MemorySnapshot {
        if !self.enabled() {
            return MemorySnapshot::new();
        }
        self.state.lock().files.summary()
    }

    /// Writes the summary report, or the detail report at `Detail` level.
    pub fn report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if !self.enabled() {
            return writeln!(out, "Native memory tracking is not enabled");
        }
        let state = self.state.lock();
        match self.level {
            TrackingLevel::Detail => {
                report::write_detail(out, &state.virtual_memory, &state.files, &state.stacks)
            }
            _ => report::write_summary(out, &state.virtual_memory, &state.files),
        }
    }

    /// Checks every tree the tracker owns. Panics on violation.
    pub fn verify(&self) {
        let state = self.state.lock();
        state.virtual_memory.tree().verify_self();
        for file in state.files.files() {
            file.tree().verify_self();
        }
    }
}

impl Default for MemTracker {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
