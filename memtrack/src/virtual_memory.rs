//! The process address space.

use log::debug;
use vma_tree::{
    MemTag, NodeArena, Position, RegionData, StackIndex, SummaryDiff, TreeError, VmaTree,
};

use crate::{Config, MemorySnapshot};

/// Builds an empty tree honouring the configured seed and node bound.
pub(crate) fn new_tree(config: &Config) -> VmaTree {
    let nodes = match config.node_capacity {
        Some(capacity) => NodeArena::bounded(capacity),
        None => NodeArena::new(),
    };
    VmaTree::with_allocator(nodes, config.seed)
}

/// Reserved and committed regions of the address space, with running totals.
pub struct VirtualMemory {
    tree: VmaTree,
    snapshot: MemorySnapshot,
}

impl VirtualMemory {
    pub fn new(config: &Config) -> Self {
        Self {
            tree: new_tree(config),
            snapshot: MemorySnapshot::new(),
        }
    }

    pub fn tree(&self) -> &VmaTree {
        &self.tree
    }

    pub fn snapshot(&self) -> &MemorySnapshot {
        &self.snapshot
    }

    fn apply(&mut self, diff: SummaryDiff) -> SummaryDiff {
        self.snapshot.apply(&diff);
        diff
    }

    pub fn add_reserved_region(
        &mut self,
        base: Position,
        size: usize,
        stack: StackIndex,
        tag: MemTag,
    ) -> Result<SummaryDiff, TreeError> {
        debug!("reserve - base: {base:#x}, size: {size:#x}, tag: {tag:?}");
        let diff = self
            .tree
            .reserve_mapping(base, size, RegionData::new(stack, tag))?;
        Ok(self.apply(diff))
    }

    /// Commits inside an existing reservation, which supplies the tag.
    pub fn add_committed_region(
        &mut self,
        base: Position,
        size: usize,
        stack: StackIndex,
    ) -> Result<SummaryDiff, TreeError> {
        debug!("commit - base: {base:#x}, size: {size:#x}");
        let diff = self.tree.commit_mapping(
            base,
            size,
            RegionData::new(stack, MemTag::None),
            true,
        )?;
        Ok(self.apply(diff))
    }

    pub fn remove_uncommitted_region(
        &mut self,
        base: Position,
        size: usize,
    ) -> Result<SummaryDiff, TreeError> {
        debug!("uncommit - base: {base:#x}, size: {size:#x}");
        let diff = self.tree.uncommit_mapping(base, size, RegionData::EMPTY)?;
        Ok(self.apply(diff))
    }

    pub fn remove_released_region(
        &mut self,
        base: Position,
        size: usize,
    ) -> Result<SummaryDiff, TreeError> {
        debug!("release - base: {base:#x}, size: {size:#x}");
        let diff = self.tree.release_mapping(base, size)?;
        Ok(self.apply(diff))
    }

    pub fn set_tag(
        &mut self,
        base: Position,
        size: usize,
        tag: MemTag,
    ) -> Result<SummaryDiff, TreeError> {
        debug!("set tag - base: {base:#x}, size: {size:#x}, tag: {tag:?}");
        let diff = self.tree.set_tag(base, size, tag)?;
        Ok(self.apply(diff))
    }
}
