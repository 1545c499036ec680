//! Memory backed by named devices or files, each with its own offset space.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use vma_tree::{MemTag, Position, RegionData, StackIndex, VmaTree};

use crate::virtual_memory::new_tree;
use crate::{Config, MemorySnapshot, TrackerError};

/// Handle of a tracked memory file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One device. Offsets are relative to the start of the device.
pub struct MemoryFile {
    id: FileId,
    name: String,
    tree: VmaTree,
    snapshot: MemorySnapshot,
}

impl MemoryFile {
    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &VmaTree {
        &self.tree
    }

    pub fn snapshot(&self) -> &MemorySnapshot {
        &self.snapshot
    }
}

pub struct MemoryFileTracker {
    config: Config,
    next_id: u32,
    files: BTreeMap<FileId, MemoryFile>,
}

impl MemoryFileTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            next_id: 0,
            files: BTreeMap::new(),
        }
    }

    pub fn make_file(&mut self, name: &str) -> FileId {
        // Ids wrap around; skip any that are still in use.
        let mut id = FileId(self.next_id);
        while self.files.contains_key(&id) {
            id = FileId(id.0.wrapping_add(1));
        }
        self.next_id = id.0.wrapping_add(1);
        debug!("make file {id} - name: {name}");
        self.files.insert(
            id,
            MemoryFile {
                id,
                name: name.to_owned(),
                tree: new_tree(&self.config),
                snapshot: MemorySnapshot::new(),
            },
        );
        id
    }

    /// Forgets a file together with everything still allocated in it.
    pub fn free_file(&mut self, id: FileId) -> Result<MemoryFile, TrackerError> {
        debug!("free file {id}");
        self.files.remove(&id).ok_or(TrackerError::UnknownFile(id))
    }

    fn file_mut(&mut self, id: FileId) -> Result<&mut MemoryFile, TrackerError> {
        self.files.get_mut(&id).ok_or(TrackerError::UnknownFile(id))
    }

    pub fn allocate_memory(
        &mut self,
        id: FileId,
        offset: Position,
        size: usize,
        stack: StackIndex,
        tag: MemTag,
    ) -> Result<(), TrackerError> {
        debug!("file {id} alloc - offset: {offset:#x}, size: {size:#x}, tag: {tag:?}");
        let file = self.file_mut(id)?;
        let diff = file
            .tree
            .commit_mapping(offset, size, RegionData::new(stack, tag), false)?;
        file.snapshot.apply(&diff);
        Ok(())
    }

    pub fn free_memory(
        &mut self,
        id: FileId,
        offset: Position,
        size: usize,
    ) -> Result<(), TrackerError> {
        debug!("file {id} free - offset: {offset:#x}, size: {size:#x}");
        let file = self.file_mut(id)?;
        let diff = file.tree.release_mapping(offset, size)?;
        file.snapshot.apply(&diff);
        Ok(())
    }

    pub fn file(&self, id: FileId) -> Option<&MemoryFile> {
        self.files.get(&id)
    }

    /// Live files in id order.
    pub fn files(&self) -> impl Iterator<Item = &MemoryFile> + '_ {
        self.files.values()
    }

    /// Totals over every live file.
    pub fn summary(&self) -> MemorySnapshot {
        let mut total = MemorySnapshot::new();
        for file in self.files.values() {
            total.merge(&file.snapshot);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TagTotals;

    fn tracker() -> MemoryFileTracker {
        crate::init_test_logging();
        MemoryFileTracker::new(&Config::default())
    }

    #[test]
    fn test_files_are_independent() {
        let mut files = tracker();
        let a = files.make_file("heap-a");
        let b = files.make_file("heap-b");

        files
            .allocate_memory(a, 0, 1024, StackIndex::INVALID, MemTag::JavaHeap)
            .unwrap();
        files
            .allocate_memory(b, 0, 512, StackIndex::INVALID, MemTag::JavaHeap)
            .unwrap();
        files.free_memory(a, 0, 256).unwrap();

        let a_file = files.file(a).unwrap();
        assert_eq!(a_file.name(), "heap-a");
        assert_eq!(a_file.snapshot()[MemTag::JavaHeap].committed, 768);
        assert_eq!(
            files.summary()[MemTag::JavaHeap],
            TagTotals {
                reserved: 1280,
                committed: 1280
            }
        );
        let names: Vec<&str> = files.files().map(MemoryFile::name).collect();
        assert_eq!(names, vec!["heap-a", "heap-b"]);
    }

    #[test]
    fn test_wrapped_ids_skip_live_files() {
        let mut files = tracker();
        let first = files.make_file("first");
        files
            .allocate_memory(first, 0, 4096, StackIndex::INVALID, MemTag::Gc)
            .unwrap();

        files.next_id = u32::MAX;
        let last = files.make_file("last");
        assert_eq!(last, FileId(u32::MAX));

        // Wraps to 0, which is still taken.
        let wrapped = files.make_file("wrapped");
        assert_eq!(wrapped, FileId(1));
        assert_ne!(wrapped, first);

        let kept = files.file(first).unwrap();
        assert_eq!(kept.name(), "first");
        assert_eq!(kept.snapshot()[MemTag::Gc].committed, 4096);
        assert_eq!(files.files().count(), 3);
    }

    #[test]
    fn test_free_file_drops_its_memory() {
        let mut files = tracker();
        let a = files.make_file("dev");
        files
            .allocate_memory(a, 4096, 4096, StackIndex::INVALID, MemTag::Gc)
            .unwrap();

        let freed = files.free_file(a).unwrap();
        assert_eq!(freed.id(), a);
        assert!(files.summary()[MemTag::Gc].is_empty());
        assert_eq!(
            files.free_memory(a, 0, 1),
            Err(TrackerError::UnknownFile(a))
        );
        assert!(matches!(
            files.free_file(a),
            Err(TrackerError::UnknownFile(_))
        ));
    }
}
