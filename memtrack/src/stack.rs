//! Call stacks and their interning.

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;
use vma_tree::StackIndex;

use crate::TrackingLevel;

/// Frames kept per stack; deeper stacks are truncated.
pub const MAX_FRAMES: usize = 4;

/// Return addresses of a native call stack, innermost first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NativeStack {
    frames: SmallVec<[usize; MAX_FRAMES]>,
}

impl NativeStack {
    /// Takes up to [`MAX_FRAMES`] frames, stopping at the first null one.
    pub fn new(frames: &[usize]) -> Self {
        Self {
            frames: frames
                .iter()
                .copied()
                .take_while(|&pc| pc != 0)
                .take(MAX_FRAMES)
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[usize] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for NativeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pc in &self.frames {
            writeln!(f, "[{pc:#018x}]")?;
        }
        Ok(())
    }
}

/// Deduplicating store handing out [`StackIndex`] handles.
///
/// Only `Detail` tracking keeps stacks; at any other level every push
/// returns [`StackIndex::INVALID`].
#[derive(Debug)]
pub struct CallStackStorage {
    keep: bool,
    stacks: Vec<NativeStack>,
    index: HashMap<NativeStack, StackIndex>,
}

impl CallStackStorage {
    pub fn new(level: TrackingLevel) -> Self {
        Self {
            keep: level == TrackingLevel::Detail,
            stacks: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn push(&mut self, stack: &NativeStack) -> StackIndex {
        if !self.keep || stack.is_empty() {
            return StackIndex::INVALID;
        }
        if let Some(&idx) = self.index.get(stack) {
            return idx;
        }
        // INVALID is u32::MAX, so the last usable index is one below it.
        let Ok(raw) = u32::try_from(self.stacks.len()) else {
            return StackIndex::INVALID;
        };
        if raw == u32::MAX {
            return StackIndex::INVALID;
        }
        let idx = StackIndex::new(raw);
        self.stacks.push(stack.clone());
        self.index.insert(stack.clone(), idx);
        idx
    }

    pub fn get(&self, idx: StackIndex) -> Option<&NativeStack> {
        if !idx.is_valid() {
            return None;
        }
        self.stacks.get(idx.get() as usize)
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}
