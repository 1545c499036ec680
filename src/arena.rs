//! Node storage for the treap.
//!
//! Nodes never hold pointers to each other; they hold [`NodeId`] handles into
//! a [`NodeAllocator`]. A handle stays valid until the node is freed, no
//! matter how the backing storage grows, which is all the treap needs for its
//! child links.

use crate::TreeError;

/// Stable handle of a live node inside a [`NodeAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocation strategy for tree nodes.
///
/// Implementations must keep handles stable: a `NodeId` returned by
/// [`allocate`](NodeAllocator::allocate) refers to the same node until it is
/// passed to [`free`](NodeAllocator::free).
pub trait NodeAllocator<N> {
    /// Stores `node` and returns its handle.
    fn allocate(&mut self, node: N) -> Result<NodeId, TreeError>;

    /// Removes the node behind `id` and hands it back.
    ///
    /// Panics if `id` is not live.
    fn free(&mut self, id: NodeId) -> N;

    /// Panics if `id` is not live.
    fn get(&self, id: NodeId) -> &N;

    /// Panics if `id` is not live.
    fn get_mut(&mut self, id: NodeId) -> &mut N;

    /// Guarantees that the next `additional` calls to `allocate` succeed.
    fn reserve(&mut self, additional: usize) -> Result<(), TreeError>;

    /// Number of live nodes.
    fn live(&self) -> usize;

    /// Bytes held by the allocator, live or not.
    fn memory_usage(&self) -> usize;
}

/// Slot arena with a free list.
///
/// Freed slots are recycled before the arena grows. A bounded arena
/// preallocates its capacity once and fails with [`TreeError::OutOfNodes`]
/// instead of growing, which suits callers that must not reallocate while
/// tracking memory.
#[derive(Clone, Debug)]
pub struct NodeArena<N> {
    slots: Vec<Option<N>>,
    free: Vec<u32>,
    live: usize,
    limit: Option<usize>,
}

impl<N> NodeArena<N> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            limit: None,
        }
    }

    /// Arena that holds at most `capacity` nodes and never grows past it.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            live: 0,
            limit: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.limit
    }

    /// Slots that can be handed out without touching the global allocator.
    fn headroom(&self) -> usize {
        let unused = match self.limit {
            Some(limit) => limit - self.slots.len(),
            None => self.slots.capacity() - self.slots.len(),
        };
        self.free.len() + unused
    }

    fn out_of_nodes(&self) -> TreeError {
        TreeError::OutOfNodes {
            capacity: self.limit.unwrap_or(u32::MAX as usize),
        }
    }
}

impl<N> Default for NodeArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> NodeAllocator<N> for NodeArena<N> {
    fn allocate(&mut self, node: N) -> Result<NodeId, TreeError> {
        if let Some(idx) = self.free.pop() {
            debug_assert!(self.slots[idx as usize].is_none());
            self.slots[idx as usize] = Some(node);
            self.live += 1;
            return Ok(NodeId(idx));
        }

        let idx = self.slots.len();
        if self.limit.is_some_and(|limit| idx >= limit) || idx >= u32::MAX as usize {
            return Err(self.out_of_nodes());
        }
        self.slots.try_reserve(1)?;
        self.slots.push(Some(node));
        self.live += 1;
        Ok(NodeId(idx as u32))
    }

    fn free(&mut self, id: NodeId) -> N {
        let node = self.slots[id.index()]
            .take()
            .unwrap_or_else(|| panic!("double free of node {id:?}"));
        self.free.push(id.0);
        self.live -= 1;
        node
    }

    #[inline]
    fn get(&self, id: NodeId) -> &N {
        match &self.slots[id.index()] {
            Some(node) => node,
            None => panic!("dangling node handle {id:?}"),
        }
    }

    #[inline]
    fn get_mut(&mut self, id: NodeId) -> &mut N {
        match &mut self.slots[id.index()] {
            Some(node) => node,
            None => panic!("dangling node handle {id:?}"),
        }
    }

    fn reserve(&mut self, additional: usize) -> Result<(), TreeError> {
        let headroom = self.headroom();
        if headroom >= additional {
            return Ok(());
        }
        if self.limit.is_some() {
            return Err(self.out_of_nodes());
        }
        let missing = additional - headroom;
        self.slots.try_reserve(self.slots.capacity() - self.slots.len() + missing)?;
        // Keep `free` large enough that freeing never reallocates.
        self.free.try_reserve(self.slots.capacity() - self.free.len())?;
        Ok(())
    }

    #[inline]
    fn live(&self) -> usize {
        self.live
    }

    fn memory_usage(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Option<N>>()
            + self.free.capacity() * std::mem::size_of::<u32>()
    }
}
