//! Randomized ordered map built on `split`/`merge`.
//!
//! Keys are ordered by a [`Comparator`], priorities form a max-heap and come
//! from a seeded linear congruential generator, so a given seed and operation
//! sequence always produces the same shape. There are no rotations: insertion
//! and removal are expressed purely through `split` and `merge`.
//!
//! `split`, `merge` and `find` recurse. Their expected depth is logarithmic,
//! so each carries a depth counter and panics past [`MAX_RECURSION_DEPTH`]:
//! a deeper tree means the priority invariant is broken. Teardown and
//! verification never recurse.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};

use crate::arena::{NodeAllocator, NodeArena, NodeId};
use crate::TreeError;

/// Recursion depth at which `split`, `merge` and `find` give up.
pub const MAX_RECURSION_DEPTH: usize = 200;

/// Seed used by [`Treap::new`].
pub const DEFAULT_SEED: u64 = 1234567;

const PRNG_MULT: u64 = 0x5DEECE66D;
const PRNG_ADD: u64 = 0xB;
const PRNG_MOD_MASK: u64 = (1 << 48) - 1;

#[inline]
fn lcg_next(seed: u64) -> u64 {
    PRNG_MULT.wrapping_mul(seed).wrapping_add(PRNG_ADD) & PRNG_MOD_MASK
}

// =============================================================================
// Comparator
// =============================================================================

/// Three-way ordering over keys. Must be a strict total order.
pub trait Comparator<K: ?Sized> {
    fn cmp(a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrdComparator;

impl<K: Ord + ?Sized> Comparator<K> for OrdComparator {
    #[inline]
    fn cmp(a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Which side keys equal to the split key end up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SplitMode {
    /// Left gets keys `< key`.
    Lt,
    /// Left gets keys `<= key`.
    Leq,
}

pub struct TreapNode<K, V> {
    key: K,
    value: V,
    priority: u64,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

impl<K, V> TreapNode<K, V> {
    fn new(key: K, value: V, priority: u64) -> Self {
        Self {
            key,
            value,
            priority,
            left: None,
            right: None,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn priority(&self) -> u64 {
        self.priority
    }
}

// =============================================================================
// Treap
// =============================================================================

/// Ordered map with one value per key.
pub struct Treap<K, V, C = OrdComparator, A = NodeArena<TreapNode<K, V>>>
where
    A: NodeAllocator<TreapNode<K, V>>,
{
    root: Option<NodeId>,
    nodes: A,
    prng_seed: u64,
    node_count: usize,
    _marker: PhantomData<fn() -> (K, V, C)>,
}

impl<K, V> Treap<K, V> {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_allocator_and_seed(NodeArena::new(), seed)
    }
}

impl<K, V> Default for Treap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C, A> Treap<K, V, C, A>
where
    A: NodeAllocator<TreapNode<K, V>>,
{
    pub fn with_allocator(nodes: A) -> Self {
        Self::with_allocator_and_seed(nodes, DEFAULT_SEED)
    }

    pub fn with_allocator_and_seed(nodes: A, seed: u64) -> Self {
        Self {
            root: None,
            nodes,
            prng_seed: seed & PRNG_MOD_MASK,
            node_count: 0,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.node_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }

    pub fn allocator(&self) -> &A {
        &self.nodes
    }

    pub fn memory_usage(&self) -> usize {
        self.nodes.memory_usage()
    }

    /// Makes sure the next `additional` insertions cannot fail to allocate.
    pub fn reserve(&mut self, additional: usize) -> Result<(), TreeError> {
        self.nodes.reserve(additional)
    }

    /// Destroys every node.
    ///
    /// Uses an explicit work stack: the tree being torn down may be corrupted,
    /// so its depth is not trusted.
    pub fn remove_all(&mut self) {
        let mut stack: Vec<NodeId> = Vec::new();
        stack.extend(self.root.take());
        while let Some(id) = stack.pop() {
            let node = self.nodes.free(id);
            stack.extend(node.left);
            stack.extend(node.right);
        }
        self.node_count = 0;
    }

    pub fn iter(&self) -> Iter<'_, K, V, A> {
        let mut iter = Iter {
            nodes: &self.nodes,
            stack: Vec::new(),
            _marker: PhantomData,
        };
        iter.push_left_spine(self.root);
        iter
    }

    /// Calls `f` for every entry in ascending key order.
    pub fn visit_in_order<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (key, value) in self.iter() {
            f(key, value);
        }
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn height(&self) -> usize {
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        stack.extend(self.root.map(|root| (root, 1)));
        let mut height = 0;
        while let Some((id, depth)) = stack.pop() {
            height = height.max(depth);
            let node = self.nodes.get(id);
            for child in [node.left, node.right].into_iter().flatten() {
                stack.push((child, depth + 1));
            }
        }
        height
    }

    /// Upper bound on [`height`](Self::height) checked by `verify_self`.
    ///
    /// A random treap of `n` nodes has height close to `4.3 * ln(n)`; the
    /// bound is `3 * log2(n + 1)` plus a small constant for tiny trees.
    pub fn max_expected_height(n: usize) -> usize {
        (3.0 * ((n + 1) as f64).log2()).ceil() as usize + 3
    }
}

impl<K, V, C, A> Treap<K, V, C, A>
where
    C: Comparator<K>,
    A: NodeAllocator<TreapNode<K, V>>,
{
    fn next_priority(&self) -> u64 {
        lcg_next(self.prng_seed)
    }

    /// Splits the subtree at `head` around `key`.
    ///
    /// Returns `(left, right)` where `left` holds the keys that satisfy
    /// `mode` with respect to `key`.
    pub(crate) fn split(
        &mut self,
        head: Option<NodeId>,
        key: &K,
        mode: SplitMode,
        depth: usize,
    ) -> (Option<NodeId>, Option<NodeId>) {
        assert!(
            depth < MAX_RECURSION_DEPTH,
            "treap split exceeded recursion depth {MAX_RECURSION_DEPTH}"
        );
        let Some(head) = head else {
            return (None, None);
        };

        let node = self.nodes.get(head);
        let ord = C::cmp(&node.key, key);
        let (head_left, head_right) = (node.left, node.right);
        let goes_left = match mode {
            SplitMode::Leq => ord != Ordering::Greater,
            SplitMode::Lt => ord == Ordering::Less,
        };

        if goes_left {
            let (left, right) = self.split(head_right, key, mode, depth + 1);
            self.nodes.get_mut(head).right = left;
            (Some(head), right)
        } else {
            let (left, right) = self.split(head_left, key, mode, depth + 1);
            self.nodes.get_mut(head).left = right;
            (left, Some(head))
        }
    }

    /// Joins two subtrees. Every key in `left` must be `<=` every key in
    /// `right`.
    pub(crate) fn merge(
        &mut self,
        left: Option<NodeId>,
        right: Option<NodeId>,
        depth: usize,
    ) -> Option<NodeId> {
        assert!(
            depth < MAX_RECURSION_DEPTH,
            "treap merge exceeded recursion depth {MAX_RECURSION_DEPTH}"
        );
        let (left, right) = match (left, right) {
            (None, right) => return right,
            (left, None) => return left,
            (Some(left), Some(right)) => (left, right),
        };

        let l = self.nodes.get(left);
        let r = self.nodes.get(right);
        let (left_right, right_left) = (l.right, r.left);
        if l.priority > r.priority {
            let merged = self.merge(left_right, Some(right), depth + 1);
            self.nodes.get_mut(left).right = merged;
            Some(left)
        } else {
            let merged = self.merge(Some(left), right_left, depth + 1);
            self.nodes.get_mut(right).left = merged;
            Some(right)
        }
    }

    fn find(&self, node: Option<NodeId>, key: &K, depth: usize) -> Option<NodeId> {
        assert!(
            depth < MAX_RECURSION_DEPTH,
            "treap find exceeded recursion depth {MAX_RECURSION_DEPTH}"
        );
        let id = node?;
        let node = self.nodes.get(id);
        match C::cmp(&node.key, key) {
            Ordering::Equal => Some(id),
            Ordering::Less => self.find(node.right, key, depth + 1),
            Ordering::Greater => self.find(node.left, key, depth + 1),
        }
    }

    /// Inserts `key`, or replaces its value if present.
    ///
    /// Returns the replaced value. A failed allocation leaves the tree as it
    /// was.
    pub fn upsert(&mut self, key: K, value: V) -> Result<Option<V>, TreeError> {
        if let Some(found) = self.find(self.root, &key, 0) {
            let old = std::mem::replace(&mut self.nodes.get_mut(found).value, value);
            return Ok(Some(old));
        }

        let root = self.root.take();
        let (left, right) = self.split(root, &key, SplitMode::Leq, 0);
        let priority = self.next_priority();
        let node = match self.nodes.allocate(TreapNode::new(key, value, priority)) {
            Ok(node) => node,
            Err(err) => {
                self.root = self.merge(left, right, 0);
                return Err(err);
            }
        };
        self.prng_seed = priority;
        self.node_count += 1;

        let left = self.merge(left, Some(node), 0);
        self.root = self.merge(left, right, 0);
        Ok(None)
    }

    /// Removes `key` and returns its value. Absent keys are a no-op.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let root = self.root.take();
        let (less, geq) = self.split(root, key, SplitMode::Lt, 0);
        let (equal, greater) = self.split(geq, key, SplitMode::Leq, 0);

        let removed = equal.map(|id| {
            let node = self.nodes.free(id);
            assert!(
                node.left.is_none() && node.right.is_none(),
                "duplicate key in treap"
            );
            self.node_count -= 1;
            node.value
        });

        self.root = self.merge(less, greater, 0);
        removed
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(self.root, key, 0)
            .map(|id| &self.nodes.get(id).value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = self.find(self.root, key, 0)?;
        Some(&mut self.nodes.get_mut(id).value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(self.root, key, 0).is_some()
    }

    fn entry(&self, id: NodeId) -> (&K, &V) {
        let node = self.nodes.get(id);
        (&node.key, &node.value)
    }

    fn closest_leq_node(&self, key: &K) -> Option<NodeId> {
        let mut candidate = None;
        let mut pos = self.root;
        while let Some(id) = pos {
            let node = self.nodes.get(id);
            match C::cmp(&node.key, key) {
                Ordering::Equal => return Some(id),
                Ordering::Less => {
                    candidate = Some(id);
                    pos = node.right;
                }
                Ordering::Greater => pos = node.left,
            }
        }
        candidate
    }

    fn closest_gt_node(&self, key: &K) -> Option<NodeId> {
        let mut candidate = None;
        let mut pos = self.root;
        while let Some(id) = pos {
            let node = self.nodes.get(id);
            if C::cmp(&node.key, key) == Ordering::Greater {
                candidate = Some(id);
                pos = node.left;
            } else {
                pos = node.right;
            }
        }
        candidate
    }

    /// Greatest entry with a key `<= key`.
    pub fn closest_leq(&self, key: &K) -> Option<(&K, &V)> {
        self.closest_leq_node(key).map(|id| self.entry(id))
    }

    /// Smallest entry with a key `> key`.
    pub fn closest_gt(&self, key: &K) -> Option<(&K, &V)> {
        self.closest_gt_node(key).map(|id| self.entry(id))
    }

    /// Smallest entry with a key `>= key`.
    ///
    /// An exact match is found from the LEQ side first; only then does the
    /// search descend towards greater keys.
    pub fn closest_geq(&self, key: &K) -> Option<(&K, &V)> {
        if let Some(id) = self.closest_leq_node(key) {
            if C::cmp(&self.nodes.get(id).key, key) == Ordering::Equal {
                return Some(self.entry(id));
            }
        }
        self.closest_gt(key)
    }

    /// Calls `f` for every entry whose key lies in `range`, in ascending order.
    pub fn visit_range_in_order<R, F>(&self, range: R, mut f: F)
    where
        R: RangeBounds<K>,
        F: FnMut(&K, &V),
    {
        let below_start = |key: &K| match range.start_bound() {
            Bound::Included(start) => C::cmp(key, start) == Ordering::Less,
            Bound::Excluded(start) => C::cmp(key, start) != Ordering::Greater,
            Bound::Unbounded => false,
        };
        let past_end = |key: &K| match range.end_bound() {
            Bound::Included(end) => C::cmp(key, end) == Ordering::Greater,
            Bound::Excluded(end) => C::cmp(key, end) != Ordering::Less,
            Bound::Unbounded => false,
        };

        let mut stack: Vec<NodeId> = Vec::new();
        let mut head = self.root;
        loop {
            if let Some(id) = head {
                let node = self.nodes.get(id);
                if below_start(&node.key) {
                    // The whole left subtree is below the range too.
                    head = node.right;
                } else {
                    stack.push(id);
                    head = node.left;
                }
            } else if let Some(id) = stack.pop() {
                let node = self.nodes.get(id);
                if past_end(&node.key) {
                    break;
                }
                f(&node.key, &node.value);
                head = node.right;
            } else {
                break;
            }
        }
    }

    /// Checks every structural invariant and panics on the first violation.
    ///
    /// - priorities form a max-heap,
    /// - in-order keys are strictly increasing,
    /// - reachable nodes, `len()` and the allocator's live count agree,
    /// - the height stays within [`max_expected_height`](Self::max_expected_height).
    pub fn verify_self(&self) {
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        stack.extend(self.root.map(|root| (root, 1)));
        let mut reachable = 0usize;
        let mut height = 0usize;

        while let Some((id, depth)) = stack.pop() {
            reachable += 1;
            assert!(
                reachable <= self.node_count,
                "more reachable nodes than inserted ({})",
                self.node_count
            );
            height = height.max(depth);

            let node = self.nodes.get(id);
            for child in [node.left, node.right].into_iter().flatten() {
                assert!(
                    self.nodes.get(child).priority <= node.priority,
                    "priority heap invariant violated at depth {depth}"
                );
                stack.push((child, depth + 1));
            }
        }

        assert_eq!(reachable, self.node_count, "unreachable nodes in treap");
        assert_eq!(
            self.nodes.live(),
            self.node_count,
            "allocator live count disagrees with treap"
        );

        let mut prev: Option<&K> = None;
        for (key, _) in self.iter() {
            if let Some(prev) = prev {
                assert_eq!(
                    C::cmp(prev, key),
                    Ordering::Less,
                    "in-order keys must be strictly increasing"
                );
            }
            prev = Some(key);
        }

        let bound = Self::max_expected_height(self.node_count);
        assert!(
            height <= bound,
            "treap height {height} exceeds expected bound {bound} for {} nodes",
            self.node_count
        );
    }
}

impl<K, V, C, A> Drop for Treap<K, V, C, A>
where
    A: NodeAllocator<TreapNode<K, V>>,
{
    fn drop(&mut self) {
        self.remove_all();
    }
}

impl<K, V, C, A> fmt::Debug for Treap<K, V, C, A>
where
    K: fmt::Debug,
    V: fmt::Debug,
    A: NodeAllocator<TreapNode<K, V>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// In-order iterator over a [`Treap`].
pub struct Iter<'a, K, V, A> {
    nodes: &'a A,
    stack: Vec<NodeId>,
    _marker: PhantomData<&'a (K, V)>,
}

impl<'a, K, V, A> Iter<'a, K, V, A>
where
    A: NodeAllocator<TreapNode<K, V>>,
{
    fn push_left_spine(&mut self, mut pos: Option<NodeId>) {
        while let Some(id) = pos {
            self.stack.push(id);
            pos = self.nodes.get(id).left;
        }
    }
}

impl<'a, K, V, A> Iterator for Iter<'a, K, V, A>
where
    K: 'a,
    V: 'a,
    A: NodeAllocator<TreapNode<K, V>>,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let nodes: &'a A = self.nodes;
        let node = nodes.get(id);
        self.push_left_spine(node.right);
        Some((&node.key, &node.value))
    }
}
