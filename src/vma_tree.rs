//! Address-interval overlay on top of the treap.
//!
//! Every key is a transition point: the address where the memory state
//! changes. Its value records the state of the bytes just below it
//! (`incoming`) and from it upwards (`outgoing`). Two adjacent keys therefore
//! delimit one interval whose state is the left key's `outgoing`, and
//! everything outside the first and last key is released.
//!
//! The tree is kept minimal: a point whose `incoming` equals its `outgoing`
//! never survives a mutation, so the number of nodes follows the number of
//! distinct regions rather than the number of operations.

use std::ops::Bound;

use log::{trace, warn};

use crate::arena::{NodeAllocator, NodeArena};
use crate::treap::{OrdComparator, Treap, TreapNode};
use crate::{MemTag, Position, SummaryDiff, TreeError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum StateType {
    #[default]
    Released,
    Reserved,
    Committed,
}

impl StateType {
    pub fn name(self) -> &'static str {
        match self {
            StateType::Released => "released",
            StateType::Reserved => "reserved",
            StateType::Committed => "committed",
        }
    }
}

/// Opaque handle of an interned call stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackIndex(u32);

impl StackIndex {
    pub const INVALID: StackIndex = StackIndex(u32::MAX);

    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for StackIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Attribution attached to a reserved or committed interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RegionData {
    pub stack: StackIndex,
    pub tag: MemTag,
}

impl RegionData {
    pub const EMPTY: RegionData = RegionData {
        stack: StackIndex::INVALID,
        tag: MemTag::None,
    };

    pub const fn new(stack: StackIndex, tag: MemTag) -> Self {
        Self { stack, tag }
    }
}

/// State of an interval together with its attribution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IntervalState {
    pub state: StateType,
    pub data: RegionData,
}

impl IntervalState {
    pub const RELEASED: IntervalState = IntervalState {
        state: StateType::Released,
        data: RegionData::EMPTY,
    };

    /// Released memory carries no attribution, whatever `data` says.
    pub fn new(state: StateType, data: RegionData) -> Self {
        match state {
            StateType::Released => Self::RELEASED,
            _ => Self { state, data },
        }
    }
}

/// Value stored at each transition point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalChange {
    pub incoming: IntervalState,
    pub outgoing: IntervalState,
}

impl IntervalChange {
    /// A point that does not change anything and must not be stored.
    pub fn is_noop(&self) -> bool {
        self.incoming == self.outgoing
    }
}

/// One interval `[start, end)` reconstructed from two adjacent points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: Position,
    pub end: Position,
    pub state: IntervalState,
}

impl Region {
    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

pub type VmaNode = TreapNode<Position, IntervalChange>;

/// End of `[from, from + size)`. Sizes must also fit the signed diff.
fn end_of(from: Position, size: usize) -> Result<Position, TreeError> {
    if i64::try_from(size).is_err() {
        return Err(TreeError::RangeOverflow(from, size));
    }
    from.checked_add(size)
        .ok_or(TreeError::RangeOverflow(from, size))
}

/// Adds `sign * size` bytes in `state` to `diff`.
fn account(diff: &mut SummaryDiff, state: IntervalState, size: usize, sign: i64) {
    let bytes = size as i64 * sign;
    let slot = &mut diff[state.data.tag];
    match state.state {
        StateType::Released => {}
        StateType::Reserved => slot.reserve += bytes,
        StateType::Committed => {
            slot.reserve += bytes;
            slot.commit += bytes;
        }
    }
}

/// Reservation and commit state of an address space.
pub struct VmaTree<A = NodeArena<VmaNode>>
where
    A: NodeAllocator<VmaNode>,
{
    tree: Treap<Position, IntervalChange, OrdComparator, A>,
}

impl VmaTree {
    pub fn new() -> Self {
        Self {
            tree: Treap::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            tree: Treap::with_seed(seed),
        }
    }
}

impl Default for VmaTree {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> VmaTree<A>
where
    A: NodeAllocator<VmaNode>,
{
    pub fn with_allocator(nodes: A, seed: u64) -> Self {
        Self {
            tree: Treap::with_allocator_and_seed(nodes, seed),
        }
    }

    /// Number of transition points.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.tree.memory_usage()
    }

    /// State of the byte at `pos`.
    pub fn state_at(&self, pos: Position) -> IntervalState {
        self.tree
            .closest_leq(&pos)
            .map_or(IntervalState::RELEASED, |(_, change)| change.outgoing)
    }

    /// Marks `[from, from + size)` reserved.
    pub fn reserve_mapping(
        &mut self,
        from: Position,
        size: usize,
        metadata: RegionData,
    ) -> Result<SummaryDiff, TreeError> {
        let to = end_of(from, size)?;
        self.register_mapping(from, to, StateType::Reserved, metadata, false)
    }

    /// Marks `[from, from + size)` committed.
    ///
    /// With `use_tag_inplace` the committed range keeps the tag of the
    /// reservation it lands in, found at `from`.
    pub fn commit_mapping(
        &mut self,
        from: Position,
        size: usize,
        metadata: RegionData,
        use_tag_inplace: bool,
    ) -> Result<SummaryDiff, TreeError> {
        let to = end_of(from, size)?;
        self.register_mapping(from, to, StateType::Committed, metadata, use_tag_inplace)
    }

    /// Turns `[from, from + size)` back into reserved memory, keeping its tag.
    pub fn uncommit_mapping(
        &mut self,
        from: Position,
        size: usize,
        metadata: RegionData,
    ) -> Result<SummaryDiff, TreeError> {
        let to = end_of(from, size)?;
        self.register_mapping(from, to, StateType::Reserved, metadata, true)
    }

    pub fn release_mapping(&mut self, from: Position, size: usize) -> Result<SummaryDiff, TreeError> {
        let to = end_of(from, size)?;
        self.register_mapping(from, to, StateType::Released, RegionData::EMPTY, false)
    }

    /// Re-tags every reserved or committed part of `[from, from + size)`.
    ///
    /// State and stacks are left as they are; released gaps stay released.
    /// Each sub-range is applied atomically, so an allocation failure part way
    /// leaves a consistent tree with a prefix of the range re-tagged.
    pub fn set_tag(&mut self, from: Position, size: usize, tag: MemTag) -> Result<SummaryDiff, TreeError> {
        let to = end_of(from, size)?;
        let mut targets: Vec<Region> = Vec::new();
        self.visit_range_regions(from, to, |region| {
            if region.state.state != StateType::Released && region.state.data.tag != tag {
                targets.push(*region);
            }
        });

        let mut diff = SummaryDiff::new();
        for region in targets {
            let data = RegionData::new(region.state.data.stack, tag);
            let d = self.register_mapping(region.start, region.end, region.state.state, data, false)?;
            diff.add(&d);
        }
        Ok(diff)
    }

    /// Applies `state` to `[from, to)` and returns the accounting change.
    fn register_mapping(
        &mut self,
        from: Position,
        to: Position,
        state: StateType,
        metadata: RegionData,
        use_tag_inplace: bool,
    ) -> Result<SummaryDiff, TreeError> {
        if from == to {
            return Ok(SummaryDiff::new());
        }
        trace!(
            "register {} [{from:#x}, {to:#x}) tag={:?} stack={:?}",
            state.name(),
            metadata.tag,
            metadata.stack
        );

        let mut new_state = IntervalState::new(state, metadata);
        let leq_from = self.tree.closest_leq(&from).map(|(k, v)| (*k, *v));

        if use_tag_inplace {
            match leq_from {
                Some((_, change)) if change.outgoing.state != StateType::Released => {
                    new_state.data.tag = change.outgoing.data.tag;
                }
                _ => warn!(
                    "no reservation at {from:#x} to take the tag from, using {:?}",
                    new_state.data.tag
                ),
            }
        }

        // A point at `from` inherits what was in effect just below it; the
        // point at `to` hands back to what was in effect at `to`.
        let from_exists = matches!(leq_from, Some((key, _)) if key == from);
        let st_from = IntervalChange {
            incoming: match leq_from {
                Some((key, change)) if key == from => change.incoming,
                Some((_, change)) => change.outgoing,
                None => IntervalState::RELEASED,
            },
            outgoing: new_state,
        };
        let old_to = self.tree.get(&to).copied();
        let st_to = IntervalChange {
            incoming: new_state,
            outgoing: self.state_at(to),
        };

        // Reserve exactly the points this call inserts, so that a failure
        // happens before anything changes.
        let needed = usize::from(!from_exists && !st_from.is_noop())
            + usize::from(old_to.is_none() && !st_to.is_noop());
        self.tree.reserve(needed)?;

        if from_exists && st_from.is_noop() {
            self.tree.remove(&from);
        } else if !st_from.is_noop() {
            self.tree.upsert(from, st_from)?;
        }

        let mut inside: Vec<(Position, IntervalChange)> = Vec::new();
        self.tree
            .visit_range_in_order((Bound::Excluded(from), Bound::Excluded(to)), |key, change| {
                inside.push((*key, *change));
            });

        match old_to {
            Some(old) if st_to.is_noop() => inside.push((to, old)),
            _ if !st_to.is_noop() => {
                self.tree.upsert(to, st_to)?;
            }
            _ => {}
        }

        let mut diff = SummaryDiff::new();
        if inside.is_empty() {
            // A hole punched into, or a full overwrite of, the region at `from`.
            if let Some((_, change)) = leq_from {
                account(&mut diff, change.outgoing, to - from, -1);
            }
        }

        let mut prev_pos = from;
        let mut prev_out = st_from.outgoing;
        for (key, change) in &inside {
            self.tree.remove(key);
            account(&mut diff, change.incoming, key - prev_pos, -1);
            prev_pos = *key;
            prev_out = change.outgoing;
        }
        if prev_pos != from {
            // The last removed point's state ran on up to `to`.
            account(&mut diff, prev_out, to - prev_pos, -1);
        }

        account(&mut diff, new_state, to - from, 1);
        Ok(diff)
    }

    /// Calls `f` for every transition point in address order.
    pub fn visit_in_order<F>(&self, mut f: F)
    where
        F: FnMut(Position, &IntervalChange),
    {
        self.tree.visit_in_order(|key, change| f(*key, change));
    }

    /// Calls `f` for every interval between two adjacent transition points,
    /// released gaps included.
    pub fn visit_regions<F>(&self, mut f: F)
    where
        F: FnMut(&Region),
    {
        let mut prev: Option<(Position, IntervalState)> = None;
        self.tree.visit_in_order(|key, change| {
            if let Some((start, state)) = prev {
                f(&Region {
                    start,
                    end: *key,
                    state,
                });
            }
            prev = Some((*key, change.outgoing));
        });
    }

    /// Calls `f` for the intervals covering `[from, to)`, clipped to it.
    pub fn visit_range_regions<F>(&self, from: Position, to: Position, mut f: F)
    where
        F: FnMut(&Region),
    {
        if from >= to {
            return;
        }
        let mut start = from;
        let mut state = self.state_at(from);
        self.tree
            .visit_range_in_order((Bound::Excluded(from), Bound::Excluded(to)), |key, change| {
                f(&Region {
                    start,
                    end: *key,
                    state,
                });
                start = *key;
                state = change.outgoing;
            });
        f(&Region {
            start,
            end: to,
            state,
        });
    }

    /// Verifies the treap and the transition chain. Panics on violation.
    pub fn verify_self(&self) {
        self.tree.verify_self();

        let mut prev_out = IntervalState::RELEASED;
        self.tree.visit_in_order(|key, change| {
            assert!(!change.is_noop(), "redundant transition point at {key:#x}");
            assert_eq!(
                change.incoming, prev_out,
                "state chain broken at {key:#x}"
            );
            for side in [change.incoming, change.outgoing] {
                if side.state == StateType::Released {
                    assert_eq!(side, IntervalState::RELEASED, "attributed released memory at {key:#x}");
                }
            }
            prev_out = change.outgoing;
        });
        assert_eq!(
            prev_out,
            IntervalState::RELEASED,
            "address space must end released"
        );
    }
}

impl<A> std::fmt::Debug for VmaTree<A>
where
    A: NodeAllocator<VmaNode>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        self.visit_regions(|region| {
            if region.state.state != StateType::Released {
                list.entry(region);
            }
        });
        list.finish()
    }
}
