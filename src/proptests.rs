use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;
use std::ops::Bound;

fn validate_tree<K, V>(t: &Treap<K, V>)
where
    K: Ord + Copy + std::fmt::Debug,
{
    t.verify_self();
    assert_eq!(
        t.allocator().live(),
        t.len(),
        "allocator must hold exactly the reachable nodes"
    );
    let keys: Vec<K> = t.iter().map(|(k, _)| *k).collect();
    assert!(
        keys.windows(2).all(|w| w[0] < w[1]),
        "iteration must be strictly ascending"
    );
}

#[derive(Clone, Debug)]
enum Op {
    Upsert(u16, u32),
    Remove(u16),
    Get(u16),
    Closest(u16),
}

fn key_strategy() -> impl Strategy<Value = u16> + Clone {
    // A narrow key space so upserts collide and removes hit.
    0u16..512
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        50 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Upsert(k, v)),
        25 => key.clone().prop_map(Op::Remove),
        15 => key.clone().prop_map(Op::Get),
        10 => key.clone().prop_map(Op::Closest),
    ];
    prop::collection::vec(op, 0..=2000)
}

fn pair<'a>(entry: Option<(&'a u16, &'a u32)>) -> Option<(u16, u32)> {
    entry.map(|(k, v)| (*k, *v))
}

// =============================================================================
// VmaTree model
// =============================================================================

/// Addresses covered by the model; ops start below 256 and span at most 63.
const SPACE: usize = 320;

#[derive(Clone, Debug, Arbitrary)]
enum VmaOp {
    Reserve {
        #[proptest(strategy = "0usize..256")]
        from: usize,
        #[proptest(strategy = "0usize..64")]
        size: usize,
        #[proptest(strategy = "0u32..4")]
        stack: u32,
        tag: MemTag,
    },
    Commit {
        #[proptest(strategy = "0usize..256")]
        from: usize,
        #[proptest(strategy = "0usize..64")]
        size: usize,
        #[proptest(strategy = "0u32..4")]
        stack: u32,
        tag: MemTag,
        use_tag_inplace: bool,
    },
    Uncommit {
        #[proptest(strategy = "0usize..256")]
        from: usize,
        #[proptest(strategy = "0usize..64")]
        size: usize,
        #[proptest(strategy = "0u32..4")]
        stack: u32,
        tag: MemTag,
    },
    Release {
        #[proptest(strategy = "0usize..256")]
        from: usize,
        #[proptest(strategy = "0usize..64")]
        size: usize,
    },
    SetTag {
        #[proptest(strategy = "0usize..256")]
        from: usize,
        #[proptest(strategy = "0usize..64")]
        size: usize,
        tag: MemTag,
    },
}

/// State of every address, one entry per byte.
struct Model {
    bytes: Vec<IntervalState>,
}

impl Model {
    fn new() -> Self {
        Self {
            bytes: vec![IntervalState::RELEASED; SPACE],
        }
    }

    fn fill(&mut self, from: usize, size: usize, state: IntervalState) {
        for b in &mut self.bytes[from..from + size] {
            *b = state;
        }
    }

    fn tag_at(&self, from: usize, fallback: MemTag) -> MemTag {
        match self.bytes.get(from) {
            Some(s) if s.state != StateType::Released => s.data.tag,
            _ => fallback,
        }
    }

    fn apply(&mut self, op: &VmaOp) {
        match *op {
            VmaOp::Reserve {
                from,
                size,
                stack,
                tag,
            } => {
                let data = RegionData::new(StackIndex::new(stack), tag);
                self.fill(from, size, IntervalState::new(StateType::Reserved, data));
            }
            VmaOp::Commit {
                from,
                size,
                stack,
                tag,
                use_tag_inplace,
            } => {
                let tag = if use_tag_inplace {
                    self.tag_at(from, tag)
                } else {
                    tag
                };
                let data = RegionData::new(StackIndex::new(stack), tag);
                self.fill(from, size, IntervalState::new(StateType::Committed, data));
            }
            VmaOp::Uncommit {
                from,
                size,
                stack,
                tag,
            } => {
                let data = RegionData::new(StackIndex::new(stack), self.tag_at(from, tag));
                self.fill(from, size, IntervalState::new(StateType::Reserved, data));
            }
            VmaOp::Release { from, size } => {
                self.fill(from, size, IntervalState::RELEASED);
            }
            VmaOp::SetTag { from, size, tag } => {
                for b in &mut self.bytes[from..from + size] {
                    if b.state != StateType::Released {
                        b.data.tag = tag;
                    }
                }
            }
        }
    }

    /// Maximal runs of equal non-released state.
    fn regions(&self) -> Vec<(Position, Position, IntervalState)> {
        let mut out: Vec<(Position, Position, IntervalState)> = Vec::new();
        for (addr, state) in self.bytes.iter().enumerate() {
            if state.state == StateType::Released {
                continue;
            }
            match out.last_mut() {
                Some((_, end, last)) if *end == addr && last == state => *end += 1,
                _ => out.push((addr, addr + 1, *state)),
            }
        }
        out
    }

    fn totals(&self) -> SummaryDiff {
        let mut totals = SummaryDiff::new();
        for state in &self.bytes {
            let slot = &mut totals[state.data.tag];
            match state.state {
                StateType::Released => {}
                StateType::Reserved => slot.reserve += 1,
                StateType::Committed => {
                    slot.reserve += 1;
                    slot.commit += 1;
                }
            }
        }
        totals
    }
}

fn apply_op<A: NodeAllocator<VmaNode>>(
    t: &mut VmaTree<A>,
    op: &VmaOp,
) -> Result<SummaryDiff, TreeError> {
    match *op {
        VmaOp::Reserve {
            from,
            size,
            stack,
            tag,
        } => t.reserve_mapping(from, size, RegionData::new(StackIndex::new(stack), tag)),
        VmaOp::Commit {
            from,
            size,
            stack,
            tag,
            use_tag_inplace,
        } => t.commit_mapping(
            from,
            size,
            RegionData::new(StackIndex::new(stack), tag),
            use_tag_inplace,
        ),
        VmaOp::Uncommit {
            from,
            size,
            stack,
            tag,
        } => t.uncommit_mapping(from, size, RegionData::new(StackIndex::new(stack), tag)),
        VmaOp::Release { from, size } => t.release_mapping(from, size),
        VmaOp::SetTag { from, size, tag } => t.set_tag(from, size, tag),
    }
}

fn tree_regions<A: NodeAllocator<VmaNode>>(
    t: &VmaTree<A>,
) -> Vec<(Position, Position, IntervalState)> {
    let mut out = Vec::new();
    t.visit_regions(|r| {
        if r.state.state != StateType::Released {
            out.push((r.start, r.end, r.state));
        }
    });
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_treap_equivalence(ops in ops_strategy()) {
        let mut t: Treap<u16, u32> = Treap::new();
        let mut m: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Upsert(key, value) => {
                    let old_t = t.upsert(key, value).unwrap();
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    prop_assert_eq!(t.remove(&key), m.remove(&key));
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get(&key).copied(), m.get(&key).copied());
                    prop_assert_eq!(t.contains_key(&key), m.contains_key(&key));
                }
                Op::Closest(key) => {
                    prop_assert_eq!(pair(t.closest_leq(&key)), pair(m.range(..=key).next_back()));
                    prop_assert_eq!(
                        pair(t.closest_gt(&key)),
                        pair(m.range((Bound::Excluded(key), Bound::Unbounded)).next())
                    );
                    prop_assert_eq!(pair(t.closest_geq(&key)), pair(m.range(key..).next()));
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let got: Vec<(u16, u32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u16, u32)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_treap_range_visit(
        keys in prop::collection::vec(key_strategy(), 0..200),
        lo in key_strategy(),
        hi in key_strategy(),
    ) {
        let mut t: Treap<u16, ()> = Treap::new();
        let mut m: BTreeMap<u16, ()> = BTreeMap::new();
        for k in keys {
            t.upsert(k, ()).unwrap();
            m.insert(k, ());
        }
        let (lo, hi) = (lo.min(hi), lo.max(hi));

        let mut got = Vec::new();
        t.visit_range_in_order(lo..hi, |k, _| got.push(*k));
        let expected: Vec<u16> = m.range(lo..hi).map(|(k, _)| *k).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_vma_matches_model(ops in prop::collection::vec(any::<VmaOp>(), 0..200)) {
        let mut t = VmaTree::new();
        let mut model = Model::new();
        let mut totals = SummaryDiff::new();

        for op in &ops {
            let diff = apply_op(&mut t, op).unwrap();
            model.apply(op);
            totals += &diff;

            t.verify_self();
            prop_assert_eq!(tree_regions(&t), model.regions());
            prop_assert_eq!(totals, model.totals());
        }
    }

    #[test]
    fn prop_vma_bounded_failures_are_atomic(
        ops in prop::collection::vec(any::<VmaOp>(), 0..200),
        capacity in 2usize..12,
    ) {
        let mut t = VmaTree::with_allocator(NodeArena::bounded(capacity), 42);
        let mut model = Model::new();

        for op in &ops {
            // Re-tagging applies region by region and may fail part way.
            if matches!(op, VmaOp::SetTag { .. }) {
                continue;
            }
            let before = tree_regions(&t);
            match apply_op(&mut t, op) {
                Ok(_) => model.apply(op),
                Err(e) => {
                    prop_assert_eq!(e, TreeError::OutOfNodes { capacity });
                    prop_assert_eq!(tree_regions(&t), before);
                }
            }
            t.verify_self();
            prop_assert_eq!(tree_regions(&t), model.regions());
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

const SMALL_SET: [u16; 6] = [5, 63, 128, 140, 141, 142];

#[test]
fn exhaustive_insert_order_small_set() {
    for_each_permutation(&SMALL_SET, |perm| {
        let mut t: Treap<u16, u32> = Treap::new();
        let mut m: BTreeMap<u16, u32> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u32;
            assert_eq!(t.upsert(k, v).unwrap(), m.insert(k, v));
        }

        validate_tree(&t);
        let got: Vec<(u16, u32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u16, u32)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    for_each_permutation(&SMALL_SET, |perm| {
        // Insert in a fixed order, then remove in every order.
        let mut t: Treap<u16, u32> = Treap::new();
        let mut m: BTreeMap<u16, u32> = BTreeMap::new();
        for (i, k) in SMALL_SET.iter().enumerate() {
            let v = i as u32;
            assert_eq!(t.upsert(*k, v).unwrap(), m.insert(*k, v));
        }

        for k in perm {
            assert_eq!(t.remove(&k), m.remove(&k));
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }
        assert!(t.is_empty());
        assert_eq!(t.allocator().live(), 0);
    });
}

#[test]
fn exhaustive_release_order_small_set() {
    let blocks: [(Position, usize); 4] = [(0, 16), (16, 16), (40, 8), (48, 32)];
    let gc = RegionData::new(StackIndex::new(0), MemTag::Gc);

    for_each_permutation(&blocks, |perm| {
        let mut t = VmaTree::new();
        let mut total = SummaryDiff::new();
        for (from, size) in blocks {
            total += &t.reserve_mapping(from, size, gc).unwrap();
        }
        for (from, size) in perm {
            total += &t.release_mapping(from, size).unwrap();
            t.verify_self();
        }
        assert!(t.is_empty());
        assert!(total.is_empty());
    });
}
