use std::ops::Index;

use vma_tree::{MemTag, SummaryDiff};

/// Reserved and committed bytes of one tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagTotals {
    pub reserved: usize,
    pub committed: usize,
}

impl TagTotals {
    pub fn is_empty(&self) -> bool {
        self.reserved == 0 && self.committed == 0
    }
}

/// Running per-tag totals, kept current by applying every [`SummaryDiff`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    by_tag: [TagTotals; MemTag::COUNT],
}

fn adjust(total: &mut usize, delta: i64, tag: MemTag) {
    let delta = isize::try_from(delta)
        .unwrap_or_else(|_| panic!("{tag} delta {delta} does not fit the address space"));
    *total = total
        .checked_add_signed(delta)
        .unwrap_or_else(|| panic!("{tag} accounting underflow: {total} + {delta}"));
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one diff into the totals. A total going negative means the diff
    /// did not come from the tree these totals track, and panics.
    pub fn apply(&mut self, diff: &SummaryDiff) {
        for (tag, d) in diff.iter() {
            let totals = &mut self.by_tag[tag.index()];
            adjust(&mut totals.reserved, d.reserve, tag);
            adjust(&mut totals.committed, d.commit, tag);
        }
    }

    /// Adds another snapshot's totals to this one.
    pub fn merge(&mut self, other: &MemorySnapshot) {
        for (mine, theirs) in self.by_tag.iter_mut().zip(other.by_tag.iter()) {
            mine.reserved += theirs.reserved;
            mine.committed += theirs.committed;
        }
    }

    pub fn total(&self) -> TagTotals {
        self.by_tag.iter().fold(TagTotals::default(), |acc, t| TagTotals {
            reserved: acc.reserved + t.reserved,
            committed: acc.committed + t.committed,
        })
    }

    /// Tags with any reserved memory, in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (MemTag, TagTotals)> + '_ {
        MemTag::ALL
            .into_iter()
            .zip(self.by_tag.iter().copied())
            .filter(|(_, t)| !t.is_empty())
    }
}

impl Index<MemTag> for MemorySnapshot {
    type Output = TagTotals;

    fn index(&self, tag: MemTag) -> &TagTotals {
        &self.by_tag[tag.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(tag: MemTag, reserve: i64, commit: i64) -> SummaryDiff {
        let mut d = SummaryDiff::new();
        d[tag].reserve = reserve;
        d[tag].commit = commit;
        d
    }

    #[test]
    fn test_apply_and_total() {
        let mut snap = MemorySnapshot::new();
        snap.apply(&diff(MemTag::Gc, 8192, 4096));
        snap.apply(&diff(MemTag::Code, 4096, 0));
        snap.apply(&diff(MemTag::Gc, 0, -4096));

        assert_eq!(
            snap[MemTag::Gc],
            TagTotals {
                reserved: 8192,
                committed: 0
            }
        );
        assert_eq!(
            snap.total(),
            TagTotals {
                reserved: 12288,
                committed: 0
            }
        );
        let tags: Vec<MemTag> = snap.iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec![MemTag::Code, MemTag::Gc]);
    }

    #[test]
    fn test_merge() {
        let mut a = MemorySnapshot::new();
        a.apply(&diff(MemTag::Thread, 100, 50));
        let mut b = MemorySnapshot::new();
        b.apply(&diff(MemTag::Thread, 20, 20));

        a.merge(&b);
        assert_eq!(
            a[MemTag::Thread],
            TagTotals {
                reserved: 120,
                committed: 70
            }
        );
    }

    #[test]
    #[should_panic(expected = "accounting underflow")]
    fn test_underflow_panics() {
        let mut snap = MemorySnapshot::new();
        snap.apply(&diff(MemTag::Gc, -1, 0));
    }
}
