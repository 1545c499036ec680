use std::ops::{AddAssign, Index, IndexMut};

use crate::MemTag;

/// Signed byte deltas for one memory tag.
///
/// Committed memory is always reserved as well, so committing `n` released
/// bytes yields `reserve: n, commit: n`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SingleDiff {
    pub reserve: i64,
    pub commit: i64,
}

/// Per-tag change produced by one mutating tree operation.
///
/// Callers fold it into their running totals instead of re-scanning the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SummaryDiff {
    tag: [SingleDiff; MemTag::COUNT],
}

impl SummaryDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tag.iter().all(|d| *d == SingleDiff::default())
    }

    pub fn add(&mut self, other: &SummaryDiff) {
        for (mine, theirs) in self.tag.iter_mut().zip(other.tag.iter()) {
            mine.reserve += theirs.reserve;
            mine.commit += theirs.commit;
        }
    }

    /// Tags with a non-zero delta, in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (MemTag, &SingleDiff)> + '_ {
        MemTag::ALL
            .into_iter()
            .zip(self.tag.iter())
            .filter(|(_, d)| **d != SingleDiff::default())
    }
}

impl Index<MemTag> for SummaryDiff {
    type Output = SingleDiff;

    fn index(&self, tag: MemTag) -> &SingleDiff {
        &self.tag[tag.index()]
    }
}

impl IndexMut<MemTag> for SummaryDiff {
    fn index_mut(&mut self, tag: MemTag) -> &mut SingleDiff {
        &mut self.tag[tag.index()]
    }
}

impl AddAssign<&SummaryDiff> for SummaryDiff {
    fn add_assign(&mut self, other: &SummaryDiff) {
        self.add(other);
    }
}
