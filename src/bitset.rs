//! Growable bitset over branch ids.
//!
//! Used twice: a [`Lineage`](crate::lineage::Lineage) holds the set of
//! branches a query can see, and every version head records the branches that
//! own a node in its chain. Intersecting the two is the scan pre-filter.

use smallvec::SmallVec;

use crate::branch::BranchId;

const WORD_BITS: usize = u64::BITS as usize;

/// A set of branch ids, one bit per id.
///
/// The first 128 branch ids live inline; beyond that the words spill to the
/// heap. Bits past the end of the word vector read as clear.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BranchBitset {
    words: SmallVec<[u64; 2]>,
}

impl BranchBitset {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding exactly `branch`.
    #[must_use]
    pub fn singleton(branch: BranchId) -> Self {
        let mut set = Self::new();
        set.insert(branch);
        set
    }

    #[inline(always)]
    const fn locate(branch: BranchId) -> (usize, u64) {
        let bit = branch as usize;
        (bit / WORD_BITS, 1u64 << (bit % WORD_BITS))
    }

    /// Add `branch`, growing the word vector if needed.
    ///
    /// Returns `true` if the bit was newly set.
    pub fn insert(&mut self, branch: BranchId) -> bool {
        let (word, mask) = Self::locate(branch);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }

        let fresh = (self.words[word] & mask) == 0;
        self.words[word] |= mask;
        fresh
    }

    /// Check whether `branch` is in the set.
    #[inline]
    #[must_use]
    pub fn contains(&self, branch: BranchId) -> bool {
        let (word, mask) = Self::locate(branch);
        self.words.get(word).is_some_and(|w| (w & mask) != 0)
    }

    /// Check whether the two sets share any branch.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| (a & b) != 0)
    }

    /// Number of branches in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Check whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate the branch ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = BranchId> + '_ {
        self.words.iter().enumerate().flat_map(|(index, word)| {
            let base = index * WORD_BITS;
            (0..WORD_BITS)
                .filter(move |bit| (word >> bit) & 1 == 1)
                .filter_map(move |bit| BranchId::try_from(base + bit).ok())
        })
    }
}

impl std::fmt::Debug for BranchBitset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<BranchId> for BranchBitset {
    fn from_iter<I: IntoIterator<Item = BranchId>>(iter: I) -> Self {
        let mut set = Self::new();
        for branch in iter {
            set.insert(branch);
        }
        set
    }
}
