//! Lineage resolution and the visibility predicate.
//!
//! A [`Lineage`] is computed once per query context from the branch registry
//! and never mutated afterwards. It answers one question per chain node:
//! should a query running on this branch observe a value written by branch
//! `b` at logical time `t`?
//!
//! # Rule
//!
//! For the path `B -> P1 -> P2 -> ... -> master`:
//!
//! ```text
//! cutoffs[P1]     = B.creation_ts
//! cutoffs[P(k+1)] = P(k).creation_ts
//!
//! visible(b, t) = b == B  ||  (b in cutoffs && t < cutoffs[b])
//! ```
//!
//! A value written on an ancestor is inherited only if it predates the fork
//! of the child on the path.

use std::collections::HashMap;

use crate::bitset::BranchBitset;
use crate::branch::{BranchId, BranchRegistry, MASTER};
use crate::error::Result;

/// Ancestor cutoffs plus an intersection bitset for one query branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lineage {
    query_branch: BranchId,
    cutoffs: HashMap<BranchId, u32>,
    bitset: BranchBitset,
}

impl Lineage {
    /// Resolve the lineage of `branch`. Cost is O(depth).
    ///
    /// # Errors
    /// [`StoreError::UnknownBranch`](crate::StoreError::UnknownBranch) if
    /// `branch` was never assigned.
    pub fn resolve(registry: &BranchRegistry, branch: BranchId) -> Result<Self> {
        let path = registry.path_to_root(branch)?;
        Ok(Self::from_path(&path))
    }

    /// Build a lineage from a `(branch, creation_ts)` path that starts at the
    /// query branch and ends at master.
    #[must_use]
    pub fn from_path(path: &[(BranchId, u32)]) -> Self {
        let query_branch = path.first().map_or(MASTER, |(id, _)| *id);

        let cutoffs: HashMap<BranchId, u32> = path
            .windows(2)
            .map(|pair| (pair[1].0, pair[0].1))
            .collect();

        let bitset: BranchBitset = path.iter().map(|(id, _)| *id).collect();

        Self {
            query_branch,
            cutoffs,
            bitset,
        }
    }

    /// Lineage of master: sees only master.
    #[must_use]
    pub fn master() -> Self {
        Self::from_path(&[(MASTER, MASTER)])
    }

    /// The branch this lineage was resolved for.
    #[inline]
    #[must_use]
    pub const fn query_branch(&self) -> BranchId {
        self.query_branch
    }

    /// Check whether this is master's lineage.
    #[inline]
    #[must_use]
    pub const fn is_master(&self) -> bool {
        self.query_branch == MASTER
    }

    /// Inheritance cutoff for ancestor `branch`, if it is one.
    #[inline]
    #[must_use]
    pub fn cutoff(&self, branch: BranchId) -> Option<u32> {
        self.cutoffs.get(&branch).copied()
    }

    /// Number of ancestors (the query branch excluded).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.cutoffs.len()
    }

    /// Query branch plus every ancestor.
    #[inline]
    #[must_use]
    pub const fn bitset(&self) -> &BranchBitset {
        &self.bitset
    }

    /// The visibility predicate.
    ///
    /// True for an exact branch match, or for a value written on an ancestor
    /// strictly before that ancestor spawned the next branch on the path.
    #[inline]
    #[must_use]
    pub fn sees(&self, branch_id: BranchId, creation_ts: u32) -> bool {
        branch_id == self.query_branch
            || self
                .cutoffs
                .get(&branch_id)
                .is_some_and(|cutoff| creation_ts < *cutoff)
    }

    /// Pre-filter: can any node owned by a branch in `owners` be visible?
    ///
    /// A `false` answer is exact. A `true` answer only means the chain must
    /// be walked.
    #[inline]
    #[must_use]
    pub fn intersects(&self, owners: &BranchBitset) -> bool {
        self.bitset.intersects(owners)
    }
}
