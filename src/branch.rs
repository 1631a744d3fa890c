//! Branch registry.
//!
//! Branches form a tree rooted at [`MASTER`]. Ids are assigned densely and
//! monotonically, so the highest assigned id doubles as the store's logical
//! clock: every version records the highest id current when it was written,
//! and every branch records the highest id right after it was created.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;

use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::tracing_helpers::{debug_log, warn_log};

/// Branch identifier.
pub type BranchId = u32;

/// The root branch. Always exists, has no parent.
pub const MASTER: BranchId = 0;

/// Name given to [`MASTER`].
pub const MASTER_NAME: &str = "master";

/// A registered branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    /// Assigned id.
    pub id: BranchId,
    /// Parent branch, `None` only for master.
    pub parent_id: Option<BranchId>,
    /// Unique name.
    pub name: String,
    /// Highest branch id right after this branch was assigned (its own id).
    ///
    /// A version on the parent is inherited by this branch iff its own
    /// `creation_ts` is below this value.
    pub creation_ts: u32,
}

#[derive(Debug)]
struct RegistryState {
    /// Indexed by branch id.
    branches: Vec<Branch>,
    by_name: HashMap<String, BranchId>,
}

/// Assigns branch ids and records parents.
///
/// No deletion: a branch id, once assigned, stays valid for the registry's
/// lifetime.
#[derive(Debug)]
pub struct BranchRegistry {
    state: RwLock<RegistryState>,

    /// Mirror of `branches.len() - 1`, readable without the lock.
    highest: AtomicU32,
}

impl BranchRegistry {
    /// Create a registry holding only master.
    #[must_use]
    pub fn new() -> Self {
        let master = Branch {
            id: MASTER,
            parent_id: None,
            name: MASTER_NAME.to_string(),
            creation_ts: MASTER,
        };

        let mut by_name = HashMap::new();
        by_name.insert(master.name.clone(), MASTER);

        Self {
            state: RwLock::new(RegistryState {
                branches: vec![master],
                by_name,
            }),
            highest: AtomicU32::new(MASTER),
        }
    }

    /// Fork a new branch off `parent_id`.
    ///
    /// # Errors
    /// - [`StoreError::UnknownParent`] if `parent_id` was never assigned.
    /// - [`StoreError::BranchExists`] if `name` is taken.
    /// - [`StoreError::BranchIdsExhausted`] if every id is in use.
    pub fn create_branch(&self, name: &str, parent_id: BranchId) -> Result<BranchId> {
        let mut state = self.state.write();

        if parent_id as usize >= state.branches.len() {
            warn_log!(parent_id, name, "create_branch: unknown parent");
            return Err(StoreError::UnknownParent { parent: parent_id });
        }
        if state.by_name.contains_key(name) {
            warn_log!(name, "create_branch: duplicate name");
            return Err(StoreError::BranchExists {
                name: name.to_string(),
            });
        }

        let id = next_branch_id(state.branches.len())?;

        state.branches.push(Branch {
            id,
            parent_id: Some(parent_id),
            name: name.to_string(),
            creation_ts: id,
        });
        state.by_name.insert(name.to_string(), id);

        // Published under the write lock so ids and the clock never disagree.
        self.highest.store(id, WRITE_ORD);

        debug_log!(id, parent_id, name, "branch created");
        Ok(id)
    }

    /// The highest branch id assigned so far.
    #[inline]
    #[must_use]
    pub fn highest_branch_id(&self) -> BranchId {
        self.highest.load(READ_ORD)
    }

    /// Check whether `id` was assigned.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: BranchId) -> bool {
        id <= self.highest_branch_id()
    }

    /// Look up a branch by id.
    #[must_use]
    pub fn get(&self, id: BranchId) -> Option<Branch> {
        self.state.read().branches.get(id as usize).cloned()
    }

    /// Look up a branch by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Branch> {
        let state = self.state.read();
        let id = *state.by_name.get(name)?;
        state.branches.get(id as usize).cloned()
    }

    /// Parent of `id`.
    ///
    /// # Errors
    /// [`StoreError::UnknownBranch`] if `id` was never assigned.
    pub fn parent_of(&self, id: BranchId) -> Result<Option<BranchId>> {
        self.state
            .read()
            .branches
            .get(id as usize)
            .map(|b| b.parent_id)
            .ok_or(StoreError::UnknownBranch { branch: id })
    }

    /// Walk from `id` to master, returning `(branch, creation_ts)` pairs,
    /// starting with `id` itself.
    ///
    /// # Errors
    /// [`StoreError::UnknownBranch`] if `id` was never assigned.
    pub fn path_to_root(&self, id: BranchId) -> Result<Vec<(BranchId, u32)>> {
        let state = self.state.read();
        let mut path = Vec::new();
        let mut current = Some(id);

        while let Some(branch_id) = current {
            let branch = state
                .branches
                .get(branch_id as usize)
                .ok_or(StoreError::UnknownBranch { branch: id })?;
            path.push((branch.id, branch.creation_ts));
            current = branch.parent_id;
        }

        Ok(path)
    }

    /// Number of branches, master included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().branches.len()
    }

    /// Always false: master exists from construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Snapshot of every branch, ordered by id.
    #[must_use]
    pub fn branches(&self) -> Vec<Branch> {
        self.state.read().branches.clone()
    }
}

/// Id for the branch stored at `index`.
fn next_branch_id(index: usize) -> Result<BranchId> {
    BranchId::try_from(index).map_err(|_| {
        warn_log!(index, "create_branch: branch ids exhausted");
        StoreError::BranchIdsExhausted
    })
}

impl Default for BranchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
