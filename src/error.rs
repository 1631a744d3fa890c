//! Error type shared by every fallible store operation.

use thiserror::Error;

use crate::branch::BranchId;
use crate::tid::RowId;

/// Errors surfaced by the branch store.
///
/// Lock restarts are not errors; they are retried inside the engine and
/// never reach the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `create_branch` named a parent the registry never assigned.
    #[error("unknown parent branch {parent}")]
    UnknownParent {
        /// The missing parent id.
        parent: BranchId,
    },

    /// A context or mutation named a branch the registry never assigned.
    #[error("unknown branch {branch}")]
    UnknownBranch {
        /// The missing branch id.
        branch: BranchId,
    },

    /// Every `u32` branch id has been handed out.
    #[error("no branch ids left")]
    BranchIdsExhausted,

    /// A branch with this name already exists.
    #[error("branch '{name}' already exists")]
    BranchExists {
        /// The duplicated name.
        name: String,
    },

    /// The addressed row has no version visible from the branch, or a revision
    /// walk ran past the oldest version, or a master mutation targeted a row
    /// master cannot see.
    #[error("no such tuple {tid} in branch {branch}")]
    NoSuchTupleInBranch {
        /// The addressed row.
        tid: RowId,
        /// The branch the operation ran against.
        branch: BranchId,
    },

    /// No table with this name.
    #[error("no such table: {name}")]
    NoSuchTable {
        /// The missing table name.
        name: String,
    },

    /// A table with this name already exists.
    #[error("table {name} already exists")]
    TableExists {
        /// The duplicated table name.
        name: String,
    },

    /// A table partition already holds `u32::MAX` rows.
    #[error("table {name} has no row ids left")]
    TableFull {
        /// The full table.
        name: String,
    },

    /// A row's version chain has handed out every `u32` node handle.
    #[error("version chain of {tid} has no node handles left")]
    ChainFull {
        /// The row whose chain is full.
        tid: RowId,
    },

    /// An encoded tuple does not match the table's row width.
    #[error("tuple width mismatch: expected {expected} bytes, got {actual}")]
    WidthMismatch {
        /// Row width declared by the table layout.
        expected: usize,
        /// Width actually produced or supplied.
        actual: usize,
    },
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
