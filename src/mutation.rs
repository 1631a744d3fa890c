//! Insert, update and delete protocols.
//!
//! Every mutation takes the row's write lock for its whole duration and
//! publishes the chain's entry point last, so an optimistic reader either
//! validates against the state before the write or restarts.
//!
//! # Master writes
//!
//! The current row value is archived into a node, the head is rewired to
//! describe the new master value, then the column slots are overwritten.
//! Master may only write rows it can see.
//!
//! # Branch writes
//!
//! The new value goes into a node pushed in front of the chain. The row's
//! column slots are never touched.

use crate::branch::{BranchId, MASTER};
use crate::chain::{Search, VersionHead, VersionRef};
use crate::codec::TupleCodec;
use crate::config::BranchInsertPlacement;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::lineage::Lineage;
use crate::table::{PartitionKind, Table};
use crate::tid::RowId;
use crate::tracing_helpers::{debug_log, warn_log};

/// What a mutation writes into the chain.
enum Write {
    Value(Vec<u8>),
    Tombstone,
}

impl Write {
    const fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }

    fn into_payload(self) -> Box<[u8]> {
        match self {
            Self::Value(bytes) => bytes.into_boxed_slice(),
            Self::Tombstone => Box::default(),
        }
    }
}

const fn no_such_tuple(tid: RowId, branch: BranchId) -> StoreError {
    StoreError::NoSuchTupleInBranch { tid, branch }
}

impl Database {
    /// Append a new row holding `tuple`, owned by `branch`.
    ///
    /// The row starts with no history. Only `branch` and branches forked
    /// from it afterwards can see it. With
    /// [`BranchInsertPlacement::Dangling`], rows inserted on a non-master
    /// branch get a dangling tid.
    ///
    /// # Errors
    /// [`StoreError::UnknownBranch`], a codec error, or
    /// [`StoreError::TableFull`].
    pub fn insert<C: TupleCodec>(
        &self,
        table: &Table<C>,
        tuple: &C::Tuple,
        branch: BranchId,
    ) -> Result<RowId> {
        self.check_branch(branch)?;
        let bytes = table.codec().encode_row(tuple)?;

        let kind = if branch != MASTER && self.config().branch_inserts == BranchInsertPlacement::Dangling {
            PartitionKind::Dangling
        } else {
            PartitionKind::Master
        };

        let head = VersionHead::new(branch, self.highest_branch_id());
        let tid = table
            .append_row(kind, head, &bytes)
            .ok_or_else(|| StoreError::TableFull {
                name: table.name().to_string(),
            })?;

        debug_log!(%tid, branch, table = table.name(), "insert");
        Ok(tid)
    }

    /// Replace the value `branch` sees for `tid`.
    ///
    /// On master the row is updated in place and the old value archived;
    /// afterwards `get_value(tid, 0)` on master returns `tuple` exactly.
    ///
    /// # Errors
    /// [`StoreError::NoSuchTupleInBranch`] if `branch` sees no version of
    /// the row (always the case for a dangling tid on master),
    /// [`StoreError::UnknownBranch`], [`StoreError::ChainFull`], or a codec
    /// error.
    pub fn update<C: TupleCodec>(
        &self,
        table: &Table<C>,
        tid: RowId,
        tuple: &C::Tuple,
        branch: BranchId,
    ) -> Result<()> {
        let bytes = table.codec().encode_row(tuple)?;
        self.write_version(table, tid, branch, Write::Value(bytes))
    }

    /// Remove `tid` from `branch`.
    ///
    /// Branches that already exist elsewhere in the tree keep seeing the
    /// row; `branch` and branches forked from it later do not.
    ///
    /// # Errors
    /// [`StoreError::NoSuchTupleInBranch`] if `branch` sees no version of
    /// the row, [`StoreError::UnknownBranch`], or [`StoreError::ChainFull`].
    pub fn delete<C: TupleCodec>(&self, table: &Table<C>, tid: RowId, branch: BranchId) -> Result<()> {
        self.write_version(table, tid, branch, Write::Tombstone)
    }

    fn write_version<C: TupleCodec>(
        &self,
        table: &Table<C>,
        tid: RowId,
        branch: BranchId,
        write: Write,
    ) -> Result<()> {
        let result = if branch == MASTER {
            self.write_master(table, tid, write)
        } else {
            self.write_branch(table, tid, branch, write)
        };

        if let Err(_err) = &result {
            warn_log!(%tid, branch, error = %_err, "mutation rejected");
        }
        result
    }

    /// Master update protocol: archive, rewire head, overwrite slots.
    fn write_master<C: TupleCodec>(&self, table: &Table<C>, tid: RowId, write: Write) -> Result<()> {
        if tid.is_dangling() {
            return Err(no_such_tuple(tid, MASTER));
        }

        let row = table.row(tid).ok_or_else(|| no_such_tuple(tid, MASTER))?;
        let head = row.head();

        // Obsolete: the table was dropped.
        let guard = head.lock().lock().ok_or_else(|| no_such_tuple(tid, MASTER))?;

        let visible = {
            let view = head.view();
            view.latest_visible(&Lineage::master())
        };
        if !matches!(visible, Search::Found(VersionRef::Head)) {
            return Err(no_such_tuple(tid, MASTER));
        }

        let old = row.slots().read_bytes().into_boxed_slice();
        let tombstone = write.is_tombstone();
        head.archive_master(&guard, old, self.highest_branch_id(), tombstone)
            .ok_or(StoreError::ChainFull { tid })?;

        if let Write::Value(bytes) = &write {
            row.slots().write_bytes(bytes);
        }
        drop(guard);

        debug_log!(%tid, nodes = head.node_count(), tombstone, "master write");
        Ok(())
    }

    /// Branch update protocol: push a node in front of the chain.
    fn write_branch<C: TupleCodec>(
        &self,
        table: &Table<C>,
        tid: RowId,
        branch: BranchId,
        write: Write,
    ) -> Result<()> {
        let lineage = Lineage::resolve(self.registry(), branch)?;

        let row = table.row(tid).ok_or_else(|| no_such_tuple(tid, branch))?;
        let head = row.head();
        let guard = head.lock().lock().ok_or_else(|| no_such_tuple(tid, branch))?;

        let predecessor = {
            let view = head.view();
            view.latest_visible(&lineage)
        };
        let predecessor = match predecessor {
            Search::Found(version) => version,
            Search::Missing | Search::Retry => return Err(no_such_tuple(tid, branch)),
        };

        let tombstone = write.is_tombstone();
        head.push_branch_version(
            &guard,
            branch,
            self.highest_branch_id(),
            write.into_payload(),
            tombstone,
            predecessor,
        )
        .ok_or(StoreError::ChainFull { tid })?;
        drop(guard);

        debug_log!(%tid, branch, ?predecessor, tombstone, "branch write");
        Ok(())
    }
}
