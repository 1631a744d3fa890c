//! Point reads.

use crate::chain::{ChainView, Search, VersionRef};
use crate::codec::TupleCodec;
use crate::database::{Database, QueryContext};
use crate::error::{Result, StoreError};
use crate::table::{RowSlots, Table};
use crate::tid::RowId;
use crate::tracing_helpers::warn_log;

/// Copy out the bytes of `version`: the column slots for the head, the
/// payload for an archived node.
pub(crate) fn version_bytes(
    view: &ChainView<'_>,
    slots: &RowSlots,
    version: VersionRef,
) -> Search<Vec<u8>> {
    match version {
        VersionRef::Head => Search::Found(slots.read_bytes()),
        VersionRef::Node(handle) => match view.node(handle) {
            Some(node) => Search::Found(node.payload().to_vec()),
            None => Search::Retry,
        },
    }
}

impl Database {
    /// Decoded value of `tid` as seen from `ctx`, `revision_offset`
    /// revisions back (`0` = latest).
    ///
    /// Revisions follow the version's own branch history: on master they
    /// are the row's earlier master values; on a branch, the branch's own
    /// earlier values and then the values it inherited.
    ///
    /// # Errors
    /// [`StoreError::NoSuchTupleInBranch`] if the row has no version visible
    /// from `ctx` or the walk runs past the oldest revision. A codec error
    /// if the stored bytes do not decode.
    pub fn get_value<C: TupleCodec>(
        &self,
        table: &Table<C>,
        tid: RowId,
        revision_offset: usize,
        ctx: &QueryContext,
    ) -> Result<C::Tuple> {
        let missing = || StoreError::NoSuchTupleInBranch {
            tid,
            branch: ctx.branch(),
        };

        let row = table.row(tid).ok_or_else(missing)?;
        let bytes = row.read_validated(self.config().max_read_retries, |view, slots| {
            view.latest_visible(ctx.lineage())
                .and_then(|latest| view.walk_revisions(latest, revision_offset))
                .and_then(|version| version_bytes(view, slots, version))
        });

        match bytes {
            Some(bytes) => table.codec().decode(&bytes),
            None => {
                warn_log!(%tid, branch = ctx.branch(), revision_offset, "get_value: no such tuple");
                Err(missing())
            }
        }
    }

    /// Whether `ctx` sees any live version of `tid`.
    #[must_use]
    pub fn is_visible<C: TupleCodec>(&self, table: &Table<C>, tid: RowId, ctx: &QueryContext) -> bool {
        let Some(row) = table.row(tid) else {
            return false;
        };
        if !row.head().has_lineage_intersection(ctx.lineage()) {
            return false;
        }

        row.read_validated(self.config().max_read_retries, |view, _| {
            view.latest_visible(ctx.lineage())
        })
        .is_some()
    }
}

#[cfg(test)]
mod tests {
    use crate::branch::MASTER;
    use crate::codec::{BytesCodec, I64Codec};
    use crate::config::StoreConfig;
    use crate::database::Database;
    use crate::error::StoreError;
    use crate::tid::RowId;

    #[test]
    fn test_revision_walk_on_master() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let tid = db.insert(&table, &vec![0], MASTER).expect("insert");
        for v in 1..=3 {
            db.update(&table, tid, &vec![v], MASTER).expect("update");
        }

        let ctx = db.context(MASTER).expect("ctx");
        let values: Vec<_> = (0..4)
            .map(|k| db.get_value(&table, tid, k, &ctx).expect("revision")[0])
            .collect();
        assert_eq!(values, vec![3, 2, 1, 0]);
        assert_eq!(
            db.get_value(&table, tid, 4, &ctx),
            Err(StoreError::NoSuchTupleInBranch { tid, branch: MASTER })
        );
        assert!(db.get_value(&table, tid, usize::MAX, &ctx).is_err());
    }

    #[test]
    fn test_branch_revisions_reach_inherited_master_values() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let tid = db.insert(&table, &vec![1], MASTER).expect("insert");
        db.update(&table, tid, &vec![2], MASTER).expect("master update");

        let b1 = db.create_branch("b1", MASTER).expect("b1");
        db.update(&table, tid, &vec![20], b1).expect("b1 update");
        db.update(&table, tid, &vec![21], b1).expect("b1 update");
        // Later master writes do not rewrite what b1 inherited.
        db.update(&table, tid, &vec![3], MASTER).expect("master update");
        db.update(&table, tid, &vec![4], MASTER).expect("master update");

        let ctx = db.context(b1).expect("ctx");
        let values: Vec<_> = (0..4)
            .map(|k| db.get_value(&table, tid, k, &ctx).expect("revision")[0])
            .collect();
        assert_eq!(values, vec![21, 20, 2, 1]);
        assert!(db.get_value(&table, tid, 4, &ctx).is_err());
    }

    #[test]
    fn test_get_value_unknown_tid() {
        let db = Database::new();
        let table = db.create_table("t", BytesCodec::new(2)).expect("table");
        let ctx = db.context(MASTER).expect("ctx");

        assert!(matches!(
            db.get_value(&table, RowId::Dangling(0), 0, &ctx),
            Err(StoreError::NoSuchTupleInBranch { .. })
        ));
        assert!(!db.is_visible(&table, RowId::Master(0), &ctx));
    }

    #[test]
    fn test_context_is_pinned_at_open() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let tid = db.insert(&table, &vec![1], MASTER).expect("insert");
        let b1 = db.create_branch("b1", MASTER).expect("b1");
        let ctx = db.context(b1).expect("ctx");

        db.update(&table, tid, &vec![2], MASTER).expect("master update");

        assert_eq!(db.get_value(&table, tid, 0, &ctx), Ok(vec![1]));
    }

    #[test]
    fn test_zero_read_retries_read_under_write_lock() {
        let db = Database::with_config(StoreConfig::default().with_max_read_retries(Some(0)));
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let tid = db.insert(&table, &vec![1], MASTER).expect("insert");
        db.update(&table, tid, &vec![2], MASTER).expect("update");
        let b1 = db.create_branch("b1", MASTER).expect("b1");
        db.update(&table, tid, &vec![3], b1).expect("b1 update");

        let row = table.row(tid).expect("row");
        let before = row.head().lock().version();
        let master = db.context(MASTER).expect("ctx");
        let on_b1 = db.context(b1).expect("ctx");

        assert_eq!(db.get_value(&table, tid, 0, &master), Ok(vec![2]));
        assert_eq!(db.get_value(&table, tid, 1, &master), Ok(vec![1]));
        assert_eq!(db.get_value(&table, tid, 0, &on_b1), Ok(vec![3]));
        assert_eq!(db.get_value(&table, tid, 1, &on_b1), Ok(vec![2]));
        assert!(db.is_visible(&table, tid, &master));
        assert!(db.is_visible(&table, tid, &on_b1));

        // Each read above took and released the write lock once.
        assert_eq!(row.head().lock().version(), before + 6);
        assert!(!row.head().lock().is_locked());

        // A miss under the lock is still a miss.
        assert_eq!(
            db.get_value(&table, tid, 3, &on_b1),
            Err(StoreError::NoSuchTupleInBranch { tid, branch: b1 })
        );
        assert_eq!(row.head().lock().version(), before + 7);
    }

    #[test]
    fn test_unbounded_retries_leave_lock_version_alone() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let tid = db.insert(&table, &vec![1], MASTER).expect("insert");

        let row = table.row(tid).expect("row");
        let before = row.head().lock().version();
        let ctx = db.context(MASTER).expect("ctx");

        assert_eq!(db.get_value(&table, tid, 0, &ctx), Ok(vec![1]));
        assert!(db.is_visible(&table, tid, &ctx));
        assert_eq!(row.head().lock().version(), before);
    }
}
