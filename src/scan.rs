//! Lazy table scans.
//!
//! A [`Scan`] walks master tids in ascending order and then dangling tids,
//! emitting one decoded tuple per row that has a live version visible from
//! the query context. Rows appended while the scan runs are picked up if the
//! cursor has not passed them yet. The emission order is not a sort
//! guarantee.

use std::iter::FusedIterator;

use crate::chain::{ChainView, Search, VersionRef};
use crate::codec::TupleCodec;
use crate::database::{Database, QueryContext};
use crate::error::Result;
use crate::lineage::Lineage;
use crate::read::version_bytes;
use crate::table::Table;
use crate::tid::RowId;
use crate::tracing_helpers::trace_log;

/// Which visible version a scan emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// The freshest visible version.
    Latest,
    /// The oldest revision behind the freshest visible version.
    Earliest,
}

impl ScanMode {
    fn select(self, view: &ChainView<'_>, lineage: &Lineage) -> Search<VersionRef> {
        match self {
            Self::Latest => view.latest_visible(lineage),
            Self::Earliest => view.earliest_visible(lineage),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Cursor {
    Master(u32),
    Dangling(u32),
    Done,
}

/// Forward-only iterator over the rows a context sees.
///
/// Yields `(tid, tuple)`; a row whose bytes fail to decode yields the codec
/// error and the scan continues with the next row.
#[derive(Debug)]
pub struct Scan<'a, C> {
    db: &'a Database,
    table: &'a Table<C>,
    ctx: &'a QueryContext,
    mode: ScanMode,
    cursor: Cursor,
}

impl<'a, C: TupleCodec> Scan<'a, C> {
    /// Scan `table` from the first master row.
    #[must_use]
    pub const fn new(db: &'a Database, table: &'a Table<C>, ctx: &'a QueryContext, mode: ScanMode) -> Self {
        Self {
            db,
            table,
            ctx,
            mode,
            cursor: Cursor::Master(0),
        }
    }

    /// Scan mode.
    #[must_use]
    pub const fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Next tid to look at, moving to the dangling rows when master runs out.
    fn next_tid(&mut self) -> Option<RowId> {
        loop {
            let tid = match self.cursor {
                Cursor::Master(index) => RowId::Master(index),
                Cursor::Dangling(index) => RowId::Dangling(index),
                Cursor::Done => return None,
            };

            if self.table.row(tid).is_some() {
                self.cursor = match (self.cursor, tid.index().checked_add(1)) {
                    (Cursor::Master(_), Some(next)) => Cursor::Master(next),
                    (Cursor::Dangling(_), Some(next)) => Cursor::Dangling(next),
                    _ => Cursor::Done,
                };
                return Some(tid);
            }

            self.cursor = match self.cursor {
                // Dangling rows never exist in master.
                Cursor::Master(_) if self.ctx.lineage().is_master() => Cursor::Done,
                Cursor::Master(_) => Cursor::Dangling(0),
                Cursor::Dangling(_) | Cursor::Done => Cursor::Done,
            };
        }
    }

    fn read_row(&self, tid: RowId) -> Option<Vec<u8>> {
        let row = self.table.row(tid)?;
        let lineage = self.ctx.lineage();
        if !row.head().has_lineage_intersection(lineage) {
            return None;
        }

        row.read_validated(self.db.config().max_read_retries, |view, slots| {
            self.mode
                .select(view, lineage)
                .and_then(|version| version_bytes(view, slots, version))
        })
    }
}

impl<C: TupleCodec> Iterator for Scan<'_, C> {
    type Item = Result<(RowId, C::Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(tid) = self.next_tid() {
            if let Some(bytes) = self.read_row(tid) {
                return Some(self.table.codec().decode(&bytes).map(|tuple| (tid, tuple)));
            }
            trace_log!(%tid, "scan: row not visible");
        }
        None
    }
}

impl<C: TupleCodec> FusedIterator for Scan<'_, C> {}

impl Database {
    /// Lazily scan the freshest version of every row `ctx` sees.
    #[must_use]
    pub const fn scan_latest<'a, C: TupleCodec>(
        &'a self,
        table: &'a Table<C>,
        ctx: &'a QueryContext,
    ) -> Scan<'a, C> {
        Scan::new(self, table, ctx, ScanMode::Latest)
    }

    /// Lazily scan the oldest revision of every row `ctx` sees.
    #[must_use]
    pub const fn scan_earliest<'a, C: TupleCodec>(
        &'a self,
        table: &'a Table<C>,
        ctx: &'a QueryContext,
    ) -> Scan<'a, C> {
        Scan::new(self, table, ctx, ScanMode::Earliest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::MASTER;
    use crate::codec::I64Codec;
    use crate::config::{BranchInsertPlacement, StoreConfig};

    fn collect<C: TupleCodec>(scan: Scan<'_, C>) -> Vec<(RowId, C::Tuple)> {
        scan.map(|item| item.expect("decode")).collect()
    }

    #[test]
    fn test_scan_skips_invisible_rows() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let b1 = db.create_branch("b1", MASTER).expect("b1");

        let shared = db.insert(&table, &vec![1], MASTER).expect("insert");
        let branch_only = db.insert(&table, &vec![2], b1).expect("insert");

        let master = db.context(MASTER).expect("ctx");
        let on_b1 = db.context(b1).expect("ctx");

        assert_eq!(collect(db.scan_latest(&table, &master)), vec![(shared, vec![1])]);
        // `shared` was inserted after b1 forked.
        assert_eq!(collect(db.scan_latest(&table, &on_b1)), vec![(branch_only, vec![2])]);
    }

    #[test]
    fn test_scan_includes_dangling_rows_off_master() {
        let config = StoreConfig::default().with_branch_inserts(BranchInsertPlacement::Dangling);
        let db = Database::with_config(config);
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let m0 = db.insert(&table, &vec![1], MASTER).expect("insert");
        let b1 = db.create_branch("b1", MASTER).expect("b1");
        let d0 = db.insert(&table, &vec![2], b1).expect("insert");

        let on_b1 = db.context(b1).expect("ctx");
        let master = db.context(MASTER).expect("ctx");

        assert_eq!(
            collect(db.scan_latest(&table, &on_b1)),
            vec![(m0, vec![1]), (d0, vec![2])]
        );
        assert_eq!(collect(db.scan_latest(&table, &master)), vec![(m0, vec![1])]);
    }

    #[test]
    fn test_scan_earliest_returns_oldest_revision() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let a = db.insert(&table, &vec![1], MASTER).expect("insert");
        let b = db.insert(&table, &vec![10], MASTER).expect("insert");
        db.update(&table, a, &vec![2], MASTER).expect("update");
        db.update(&table, a, &vec![3], MASTER).expect("update");

        let ctx = db.context(MASTER).expect("ctx");
        assert_eq!(
            collect(db.scan_latest(&table, &ctx)),
            vec![(a, vec![3]), (b, vec![10])]
        );
        assert_eq!(
            collect(db.scan_earliest(&table, &ctx)),
            vec![(a, vec![1]), (b, vec![10])]
        );
    }

    #[test]
    fn test_scan_is_fused() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        db.insert(&table, &vec![1], MASTER).expect("insert");
        let ctx = db.context(MASTER).expect("ctx");

        let mut scan = db.scan_latest(&table, &ctx);
        assert!(scan.next().is_some());
        assert!(scan.next().is_none());
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_scan_reports_its_mode() {
        let db = Database::new();
        let table = db.create_table("t", I64Codec::new(1)).expect("table");
        let ctx = db.context(MASTER).expect("ctx");

        assert_eq!(db.scan_latest(&table, &ctx).mode(), ScanMode::Latest);
        assert_eq!(db.scan_earliest(&table, &ctx).mode(), ScanMode::Earliest);
    }
}
