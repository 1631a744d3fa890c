//! Shared fixtures for the integration tests.
//!
//! Store events only exist with the `tracing` feature:
//!
//! ```bash
//! RUST_LOG=branchstore::mutation=debug cargo test --features tracing
//! ```
//!
//! Without `RUST_LOG` the subscriber shows rejected mutations and chain
//! inconsistencies only. Output goes through the test writer, so it is
//! captured per test and printed only on failure.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use branchstore::{BranchId, Database, I64Codec, RowId, StoreError, Table};
use tracing_subscriber::EnvFilter;

/// Rejected mutations and inconsistent chains.
const DEFAULT_FILTER: &str = "branchstore=warn";

static INIT: Once = Once::new();

/// Install the test subscriber. Only the first call in a process has effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_ids(true)
            .compact()
            .try_init();
    });
}

// ============================================================================
//  Store fixtures
// ============================================================================

/// Fresh store holding one empty `i64` table named `t`.
pub fn store(columns: usize) -> (Database, Arc<Table<I64Codec>>) {
    init_tracing();
    let db = Database::new();
    let table = db.create_table("t", I64Codec::new(columns)).expect("create table");
    (db, table)
}

/// Every tuple `scan_latest` yields on `branch`, in emission order.
pub fn latest(db: &Database, table: &Table<I64Codec>, branch: BranchId) -> Vec<Vec<i64>> {
    let ctx = db.context(branch).expect("context");
    db.scan_latest(table, &ctx)
        .map(|item| item.expect("decode").1)
        .collect()
}

/// Decoded value of `tid` on `branch`, `offset` revisions back.
pub fn value_at(
    db: &Database,
    table: &Table<I64Codec>,
    tid: RowId,
    offset: usize,
    branch: BranchId,
) -> Result<Vec<i64>, StoreError> {
    let ctx = db.context(branch).expect("context");
    db.get_value(table, tid, offset, &ctx)
}
