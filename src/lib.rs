//! # `branchstore`
//!
//! A branch-aware multi-version tuple store.
//!
//! Tables can be forked into named branches that form a tree rooted at
//! `master`. Each branch updates rows independently while sharing unchanged
//! data with its ancestors. Every physical row carries a version chain: the
//! row's column slots hold the current master value, and older master values
//! plus branch-local values live in archived nodes linked behind it.
//!
//! ## Status
//!
//! | Feature | Status |
//! |---------|--------|
//! | Branch creation | Works (append-only, never deleted) |
//! | Insert / update / delete per branch | Works (write-locked per row) |
//! | Point reads with revision offset | Works (optimistic, version-validated) |
//! | Latest / earliest scans | Works (lazy, lineage pre-filtered) |
//! | Merge | Not implemented |
//! | Node reclamation | Chains drop with their table |
//!
//! ## Example
//!
//! ```rust
//! use branchstore::{Database, I64Codec, MASTER};
//!
//! let db = Database::new();
//! let table = db.create_table("accounts", I64Codec::new(2))?;
//! let tid = db.insert(&table, &vec![1, 100], MASTER)?;
//!
//! let what_if = db.create_branch("what-if", MASTER)?;
//! db.update(&table, tid, &vec![1, 0], what_if)?;
//!
//! let ctx = db.context(what_if)?;
//! let rows: Vec<_> = db.scan_latest(&table, &ctx).collect::<Result<_, _>>()?;
//! assert_eq!(rows, vec![(tid, vec![1, 0])]);
//!
//! let ctx = db.context(MASTER)?;
//! assert_eq!(db.get_value(&table, tid, 0, &ctx)?, vec![1, 100]);
//! # Ok::<(), branchstore::StoreError>(())
//! ```
//!
//! ## Visibility
//!
//! A query context resolves its branch's lineage once: the branch itself
//! plus every ancestor, each with a cutoff timestamp. A version is visible
//! when it was written on the query branch, or on an ancestor before the
//! cutoff for that ancestor. Branch ids double as the logical clock.
//!
//! ## Thread Safety
//!
//! [`Database`] is `Send + Sync`. Every mutation holds its row's
//! [`OptimisticLock`]; reads run optimistically and redo the read when the
//! lock version moved underneath them.
//!
//! ## Logging
//!
//! Enable the `tracing` feature to emit structured events; without it the
//! logging macros compile to nothing.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Hot lock and link accessors are force-inlined, as measured by the benches.
#![allow(clippy::inline_always)]

mod tracing_helpers;

pub mod bitset;
pub mod branch;
pub mod chain;
pub mod codec;
pub mod config;
pub mod database;
pub mod error;
pub mod lineage;
mod mutation;
pub mod ordering;
mod read;
pub mod scan;
pub mod table;
pub mod tid;
pub mod versionlock;

// Re-export main types for convenience
pub use branch::{Branch, BranchId, BranchRegistry, MASTER, MASTER_NAME};
pub use chain::{HeadPointer, NodeHandle, Search, VersionHead, VersionRef};
pub use codec::{BytesCodec, I64Codec, Layout, TupleCodec};
pub use config::{BranchInsertPlacement, StoreConfig};
pub use database::{Database, QueryContext};
pub use error::{Result, StoreError};
pub use lineage::Lineage;
pub use scan::{Scan, ScanMode};
pub use table::Table;
pub use tid::RowId;
pub use versionlock::OptimisticLock;
