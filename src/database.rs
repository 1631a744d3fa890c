//! The store instance: branch registry, table catalog and configuration.
//!
//! A [`Database`] owns all cross-request shared state. There are no globals;
//! dropping the database drops every table, chain and node arena.
//!
//! ```rust
//! use branchstore::{Database, I64Codec, MASTER};
//!
//! let db = Database::new();
//! let table = db.create_table("t", I64Codec::new(3))?;
//!
//! let tid = db.insert(&table, &vec![1, 2, 3], MASTER)?;
//! let b1 = db.create_branch("b1", MASTER)?;
//! db.update(&table, tid, &vec![9, 9, 9], b1)?;
//!
//! let on_master = db.context(MASTER)?;
//! let on_b1 = db.context(b1)?;
//! assert_eq!(db.get_value(&table, tid, 0, &on_master)?, vec![1, 2, 3]);
//! assert_eq!(db.get_value(&table, tid, 0, &on_b1)?, vec![9, 9, 9]);
//! # Ok::<(), branchstore::StoreError>(())
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::branch::{BranchId, BranchRegistry};
use crate::codec::TupleCodec;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lineage::Lineage;
use crate::table::Table;
use crate::tracing_helpers::debug_log;

type AnyTable = Arc<dyn Any + Send + Sync>;

/// A query's branch binding.
///
/// Holds the lineage resolved when the context was opened. Branches created
/// later do not change what this context sees.
#[derive(Clone, Debug)]
pub struct QueryContext {
    lineage: Lineage,
}

impl QueryContext {
    /// Bind to an already resolved lineage.
    #[must_use]
    pub const fn new(lineage: Lineage) -> Self {
        Self { lineage }
    }

    /// The branch this context reads.
    #[inline]
    #[must_use]
    pub const fn branch(&self) -> BranchId {
        self.lineage.query_branch()
    }

    /// The resolved lineage.
    #[inline]
    #[must_use]
    pub const fn lineage(&self) -> &Lineage {
        &self.lineage
    }
}

/// A branch-aware tuple store.
#[derive(Debug)]
pub struct Database {
    config: StoreConfig,
    registry: BranchRegistry,
    tables: RwLock<HashMap<String, AnyTable>>,
}

impl Database {
    /// Store with default configuration and only the master branch.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Store with explicit configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            registry: BranchRegistry::new(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The branch registry.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &BranchRegistry {
        &self.registry
    }

    // ========================================================================
    //  Branches
    // ========================================================================

    /// Fork `parent` into a new branch named `name`.
    ///
    /// # Errors
    /// [`StoreError::UnknownParent`] or [`StoreError::BranchExists`].
    pub fn create_branch(&self, name: &str, parent: BranchId) -> Result<BranchId> {
        self.registry.create_branch(name, parent)
    }

    /// The logical clock: highest branch id assigned so far.
    #[inline]
    #[must_use]
    pub fn highest_branch_id(&self) -> BranchId {
        self.registry.highest_branch_id()
    }

    /// Open a query context on `branch`, resolving its lineage once.
    ///
    /// # Errors
    /// [`StoreError::UnknownBranch`].
    pub fn context(&self, branch: BranchId) -> Result<QueryContext> {
        Lineage::resolve(&self.registry, branch).map(QueryContext::new)
    }

    pub(crate) fn check_branch(&self, branch: BranchId) -> Result<()> {
        if self.registry.contains(branch) {
            Ok(())
        } else {
            Err(StoreError::UnknownBranch { branch })
        }
    }

    // ========================================================================
    //  Tables
    // ========================================================================

    /// Create an empty table.
    ///
    /// # Errors
    /// [`StoreError::TableExists`].
    pub fn create_table<C>(&self, name: &str, codec: C) -> Result<Arc<Table<C>>>
    where
        C: TupleCodec + 'static,
    {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(StoreError::TableExists {
                name: name.to_string(),
            });
        }

        let table = Arc::new(Table::new(name, codec, self.config.initial_row_capacity));
        tables.insert(name.to_string(), Arc::clone(&table) as AnyTable);

        debug_log!(name, "table created");
        Ok(table)
    }

    /// Look up a table by name.
    ///
    /// # Errors
    /// [`StoreError::NoSuchTable`] if no table has this name or it was
    /// created with a different codec type.
    pub fn table<C>(&self, name: &str) -> Result<Arc<Table<C>>>
    where
        C: TupleCodec + 'static,
    {
        let no_such = || StoreError::NoSuchTable {
            name: name.to_string(),
        };

        let table = self.tables.read().get(name).cloned().ok_or_else(no_such)?;
        table.downcast::<Table<C>>().map_err(|_| no_such())
    }

    /// Drop a table from the catalog and retire its rows.
    ///
    /// Handles that outlive the drop see every row as missing.
    ///
    /// # Errors
    /// [`StoreError::NoSuchTable`].
    pub fn drop_table<C>(&self, name: &str) -> Result<()>
    where
        C: TupleCodec + 'static,
    {
        let table = self.table::<C>(name)?;
        self.tables.write().remove(name);
        table.retire();

        debug_log!(name, "table dropped");
        Ok(())
    }

    /// Names of every table, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
