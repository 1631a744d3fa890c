//! Store configuration.
//!
//! ```rust
//! use branchstore::config::{BranchInsertPlacement, StoreConfig};
//!
//! let config = StoreConfig::default()
//!     .with_branch_inserts(BranchInsertPlacement::Dangling)
//!     .with_max_read_retries(Some(64));
//! assert_eq!(config.branch_inserts, BranchInsertPlacement::Dangling);
//! ```
//!
//! # Environment
//!
//! [`StoreConfig::from_env`] starts from the defaults and applies:
//! - `BRANCHSTORE_BRANCH_INSERTS`: `master` or `dangling`
//! - `BRANCHSTORE_ROW_CAPACITY`: rows pre-reserved per new table
//! - `BRANCHSTORE_MAX_READ_RETRIES`: optimistic restarts before a read takes
//!   the write lock (`0` or unset = retry forever)
//!
//! Unparseable values are ignored with a warning.

use std::env;

use crate::tracing_helpers::warn_log;

/// Where rows inserted on a non-master branch are stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BranchInsertPlacement {
    /// Append to the master row array. Master never sees the row because its
    /// only version belongs to the inserting branch.
    #[default]
    Master,
    /// Append to the dangling row array and hand out a dangling tid.
    Dangling,
}

impl BranchInsertPlacement {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "master" => Some(Self::Master),
            "dangling" => Some(Self::Dangling),
            _ => None,
        }
    }
}

/// Knobs for a [`Database`](crate::Database).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Placement of rows inserted on non-master branches.
    pub branch_inserts: BranchInsertPlacement,

    /// Master rows pre-reserved for each new table.
    pub initial_row_capacity: usize,

    /// Optimistic read restarts before falling back to the write lock.
    /// `None` retries forever.
    pub max_read_retries: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            branch_inserts: BranchInsertPlacement::Master,
            initial_row_capacity: 1024,
            max_read_retries: None,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `BRANCHSTORE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `BRANCHSTORE_*` key.
    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup("BRANCHSTORE_BRANCH_INSERTS") {
            match BranchInsertPlacement::parse(&value) {
                Some(placement) => config.branch_inserts = placement,
                None => {
                    warn_log!(%value, "ignoring BRANCHSTORE_BRANCH_INSERTS");
                }
            }
        }

        if let Some(value) = lookup("BRANCHSTORE_ROW_CAPACITY") {
            match value.trim().parse::<usize>() {
                Ok(capacity) => config.initial_row_capacity = capacity,
                Err(_) => {
                    warn_log!(%value, "ignoring BRANCHSTORE_ROW_CAPACITY");
                }
            }
        }

        if let Some(value) = lookup("BRANCHSTORE_MAX_READ_RETRIES") {
            match value.trim().parse::<usize>() {
                Ok(0) => config.max_read_retries = None,
                Ok(retries) => config.max_read_retries = Some(retries),
                Err(_) => {
                    warn_log!(%value, "ignoring BRANCHSTORE_MAX_READ_RETRIES");
                }
            }
        }

        config
    }

    /// Set [`StoreConfig::branch_inserts`].
    #[must_use]
    pub const fn with_branch_inserts(mut self, placement: BranchInsertPlacement) -> Self {
        self.branch_inserts = placement;
        self
    }

    /// Set [`StoreConfig::initial_row_capacity`].
    #[must_use]
    pub const fn with_initial_row_capacity(mut self, capacity: usize) -> Self {
        self.initial_row_capacity = capacity;
        self
    }

    /// Set [`StoreConfig::max_read_retries`].
    #[must_use]
    pub const fn with_max_read_retries(mut self, retries: Option<usize>) -> Self {
        self.max_read_retries = retries;
        self
    }
}
