//! Zero-cost tracing helpers.
//!
//! With the `tracing` feature these macros forward to the `tracing` crate.
//! Without it (default) they expand to nothing.
//!
//! # Usage
//!
//! ```bash
//! # Normal build - no logging code at all
//! cargo build --release
//!
//! # Chain mutations at debug, lock restarts at trace
//! RUST_LOG=branchstore::mutation=debug,branchstore::chain=trace \
//!     cargo test --features tracing branch_scenarios
//! ```
//!
//! Levels used across the crate:
//! - `trace`: optimistic read restarts, write-lock spins, traversal retries
//! - `debug`: one event per completed mutation protocol
//! - `warn`: an operation is about to return a [`StoreError`](crate::StoreError)
//! - `error`: a chain was found inconsistent while no writer held its lock

#![allow(unused_macros, unused_imports)]

/// Trace-level logging. Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Debug-level logging. Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Warn-level logging. Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

/// Error-level logging. Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! error_log {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use error_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
