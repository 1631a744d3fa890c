//! Standard memory orderings for version-chain access.
//!
//! Chain fields are atomics that writers store under the row's write lock and
//! readers load optimistically, validating against the lock version after.

use std::sync::atomic::Ordering;

/// Ordering for reading chain fields during optimistic traversal.
/// Pairs with writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing chain fields under the write lock.
/// Pairs with reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for a successful lock CAS.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for a failed lock CAS. Only need to see the current value.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for loads and stores fully covered by the write lock or a
/// following version validation.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for observing the lock word while waiting for it to clear.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// Ordering for releasing the lock word (clear lock bit + bump version).
pub const UNLOCK_ORD: Ordering = Ordering::Release;
