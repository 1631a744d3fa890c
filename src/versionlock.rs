//! Optimistic versioned lock guarding one version chain.
//!
//! [`OptimisticLock`] packs an obsolete flag, a lock flag and a version counter
//! into a single `u64`. Readers never block: they record the version, read,
//! and re-validate. Writers CAS the lock bit on and bump the version when they
//! release.
//!
//! # Concurrency Model
//! 1. Readers: `read_lock_or_restart()` -> read -> `validate()`; redo on restart.
//! 2. Writers: `lock()` to get a [`WriteGuard`], mutate, let the guard drop.
//!
//! The raw protocol calls (`write_lock_or_restart`, `write_unlock`,
//! `write_unlock_obsolete`) are public for callers that manage the lock word
//! themselves; everything inside the crate goes through [`WriteGuard`].
//!
//! ```rust
//! use branchstore::versionlock::OptimisticLock;
//!
//! let lock = OptimisticLock::new();
//! let (seen, restart) = lock.read_lock_or_restart();
//! assert!(!restart);
//!
//! if let Some(guard) = lock.lock() {
//!     // mutate protected state
//!     drop(guard);
//! }
//!
//! // The reader must redo its work: a writer got in between.
//! assert!(lock.validate(seen));
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, fence};

use crate::ordering::{
    CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, UNLOCK_ORD, VERSION_ORD, WRITE_ORD,
};
use crate::tracing_helpers::trace_log;

// ============================================================================
//  Bit Constants
// ============================================================================

/// Obsolete bit: the protected object was retired, every reader must restart.
const OBSOLETE_BIT: u64 = 1 << 0;

/// Lock bit: a writer holds the lock.
const LOCKED_BIT: u64 = 1 << 1;

/// Low bit of the version counter.
const VERSION_LOWBIT: u64 = 1 << 2;

/// Spins before `await_unlocked` starts yielding the CPU.
const SPINS_BEFORE_YIELD: u32 = 64;

// ============================================================================
//  OptimisticLock
// ============================================================================

/// A spin/CAS lock exposing a version counter.
///
/// # Layout
/// Bits 2-63: `version` | Bit 1: `locked` | Bit 0: `obsolete`
///
/// Unlocking adds `LOCKED_BIT` to the locked word: the lock bit clears and the
/// carry bumps the version. Unlocking as obsolete adds `LOCKED_BIT | OBSOLETE_BIT`.
#[derive(Debug, Default)]
pub struct OptimisticLock {
    value: AtomicU64,
}

// ============================================================================
//  WriteGuard (Type-State Pattern)
// ============================================================================

/// Proof that the write lock is held.
///
/// Only [`OptimisticLock::lock`] constructs one. Operations that mutate a
/// version chain take `&WriteGuard` as proof. Dropping the guard releases the
/// lock (bumping the version), also during unwinding.
///
/// Guards are `!Send` and `!Sync` via `PhantomData<*mut ()>`: the thread that
/// locked must be the one that unlocks.
#[derive(Debug)]
#[must_use = "releasing a lock without using the guard is a logic error"]
pub struct WriteGuard<'a> {
    lock: &'a OptimisticLock,
    locked_value: u64,
    obsolete: bool,
    _marker: PhantomData<*mut ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.obsolete {
            self.lock.write_unlock_obsolete();
        } else {
            self.lock.write_unlock();
        }
    }
}

impl WriteGuard<'_> {
    /// The lock word as it was when this guard acquired it.
    #[inline]
    #[must_use]
    pub const fn locked_value(&self) -> u64 {
        self.locked_value
    }

    /// Release as obsolete when the guard drops.
    ///
    /// Every reader holding an older version restarts, and every later
    /// `read_lock_or_restart` reports `must_restart`.
    #[inline]
    pub fn mark_obsolete(&mut self) {
        self.obsolete = true;
    }

    /// Whether `lock` is the lock this guard holds.
    #[inline]
    #[must_use]
    pub fn guards(&self, lock: &OptimisticLock) -> bool {
        std::ptr::eq(self.lock, lock)
    }
}

impl OptimisticLock {
    /// Create an unlocked, non-obsolete lock at version zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Create a lock from a raw word.
    ///
    ///  WARN: ONLY FOR TESTING.
    #[must_use]
    pub const fn from_value(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    // ========================================================================
    //  Flag Accessors
    // ========================================================================

    /// Check if a writer holds the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        (self.value.load(RELAXED) & LOCKED_BIT) != 0
    }

    /// Check if the protected object was retired.
    #[inline]
    #[must_use]
    pub fn is_obsolete(&self) -> bool {
        (self.value.load(RELAXED) & OBSOLETE_BIT) != 0
    }

    /// The version counter, without flag bits.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.value.load(RELAXED) / VERSION_LOWBIT
    }

    /// Get the raw lock word.
    #[inline]
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.load(RELAXED)
    }

    // ========================================================================
    //  Reader Protocol
    // ========================================================================

    /// Spin until no writer holds the lock and return the observed word.
    ///
    /// Backoff: busy-spin first, then yield the CPU between probes. There is
    /// no timeout.
    #[inline]
    pub fn await_unlocked(&self) -> u64 {
        let mut value: u64 = self.value.load(VERSION_ORD);
        let mut spins: u32 = 0;

        while (value & LOCKED_BIT) != 0 {
            if spins < SPINS_BEFORE_YIELD {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
            value = self.value.load(VERSION_ORD);
        }

        value
    }

    /// Begin an optimistic read.
    ///
    /// # Returns
    /// `(version, must_restart)`. `must_restart` is true when the object is
    /// obsolete; the caller must abandon this object, not retry it.
    #[inline]
    #[must_use]
    pub fn read_lock_or_restart(&self) -> (u64, bool) {
        let value: u64 = self.await_unlocked();
        (value, (value & OBSOLETE_BIT) != 0)
    }

    /// Finish an optimistic read.
    ///
    /// Returns `true` (must restart) if any writer locked the object since
    /// `version` was observed. The fence orders every preceding data load
    /// before the re-check of the lock word.
    #[inline]
    #[must_use]
    pub fn validate(&self, version: u64) -> bool {
        fence(READ_ORD);
        self.value.load(RELAXED) != version
    }

    // ========================================================================
    //  Writer Protocol
    // ========================================================================

    /// Acquire the lock word directly.
    ///
    /// Loops on `await_unlocked` until the CAS from `version` to
    /// `version | locked` wins.
    ///
    /// # Returns
    /// `(locked_word, must_restart)`. `must_restart` is true when the object
    /// was found obsolete; in that case the lock is NOT held.
    #[must_use]
    pub fn write_lock_or_restart(&self) -> (u64, bool) {
        loop {
            let (value, restart) = self.read_lock_or_restart();
            if restart {
                return (value, true);
            }

            let locked: u64 = value | LOCKED_BIT;
            match self
                .value
                .compare_exchange_weak(value, locked, CAS_SUCCESS, CAS_FAILURE)
            {
                Ok(_) => {
                    // Data stores made under the lock must not become visible
                    // before the lock bit does.
                    fence(WRITE_ORD);
                    return (locked, false);
                }
                Err(_current) => {
                    trace_log!(current = _current, "write_lock_or_restart: CAS lost, retrying");
                }
            }
        }
    }

    /// Release the lock and bump the version.
    ///
    /// Must only be called by the thread that won `write_lock_or_restart`.
    #[inline]
    pub fn write_unlock(&self) {
        debug_assert!(self.is_locked(), "write_unlock() on an unlocked lock");
        self.value.fetch_add(LOCKED_BIT, UNLOCK_ORD);
    }

    /// Release the lock, bump the version and mark the object obsolete.
    #[inline]
    pub fn write_unlock_obsolete(&self) {
        debug_assert!(self.is_locked(), "write_unlock_obsolete() on an unlocked lock");
        self.value.fetch_add(LOCKED_BIT | OBSOLETE_BIT, UNLOCK_ORD);
    }

    // ========================================================================
    //  Lock Operations (Type-State Pattern)
    // ========================================================================

    /// Acquire the lock and return a guard.
    ///
    /// # Returns
    /// `None` if the object is obsolete.
    #[must_use = "releasing a lock without using the guard is a logic error"]
    pub fn lock(&self) -> Option<WriteGuard<'_>> {
        let (locked_value, restart) = self.write_lock_or_restart();
        if restart {
            return None;
        }

        Some(WriteGuard {
            lock: self,
            locked_value,
            obsolete: false,
            _marker: PhantomData,
        })
    }

    /// Try to acquire the lock without spinning.
    ///
    /// # Returns
    /// `None` if already locked, obsolete, or the single CAS attempt lost.
    #[must_use]
    pub fn try_lock(&self) -> Option<WriteGuard<'_>> {
        let value: u64 = self.value.load(VERSION_ORD);
        if (value & (LOCKED_BIT | OBSOLETE_BIT)) != 0 {
            return None;
        }

        let locked: u64 = value | LOCKED_BIT;
        self.value
            .compare_exchange(value, locked, CAS_SUCCESS, CAS_FAILURE)
            .ok()?;
        fence(WRITE_ORD);

        Some(WriteGuard {
            lock: self,
            locked_value: locked,
            obsolete: false,
            _marker: PhantomData,
        })
    }
}
