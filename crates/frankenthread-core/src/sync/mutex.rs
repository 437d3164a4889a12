//! Fast and recursive mutexes.
//!
//! The lock word follows the classic three-state futex protocol:
//! `0` unlocked, `1` locked without waiters, `2` locked with (possible)
//! waiters. Unlock only issues a wake when it swaps out a `2`.
//!
//! Ownership is tracked by runtime thread id so misuse is caught: unlocking
//! a mutex the caller does not hold, relocking a fast mutex from its owner,
//! or dropping a mutex that is still locked all abort through
//! [`crate::contract::violation`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::TryLock;
use crate::contract;
use crate::sys;
use crate::thread::current_id;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

const NO_OWNER: u64 = 0;

// ---------------------------------------------------------------------------
// Lock word
// ---------------------------------------------------------------------------

static SPIN_BRANCHES: AtomicU64 = AtomicU64::new(0);
static WAIT_BRANCHES: AtomicU64 = AtomicU64::new(0);
static WAKE_BRANCHES: AtomicU64 = AtomicU64::new(0);

/// Process-wide counters of the slow paths taken by [`Mutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutexCounters {
    /// Lock attempts that found the word taken.
    pub spins: u64,
    /// Times a locker parked on the word.
    pub waits: u64,
    /// Unlocks that had to wake a waiter.
    pub wakes: u64,
}

/// Snapshot the slow-path counters.
#[must_use]
pub fn mutex_counters() -> MutexCounters {
    MutexCounters {
        spins: SPIN_BRANCHES.load(Ordering::Relaxed),
        waits: WAIT_BRANCHES.load(Ordering::Relaxed),
        wakes: WAKE_BRANCHES.load(Ordering::Relaxed),
    }
}

fn lock_word(word: &AtomicU32) {
    if word
        .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
    {
        return;
    }

    SPIN_BRANCHES.fetch_add(1, Ordering::Relaxed);
    loop {
        let observed = word.load(Ordering::Relaxed);
        if observed == UNLOCKED {
            // Take it as contended: somebody else may still be parked.
            if word
                .compare_exchange(UNLOCKED, CONTENDED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            continue;
        }
        if observed == LOCKED
            && word
                .compare_exchange(LOCKED, CONTENDED, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            continue;
        }
        WAIT_BRANCHES.fetch_add(1, Ordering::Relaxed);
        sys::wait(word, CONTENDED);
    }
}

fn try_lock_word(word: &AtomicU32) -> bool {
    word.compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
}

fn unlock_word(word: &AtomicU32) {
    if word.swap(UNLOCKED, Ordering::Release) == CONTENDED {
        WAKE_BRANCHES.fetch_add(1, Ordering::Relaxed);
        sys::wake_one(word);
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Locking discipline chosen at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKind {
    /// Exactly one lock per unlock; relocking from the owner is fatal.
    Fast,
    /// The owner may nest locks; the matching final unlock releases.
    Recursive,
}

/// A mutual-exclusion lock that protects no data of its own.
///
/// Lock and unlock are explicit, the way condition variables and cleanup
/// handlers need them. [`Mutex::guard`] gives a scoped alternative.
#[derive(Debug)]
pub struct Mutex {
    word: AtomicU32,
    owner: AtomicU64,
    depth: AtomicU32,
    kind: MutexKind,
}

impl Mutex {
    #[must_use]
    pub const fn new_fast() -> Self {
        Self::with_kind(MutexKind::Fast)
    }

    #[must_use]
    pub const fn new_recursive() -> Self {
        Self::with_kind(MutexKind::Recursive)
    }

    #[must_use]
    pub const fn with_kind(kind: MutexKind) -> Self {
        Self {
            word: AtomicU32::new(UNLOCKED),
            owner: AtomicU64::new(NO_OWNER),
            depth: AtomicU32::new(0),
            kind,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    /// Acquire the mutex, blocking as long as needed. Not a cancellation point.
    #[track_caller]
    pub fn lock(&self) {
        let me = current_id();
        if self.owner.load(Ordering::Relaxed) == me {
            match self.kind {
                MutexKind::Recursive => {
                    self.depth.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                MutexKind::Fast => contract::violation(
                    "mutex lock",
                    format_args!("fast mutex relocked by its owner (thread {me})"),
                ),
            }
        }
        lock_word(&self.word);
        self.take_ownership(me);
    }

    /// Acquire the mutex only if that needs no waiting.
    pub fn try_lock(&self) -> TryLock {
        let me = current_id();
        if self.kind == MutexKind::Recursive && self.owner.load(Ordering::Relaxed) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return TryLock::Locked;
        }
        if try_lock_word(&self.word) {
            self.take_ownership(me);
            TryLock::Locked
        } else {
            TryLock::Busy
        }
    }

    /// Release one level of ownership.
    ///
    /// Aborts if the caller does not hold the mutex.
    #[track_caller]
    pub fn unlock(&self) {
        let me = current_id();
        if self.owner.load(Ordering::Relaxed) != me {
            contract::violation(
                "mutex unlock",
                format_args!("mutex not held by the calling thread {me}"),
            );
        }
        if self.depth.fetch_sub(1, Ordering::Relaxed) > 1 {
            return;
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        unlock_word(&self.word);
    }

    /// Whether the calling thread holds the mutex.
    #[must_use]
    pub fn is_locked_by_current(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_id()
    }

    /// Whether any thread holds the mutex. Advisory only.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) != UNLOCKED
    }

    /// Lock and return a guard that unlocks on drop, including during unwinds.
    #[track_caller]
    pub fn guard(&self) -> MutexGuard<'_> {
        self.lock();
        MutexGuard { mutex: self }
    }

    /// Destroy the mutex. Aborts if it is still locked.
    #[track_caller]
    pub fn destroy(self) {
        self.check_unlocked();
        std::mem::forget(self);
    }

    /// Nesting depth held by the owner (0 when unlocked).
    pub(crate) fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    fn take_ownership(&self, me: u64) {
        self.owner.store(me, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
    }

    #[track_caller]
    fn check_unlocked(&self) {
        if self.word.load(Ordering::Acquire) != UNLOCKED {
            contract::violation(
                "mutex destroy",
                format_args!(
                    "mutex destroyed while locked by thread {}",
                    self.owner.load(Ordering::Relaxed)
                ),
            );
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new_fast()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        // A panic unwinding past a held lock is already reported; do not
        // turn it into an abort.
        if !std::thread::panicking() {
            self.check_unlocked();
        }
    }
}

/// Scoped ownership of a [`Mutex`].
#[derive(Debug)]
#[must_use = "the mutex unlocks as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl MutexGuard<'_> {
    /// The guarded mutex.
    #[must_use]
    pub fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
