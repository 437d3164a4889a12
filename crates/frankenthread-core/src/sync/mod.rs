//! Synchronization primitives.
//!
//! Every blocking primitive here sits on the address-wait layer in
//! [`crate::sys`]. Mutex acquisition is never a cancellation point; condition
//! waits, semaphore waits and contended rwlock acquisition are.

pub mod cond;
pub mod mutex;
pub mod once;
pub mod rwlock;
pub mod sem;
pub mod static_mutex;

pub use cond::{ClockDomain, Condvar};
pub use mutex::{Mutex, MutexCounters, MutexGuard, MutexKind, mutex_counters};
pub use once::Once;
pub use rwlock::RwLock;
pub use sem::{Overflow, Semaphore};
pub use static_mutex::StaticMutex;

/// Result of a non-blocking lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum TryLock {
    Locked,
    Busy,
}

/// Result of a deadline-bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum WaitOutcome {
    /// Woken before the deadline. May be spurious: re-check the predicate.
    Signaled,
    TimedOut,
}
