//! Statically initialized mutexes.
//!
//! For hosts whose native mutexes cannot be constant-initialized, every
//! static mutex shares one process-wide lock and one condition variable.
//! The per-mutex record is just `{locked, contention}` and is only touched
//! under that lock. Unlock broadcasts only when somebody is waiting.
//!
//! Throughput is poor under contention (every static mutex wakes every
//! waiter of every other static mutex), which is acceptable for the rare
//! one-time-init paths these are meant for.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, const_mutex};

use super::TryLock;
use crate::contract;
use crate::thread::current_id;

static TABLE_LOCK: Mutex<()> = const_mutex(());
static TABLE_WAIT: Condvar = Condvar::new();

/// A mutex usable in `static` items.
#[derive(Debug)]
pub struct StaticMutex {
    locked: AtomicBool,
    contention: AtomicU32,
    owner: AtomicU64,
}

impl StaticMutex {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            contention: AtomicU32::new(0),
            owner: AtomicU64::new(0),
        }
    }

    /// Aborts if the caller already holds the mutex.
    #[track_caller]
    pub fn lock(&self) {
        let me = current_id();
        let mut table = TABLE_LOCK.lock();
        if self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == me {
            drop(table);
            contract::violation(
                "static mutex lock",
                format_args!("static mutex re-locked by its holder (thread {me})"),
            );
        }
        while self.locked.load(Ordering::Relaxed) {
            self.contention.fetch_add(1, Ordering::Relaxed);
            TABLE_WAIT.wait(&mut table);
            self.contention.fetch_sub(1, Ordering::Relaxed);
        }
        self.locked.store(true, Ordering::Relaxed);
        self.owner.store(me, Ordering::Relaxed);
    }

    pub fn try_lock(&self) -> TryLock {
        let _table = TABLE_LOCK.lock();
        if self.locked.load(Ordering::Relaxed) {
            return TryLock::Busy;
        }
        self.locked.store(true, Ordering::Relaxed);
        self.owner.store(current_id(), Ordering::Relaxed);
        TryLock::Locked
    }

    /// Aborts if the caller does not hold the mutex.
    #[track_caller]
    pub fn unlock(&self) {
        let me = current_id();
        let table = TABLE_LOCK.lock();
        if !self.locked.load(Ordering::Relaxed) || self.owner.load(Ordering::Relaxed) != me {
            drop(table);
            contract::violation(
                "static mutex unlock",
                format_args!("static mutex not held by the calling thread {me}"),
            );
        }
        self.locked.store(false, Ordering::Relaxed);
        self.owner.store(0, Ordering::Relaxed);
        if self.contention.load(Ordering::Relaxed) > 0 {
            TABLE_WAIT.notify_all();
        }
    }

    /// Number of threads currently waiting for this mutex.
    #[must_use]
    pub fn contention(&self) -> u32 {
        let _table = TABLE_LOCK.lock();
        self.contention.load(Ordering::Relaxed)
    }
}

impl Default for StaticMutex {
    fn default() -> Self {
        Self::new()
    }
}
