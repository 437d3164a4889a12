//! Read/write locks.
//!
//! Built from a [`Mutex`] and a [`Condvar`] guarding a state word: a
//! positive value counts readers, [`WRITER`] marks an exclusive writer.
//! Readers only wait while a writer *holds* the lock, never while one is
//! waiting, which is what makes read locks reentrant. The flip side: a
//! thread that keeps nesting read locks can starve a waiting writer
//! forever.
//!
//! Contended acquisition waits on the condition variable and is therefore
//! a cancellation point. A cancelled waiter releases the internal mutex
//! before the thread's own cleanup records run, so those may still unlock
//! read locks they hold on the same `RwLock`.
//!
//! Each thread keeps a small table of the read locks it holds, so a read
//! unlock from a thread holding none is caught as a contract violation.
//! Holds are keyed by address: a lock must not move while read-locked.

use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::cond::Condvar;
use super::mutex::Mutex;
use crate::cancel;
use crate::contract;
use crate::thread::current_id;

const WRITER: i64 = -1;
const FREE: i64 = 0;

thread_local! {
    /// `(lock address, depth)` for every read lock the thread holds.
    static READ_HOLDS: RefCell<Vec<(usize, u32)>> = const { RefCell::new(Vec::new()) };
}

fn note_read_hold(addr: usize) {
    let _ = READ_HOLDS.try_with(|holds| {
        let mut holds = holds.borrow_mut();
        match holds.iter_mut().find(|(held, _)| *held == addr) {
            Some((_, depth)) => *depth += 1,
            None => holds.push((addr, 1)),
        }
    });
}

/// Drop one read hold on `addr`. `false` if the thread holds none; `true`
/// as well when the table is already torn down.
fn release_read_hold(addr: usize) -> bool {
    READ_HOLDS
        .try_with(|holds| {
            let mut holds = holds.borrow_mut();
            let Some(pos) = holds.iter().position(|(held, _)| *held == addr) else {
                return false;
            };
            holds[pos].1 -= 1;
            if holds[pos].1 == 0 {
                holds.swap_remove(pos);
            }
            true
        })
        .unwrap_or(true)
}

#[derive(Debug, Default)]
pub struct RwLock {
    mutex: Mutex,
    wait: Condvar,
    state: AtomicI64,
    writer: AtomicU64,
}

impl RwLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mutex: Mutex::new_fast(),
            wait: Condvar::new(),
            state: AtomicI64::new(FREE),
            writer: AtomicU64::new(0),
        }
    }

    /// Acquire shared access. Reentrant for readers.
    pub fn read_lock(&self) {
        self.mutex.lock();
        self.wait_while(|state| state == WRITER);
        self.state.fetch_add(1, Ordering::Relaxed);
        self.mutex.unlock();
        note_read_hold(self.addr());
    }

    fn addr(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }

    /// Acquire exclusive access. Not reentrant.
    #[track_caller]
    pub fn write_lock(&self) {
        let me = current_id();
        self.mutex.lock();
        if self.state.load(Ordering::Relaxed) == WRITER && self.writer.load(Ordering::Relaxed) == me
        {
            self.mutex.unlock();
            contract::violation(
                "rwlock write_lock",
                format_args!("write lock re-acquired by its holder (thread {me})"),
            );
        }
        self.wait_while(|state| state != FREE);
        self.state.store(WRITER, Ordering::Relaxed);
        self.writer.store(me, Ordering::Relaxed);
        self.mutex.unlock();
    }

    /// Wait on the condition variable while `blocked(state)`. The internal
    /// mutex is held on entry and on return.
    fn wait_while(&self, blocked: impl Fn(i64) -> bool) {
        if !blocked(self.state.load(Ordering::Relaxed)) {
            return;
        }
        cancel::with_cleanup(
            || self.mutex.unlock(),
            || {
                while blocked(self.state.load(Ordering::Relaxed)) {
                    self.wait.wait(&self.mutex);
                }
            },
        );
    }

    /// Release one read lock or the write lock.
    ///
    /// Aborts if the lock is not held, or if it is write-locked by another
    /// thread.
    #[track_caller]
    pub fn unlock(&self) {
        let me = current_id();
        let guard = self.mutex.guard();
        match self.state.load(Ordering::Relaxed) {
            FREE => {
                drop(guard);
                contract::violation("rwlock unlock", format_args!("lock is not held"));
            }
            WRITER => {
                let writer = self.writer.load(Ordering::Relaxed);
                if writer != me {
                    drop(guard);
                    contract::violation(
                        "rwlock unlock",
                        format_args!("write lock held by thread {writer}, not {me}"),
                    );
                }
                self.writer.store(0, Ordering::Relaxed);
                self.state.store(FREE, Ordering::Relaxed);
                self.wait.broadcast();
            }
            readers => {
                if !release_read_hold(self.addr()) {
                    drop(guard);
                    contract::violation(
                        "rwlock unlock",
                        format_args!("thread {me} holds no read lock ({readers} held by others)"),
                    );
                }
                self.state.store(readers - 1, Ordering::Relaxed);
                if readers == 1 {
                    self.wait.broadcast();
                }
            }
        }
    }

    /// Number of read locks held, or `None` while write-locked.
    #[must_use]
    pub fn readers(&self) -> Option<u64> {
        let _guard = self.mutex.guard();
        u64::try_from(self.state.load(Ordering::Relaxed)).ok()
    }

    /// Destroy the lock. Aborts if it is still held.
    #[track_caller]
    pub fn destroy(self) {
        if self.state.load(Ordering::Relaxed) != FREE {
            contract::violation("rwlock destroy", format_args!("lock destroyed while held"));
        }
    }
}
