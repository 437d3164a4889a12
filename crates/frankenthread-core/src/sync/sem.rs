//! Counting semaphores.
//!
//! The count lives in its own word; waiters sleep on a separate wake
//! sequence. Keeping them apart lets cancellation poke the sequence word
//! without corrupting the count. `post` wakes every waiter, so a waiter
//! that gets cancelled after waking can never swallow the only wakeup.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use super::WaitOutcome;
use crate::cancel;
use crate::clock::{self, Tick, duration_from_tick};
use crate::sys::{self, AddrWait};

/// `post` would push the count past `u32::MAX`. The count is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("semaphore count overflow")]
pub struct Overflow;

#[derive(Debug)]
pub struct Semaphore {
    count: AtomicU32,
    seq: AtomicU32,
    waiters: AtomicU32,
}

impl Semaphore {
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
            seq: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
        }
    }

    /// Current count. Advisory only.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Increment the count and wake waiters.
    pub fn post(&self) -> Result<(), Overflow> {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |count| {
                count.checked_add(1)
            })
            .map_err(|_| Overflow)?;
        self.seq.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            sys::wake_all(&self.seq);
        }
        Ok(())
    }

    /// Decrement the count if that needs no waiting.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |count| {
                count.checked_sub(1)
            })
            .is_ok()
    }

    /// Decrement the count, blocking while it is zero. Cancellation point.
    pub fn wait(&self) {
        let _ = self.wait_inner(None);
    }

    /// Like [`Semaphore::wait`] with an absolute deadline on the runtime clock.
    pub fn timed_wait(&self, deadline: Tick) -> WaitOutcome {
        self.wait_inner(Some(deadline))
    }

    /// Destroy the semaphore. No thread may be waiting on it.
    pub fn destroy(self) {}

    fn wait_inner(&self, deadline: Option<Tick>) -> WaitOutcome {
        cancel::test_cancel();
        loop {
            if self.try_wait() {
                return WaitOutcome::Signaled;
            }
            let timeout = match deadline {
                None => None,
                Some(deadline) => {
                    let remaining = deadline.saturating_sub(clock::now());
                    if remaining <= 0 {
                        return WaitOutcome::TimedOut;
                    }
                    Some(duration_from_tick(remaining))
                }
            };

            self.waiters.fetch_add(1, Ordering::SeqCst);
            let seq = self.seq.load(Ordering::SeqCst);
            if self.try_wait() {
                self.waiters.fetch_sub(1, Ordering::SeqCst);
                return WaitOutcome::Signaled;
            }
            let woke = cancel::wait_addr(&self.seq, seq, timeout);
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            cancel::test_cancel();

            if woke == AddrWait::TimedOut {
                return if self.try_wait() {
                    WaitOutcome::Signaled
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TICKS_PER_MS;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn admits_exactly_initial_value() {
        let sem = Semaphore::new(3);
        for _ in 0..3 {
            assert!(sem.try_wait());
        }
        assert!(!sem.try_wait());
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn overflow_leaves_count_intact() {
        let sem = Semaphore::new(u32::MAX - 1);
        assert_eq!(sem.post(), Ok(()));
        assert_eq!(sem.post(), Err(Overflow));
        assert_eq!(sem.value(), u32::MAX);
    }

    #[test]
    fn blocked_wait_resumes_after_post() {
        let sem = Arc::new(Semaphore::new(1));
        sem.wait();
        let done = Arc::new(AtomicBool::new(false));
        let waiter = {
            let sem = Arc::clone(&sem);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                sem.wait();
                done.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(!done.load(Ordering::SeqCst));
        sem.post().unwrap();
        waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn timed_wait_times_out_on_empty() {
        let sem = Semaphore::new(0);
        let deadline = clock::now() + 10 * TICKS_PER_MS;
        assert_eq!(sem.timed_wait(deadline), WaitOutcome::TimedOut);
        sem.post().unwrap();
        assert_eq!(sem.timed_wait(deadline), WaitOutcome::Signaled);
    }
}
