//! Condition variables.
//!
//! A condition variable is a wake-sequence word: signalling bumps it and
//! wakes, waiting samples it before releasing the mutex and sleeps while it
//! is unchanged. A signal that lands between the unlock and the sleep
//! changes the word, so the sleep returns at once and nothing is lost.
//!
//! Waits are cancellation points. A waiter that is cancelled re-acquires
//! the mutex first, so cleanup handlers run with the mutex held.

use std::sync::atomic::{AtomicU32, Ordering};

use super::WaitOutcome;
use super::mutex::Mutex;
use crate::cancel;
use crate::clock::{self, Tick, duration_from_tick};
use crate::contract;
use crate::sys::{self, AddrWait};

/// Clock domain of [`Condvar::timed_wait`] deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDomain {
    /// The runtime clock ([`clock::now`]).
    Monotonic,
    /// Calendar time ([`clock::wall_now`]).
    Daytime,
}

#[derive(Debug)]
pub struct Condvar {
    seq: AtomicU32,
    domain: ClockDomain,
}

impl Condvar {
    /// Condition variable with monotonic deadlines.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_domain(ClockDomain::Monotonic)
    }

    /// Condition variable with wall-clock deadlines.
    #[must_use]
    pub const fn new_daytime() -> Self {
        Self::with_domain(ClockDomain::Daytime)
    }

    #[must_use]
    pub const fn with_domain(domain: ClockDomain) -> Self {
        Self {
            seq: AtomicU32::new(0),
            domain,
        }
    }

    #[must_use]
    pub fn domain(&self) -> ClockDomain {
        self.domain
    }

    /// Current time in this variable's deadline domain.
    #[must_use]
    pub fn now(&self) -> Tick {
        match self.domain {
            ClockDomain::Monotonic => clock::now(),
            ClockDomain::Daytime => clock::wall_now(),
        }
    }

    /// Wake at least one waiter, if any.
    pub fn signal(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        sys::wake_one(&self.seq);
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        sys::wake_all(&self.seq);
    }

    /// Release `mutex`, wait for a wakeup, re-acquire `mutex`.
    ///
    /// Spurious wakeups happen; callers loop on their predicate.
    #[track_caller]
    pub fn wait(&self, mutex: &Mutex) {
        let _ = self.wait_inner(mutex, None);
    }

    /// Like [`Condvar::wait`] with an absolute deadline in [`Condvar::domain`].
    #[track_caller]
    pub fn timed_wait(&self, mutex: &Mutex, deadline: Tick) -> WaitOutcome {
        self.wait_inner(mutex, Some(deadline))
    }

    /// Destroy the variable. No thread may be waiting on it.
    pub fn destroy(self) {}

    #[track_caller]
    fn wait_inner(&self, mutex: &Mutex, deadline: Option<Tick>) -> WaitOutcome {
        if mutex.depth() > 1 {
            contract::violation(
                "condition wait",
                format_args!("recursive mutex held {} levels deep", mutex.depth()),
            );
        }
        cancel::test_cancel();

        let seq = self.seq.load(Ordering::Acquire);
        mutex.unlock();
        let outcome = match deadline {
            None => {
                cancel::wait_addr(&self.seq, seq, None);
                WaitOutcome::Signaled
            }
            Some(deadline) => {
                let remaining = deadline.saturating_sub(self.now());
                if remaining <= 0 {
                    WaitOutcome::TimedOut
                } else {
                    match cancel::wait_addr(&self.seq, seq, Some(duration_from_tick(remaining))) {
                        AddrWait::Woken => WaitOutcome::Signaled,
                        AddrWait::TimedOut => WaitOutcome::TimedOut,
                    }
                }
            }
        };
        mutex.lock();

        if cancel::is_pending() {
            // The wake we may have consumed belongs to another waiter.
            self.signal();
            cancel::test_cancel();
        }
        outcome
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TICKS_PER_MS;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct Queue {
        lock: Mutex,
        ready: Condvar,
        items: parking_lot::Mutex<VecDeque<u32>>,
    }

    #[test]
    fn timed_wait_expires() {
        let m = Mutex::new_fast();
        let cv = Condvar::new();
        m.lock();
        let deadline = clock::now() + 10 * TICKS_PER_MS;
        let mut outcome = cv.timed_wait(&m, deadline);
        while outcome == WaitOutcome::Signaled {
            outcome = cv.timed_wait(&m, deadline);
        }
        assert!(m.is_locked_by_current());
        assert!(clock::now() + clock::resolution() >= deadline);
        m.unlock();
    }

    #[test]
    fn past_deadline_times_out_without_sleeping() {
        let m = Mutex::new_fast();
        let cv = Condvar::new_daytime();
        m.lock();
        assert_eq!(cv.timed_wait(&m, cv.now() - 1), WaitOutcome::TimedOut);
        m.unlock();
    }

    #[test]
    fn daytime_domain_reads_wall_clock() {
        let cv = Condvar::new_daytime();
        assert_eq!(cv.domain(), ClockDomain::Daytime);
        // Anything after 2001 is clearly calendar time, not uptime.
        assert!(cv.now() > 1_000_000_000 * clock::TICKS_PER_SEC);
    }

    #[test]
    fn signal_wakes_waiter() {
        let q = Arc::new(Queue {
            lock: Mutex::new_fast(),
            ready: Condvar::new(),
            items: parking_lot::Mutex::new(VecDeque::new()),
        });
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                q.lock.lock();
                loop {
                    if let Some(item) = q.items.lock().pop_front() {
                        q.lock.unlock();
                        return item;
                    }
                    q.ready.wait(&q.lock);
                }
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        q.lock.lock();
        q.items.lock().push_back(42);
        q.ready.signal();
        q.lock.unlock();
        assert_eq!(consumer.join().unwrap(), 42);
    }
}
