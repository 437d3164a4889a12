//! Sharded address-wait table.
//!
//! Emulates futex-style waits on hosts without a native primitive. Each
//! address hashes into one of [`BUCKETS`] buckets; a bucket is a lock plus a
//! condition variable shared by every address that lands in it. Sharing
//! means a wake on one address also wakes unrelated waiters of the same
//! bucket. They observe an unchanged word, treat it as spurious, and block
//! again.
//!
//! The table is compiled on every host so it can be exercised directly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, const_mutex};

use super::AddrWait;

/// Number of buckets. Power of two.
pub const BUCKETS: usize = 64;

struct Bucket {
    lock: Mutex<()>,
    cond: Condvar,
}

static TABLE: [Bucket; BUCKETS] = [const {
    Bucket {
        lock: const_mutex(()),
        cond: Condvar::new(),
    }
}; BUCKETS];

/// Bucket index for an address. Low bits are dropped: words are 4-byte
/// aligned and neighbours often live in the same cache line.
#[must_use]
pub fn bucket_index(addr: usize) -> usize {
    let mixed = (addr >> 2) ^ (addr >> 9) ^ (addr >> 17);
    mixed & (BUCKETS - 1)
}

fn bucket(word: &AtomicU32) -> &'static Bucket {
    &TABLE[bucket_index(word.as_ptr() as usize)]
}

/// Block while `word == expected`, for at most `timeout`.
pub fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> AddrWait {
    let bucket = bucket(word);
    let mut guard = bucket.lock.lock();
    // Re-checked under the bucket lock: a waker must take the same lock
    // after changing the word, so the wakeup cannot slip in between.
    if word.load(Ordering::Acquire) != expected {
        return AddrWait::Woken;
    }
    match timeout {
        None => {
            bucket.cond.wait(&mut guard);
            AddrWait::Woken
        }
        Some(timeout) => {
            if bucket.cond.wait_for(&mut guard, timeout).timed_out() {
                AddrWait::TimedOut
            } else {
                AddrWait::Woken
            }
        }
    }
}

/// Wake every waiter in `word`'s bucket.
///
/// There is no "wake one" here: the single waiter woken could belong to a
/// different address sharing the bucket.
pub fn wake_all(word: &AtomicU32) {
    let bucket = bucket(word);
    let _guard = bucket.lock.lock();
    bucket.cond.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn bucket_index_stays_in_range() {
        for addr in (0..1 << 20).step_by(4) {
            assert!(bucket_index(addr) < BUCKETS);
        }
    }

    #[test]
    fn adjacent_words_spread_across_buckets() {
        let distinct: std::collections::HashSet<usize> =
            (0..BUCKETS).map(|i| bucket_index(0x1000 + i * 4)).collect();
        assert!(distinct.len() > BUCKETS / 2);
    }

    #[test]
    fn mismatch_returns_without_blocking() {
        let word = AtomicU32::new(1);
        assert_eq!(wait(&word, 0, None), AddrWait::Woken);
    }

    #[test]
    fn timeout_elapses() {
        let word = AtomicU32::new(0);
        let start = Instant::now();
        assert_eq!(
            wait(&word, 0, Some(Duration::from_millis(20))),
            AddrWait::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn store_then_wake_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            std::thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    wait(&word, 0, None);
                }
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        word.store(1, Ordering::Release);
        wake_all(&word);
        waiter.join().unwrap();
    }
}
