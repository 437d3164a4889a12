//! Host abstraction.
//!
//! Everything that talks to the operating system lives under this module:
//!
//! - **Address waits**: block while a 32-bit word still holds an expected
//!   value, wake one or all waiters of that word. Linux uses the private
//!   futex syscall ([`futex`]); every other host goes through the sharded
//!   [`wait_table`].
//! - **Host services** ([`host`]): termination-signal masking, real-time
//!   scheduling hints, raw clock reads. POSIX hosts use `libc`; the portable
//!   backend degrades to std-only behavior.
//!
//! Callers always re-check their predicate after a wait returns: every
//! backend is allowed to wake spuriously.

#[cfg(target_os = "linux")]
mod futex;
pub mod wait_table;

#[cfg(unix)]
pub(crate) mod posix;
#[cfg(not(unix))]
pub(crate) mod portable;

#[cfg(unix)]
pub(crate) use posix as host;
#[cfg(not(unix))]
pub(crate) use portable as host;

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Why an address wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrWait {
    /// Woken, interrupted, or the word no longer held the expected value.
    Woken,
    /// The timeout elapsed first.
    TimedOut,
}

/// Block while `word == expected`.
pub fn wait(word: &AtomicU32, expected: u32) {
    let _ = wait_for(word, expected, None);
}

/// Block while `word == expected`, for at most `timeout`.
///
/// Returns `true` unless the timeout elapsed.
pub fn wait_timeout(word: &AtomicU32, expected: u32, timeout: Duration) -> bool {
    wait_for(word, expected, Some(timeout)) == AddrWait::Woken
}

pub(crate) fn wait_for(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> AddrWait {
    #[cfg(target_os = "linux")]
    {
        futex::wait(word, expected, timeout)
    }
    #[cfg(not(target_os = "linux"))]
    {
        wait_table::wait(word, expected, timeout)
    }
}

/// Wake at most one waiter blocked on `word`.
pub fn wake_one(word: &AtomicU32) {
    #[cfg(target_os = "linux")]
    futex::wake(word, 1);
    #[cfg(not(target_os = "linux"))]
    wait_table::wake_all(word);
}

/// Wake every waiter blocked on `word`.
pub fn wake_all(word: &AtomicU32) {
    #[cfg(target_os = "linux")]
    futex::wake(word, i32::MAX);
    #[cfg(not(target_os = "linux"))]
    wait_table::wake_all(word);
}
