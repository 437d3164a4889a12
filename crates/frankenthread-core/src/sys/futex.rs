//! Linux private futex backend.

#![allow(unsafe_code)]

use std::sync::atomic::AtomicU32;
use std::time::Duration;

use super::AddrWait;

pub(super) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> AddrWait {
    let relative = timeout.map(|t| libc::timespec {
        tv_sec: libc::time_t::try_from(t.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_nsec: t.subsec_nanos() as libc::c_long,
    });
    let timeout_ptr = relative
        .as_ref()
        .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

    // SAFETY: `word` is a live, aligned 32-bit atomic for the duration of the
    // call; `timeout_ptr` is null or points at a timespec on this frame.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            timeout_ptr,
        )
    };
    if rc == 0 {
        return AddrWait::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ETIMEDOUT) => AddrWait::TimedOut,
        // EAGAIN: value already changed. EINTR: signal. Both look like a wakeup.
        _ => AddrWait::Woken,
    }
}

pub(super) fn wake(word: &AtomicU32, count: i32) {
    // SAFETY: Linux futex syscall with a valid userspace address.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            count,
        );
    }
}
