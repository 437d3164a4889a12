//! POSIX host services.

#![allow(unsafe_code)]

use std::mem::MaybeUninit;

/// Raw clock identifier.
pub type ClockId = libc::clockid_t;

pub const CLOCK_MONOTONIC: Option<ClockId> = Some(libc::CLOCK_MONOTONIC);
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const CLOCK_MONOTONIC_COARSE: Option<ClockId> = Some(libc::CLOCK_MONOTONIC_COARSE);
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const CLOCK_MONOTONIC_COARSE: Option<ClockId> = None;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const CLOCK_BOOTTIME: Option<ClockId> = Some(libc::CLOCK_BOOTTIME);
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const CLOCK_BOOTTIME: Option<ClockId> = None;
pub const CLOCK_REALTIME: Option<ClockId> = Some(libc::CLOCK_REALTIME);

fn timespec_nanos(ts: &libc::timespec) -> i64 {
    (ts.tv_sec as i64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as i64)
}

/// Read `clock` in nanoseconds, or `None` if the host rejects it.
pub fn clock_nanos(clock: ClockId) -> Option<i64> {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: `ts` is a valid out-pointer for one timespec.
    let rc = unsafe { libc::clock_gettime(clock, ts.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: clock_gettime returned 0 and filled `ts`.
    let ts = unsafe { ts.assume_init() };
    Some(timespec_nanos(&ts))
}

/// Advertised resolution of `clock` in nanoseconds.
pub fn clock_resolution_nanos(clock: ClockId) -> Option<i64> {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: `ts` is a valid out-pointer for one timespec.
    let rc = unsafe { libc::clock_getres(clock, ts.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: clock_getres returned 0 and filled `ts`.
    let ts = unsafe { ts.assume_init() };
    Some(timespec_nanos(&ts)).filter(|&ns| ns > 0)
}

/// Blocks process-termination signals on the calling thread until dropped.
///
/// Held across thread creation so the child inherits the blocked set and
/// those signals are delivered to the threads that expect them.
pub struct SignalMaskGuard {
    previous: libc::sigset_t,
    active: bool,
}

const TERMINATION_SIGNALS: [libc::c_int; 5] = [
    libc::SIGINT,
    libc::SIGHUP,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGCHLD,
];

pub fn mask_termination_signals() -> SignalMaskGuard {
    // SAFETY: sigset_t is plain data; sigemptyset/sigaddset initialize it and
    // pthread_sigmask only touches the calling thread's mask.
    unsafe {
        let mut blocked = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(blocked.as_mut_ptr());
        let mut blocked = blocked.assume_init();
        for signal in TERMINATION_SIGNALS {
            libc::sigaddset(&mut blocked, signal);
        }
        let mut previous = MaybeUninit::<libc::sigset_t>::zeroed().assume_init();
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &blocked, &mut previous);
        if rc != 0 {
            log::debug!("pthread_sigmask(SIG_BLOCK) failed: errno {rc}");
        }
        SignalMaskGuard {
            previous,
            active: rc == 0,
        }
    }
}

impl Drop for SignalMaskGuard {
    fn drop(&mut self) {
        if self.active {
            // SAFETY: restores the mask captured by `mask_termination_signals`.
            unsafe {
                libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, std::ptr::null_mut());
            }
        }
    }
}

/// True if `signal` is blocked on the calling thread.
#[cfg(test)]
pub fn signal_blocked(signal: libc::c_int) -> bool {
    // SAFETY: queries the calling thread's mask into a zeroed sigset_t.
    unsafe {
        let mut current = MaybeUninit::<libc::sigset_t>::zeroed().assume_init();
        if libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), &mut current) != 0 {
            return false;
        }
        libc::sigismember(&current, signal) == 1
    }
}

/// The calling thread's native handle.
pub fn native_self() -> usize {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as usize }
}

/// Switch `native` to `SCHED_RR` at `priority`, clamped to the policy range.
///
/// Returns the errno on failure (typically `EPERM` without privileges).
pub fn set_realtime_priority(native: usize, priority: i32) -> Result<i32, i32> {
    // SAFETY: the sched_get_priority_* calls have no preconditions.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_RR),
            libc::sched_get_priority_max(libc::SCHED_RR),
        )
    };
    let clamped = if min <= max {
        priority.clamp(min, max)
    } else {
        priority
    };
    // SAFETY: sched_param is plain data; only sched_priority is meaningful.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = clamped;
    // SAFETY: `native` came from pthread_self/as_pthread_t of a thread that is
    // still joinable or running.
    let rc = unsafe {
        libc::pthread_setschedparam(native as libc::pthread_t, libc::SCHED_RR, &param)
    };
    if rc == 0 { Ok(clamped) } else { Err(rc) }
}
