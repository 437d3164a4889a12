//! Fatal contract violations.
//!
//! Misuse that leaves a primitive in an undefined state (unlocking a mutex
//! held by somebody else, destroying a locked mutex, unbalanced cancel
//! restore) is not reported as an error value. The process logs the
//! operation, the caller's location and a backtrace, then aborts.

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;

/// Report a contract violation by `operation` and abort the process.
///
/// `#[track_caller]` propagates through the public entry points, so the
/// reported location is the user's call site.
#[cold]
#[inline(never)]
#[track_caller]
pub fn violation(operation: &'static str, detail: fmt::Arguments<'_>) -> ! {
    let location = Location::caller();
    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");
    log::error!("contract violation: {operation} at {location}: {detail}");
    eprintln!(
        "frankenthread: fatal contract violation\n  operation: {operation}\n  detail:    {detail}\n  call site: {location}\n  thread:    {thread_name} (runtime id {})\nbacktrace:\n{}",
        crate::thread::current_id(),
        Backtrace::force_capture()
    );
    std::process::abort()
}
