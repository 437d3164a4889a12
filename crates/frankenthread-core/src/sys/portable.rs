//! Host services for non-POSIX targets.
//!
//! Only the process-anchored and wall clocks exist here; signal masking and
//! real-time scheduling are no-ops.

pub type ClockId = u32;

pub const CLOCK_MONOTONIC: Option<ClockId> = None;
pub const CLOCK_MONOTONIC_COARSE: Option<ClockId> = None;
pub const CLOCK_BOOTTIME: Option<ClockId> = None;
pub const CLOCK_REALTIME: Option<ClockId> = None;

pub fn clock_nanos(_clock: ClockId) -> Option<i64> {
    None
}

pub fn clock_resolution_nanos(_clock: ClockId) -> Option<i64> {
    None
}

pub struct SignalMaskGuard;

pub fn mask_termination_signals() -> SignalMaskGuard {
    SignalMaskGuard
}

pub fn native_self() -> usize {
    0
}

/// Unsupported: reports `ENOSYS`.
pub fn set_realtime_priority(_native: usize, _priority: i32) -> Result<i32, i32> {
    Err(38)
}
