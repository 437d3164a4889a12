//! Monotonic clock and cancellable sleeps.
//!
//! One clock source is selected when the runtime is set up and every read
//! goes through the function pointer chosen then. Sources, in auto-probe
//! order:
//!
//! | source       | POSIX backing              |
//! |--------------|----------------------------|
//! | `interrupt`  | `CLOCK_MONOTONIC`          |
//! | `tick`       | `CLOCK_MONOTONIC_COARSE`   |
//! | `multimedia` | `CLOCK_BOOTTIME`           |
//! | `perf`       | process-anchored `Instant` |
//! | `wall`       | `CLOCK_REALTIME`           |
//!
//! `wall` follows the calendar clock and may jump backwards; it is never a
//! safe monotonic source and is only picked when asked for.

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThreadError};
use crate::sys::host;

/// Microseconds on the runtime clock.
pub type Tick = i64;

pub const TICKS_PER_SEC: Tick = 1_000_000;
pub const TICKS_PER_MS: Tick = 1_000;

/// Whole ticks in `duration`, saturating at `Tick::MAX`.
#[must_use]
pub fn tick_from_duration(duration: Duration) -> Tick {
    Tick::try_from(duration.as_micros()).unwrap_or(Tick::MAX)
}

/// `ticks` as a duration; negative spans become zero.
#[must_use]
pub fn duration_from_tick(ticks: Tick) -> Duration {
    Duration::from_micros(u64::try_from(ticks).unwrap_or(0))
}

/// Clock backing [`now`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// First available of [`ClockSource::PROBE_ORDER`].
    #[default]
    Auto,
    Interrupt,
    Tick,
    Multimedia,
    Perf,
    Wall,
}

impl ClockSource {
    /// Preference order used by [`ClockSource::Auto`].
    pub const PROBE_ORDER: [Self; 5] = [
        Self::Interrupt,
        Self::Tick,
        Self::Multimedia,
        Self::Perf,
        Self::Wall,
    ];

    /// Parse from string (case-insensitive). Unknown names mean `Auto`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "interrupt" | "monotonic" => Self::Interrupt,
            "tick" | "coarse" => Self::Tick,
            "multimedia" | "boottime" => Self::Multimedia,
            "perf" | "instant" => Self::Perf,
            "wall" | "realtime" => Self::Wall,
            _ => Self::Auto,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Interrupt => "interrupt",
            Self::Tick => "tick",
            Self::Multimedia => "multimedia",
            Self::Perf => "perf",
            Self::Wall => "wall",
        }
    }

    /// Whether readings never decrease.
    #[must_use]
    pub const fn is_monotonic(self) -> bool {
        !matches!(self, Self::Wall)
    }

    fn host_clock(self) -> Option<host::ClockId> {
        match self {
            Self::Interrupt => host::CLOCK_MONOTONIC,
            Self::Tick => host::CLOCK_MONOTONIC_COARSE,
            Self::Multimedia => host::CLOCK_BOOTTIME,
            Self::Wall => host::CLOCK_REALTIME,
            Self::Auto | Self::Perf => None,
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn read_host(clock: Option<host::ClockId>) -> Tick {
    clock.and_then(host::clock_nanos).map_or(0, |ns| ns / 1_000)
}

fn read_interrupt() -> Tick {
    read_host(host::CLOCK_MONOTONIC)
}

fn read_tick() -> Tick {
    read_host(host::CLOCK_MONOTONIC_COARSE)
}

fn read_multimedia() -> Tick {
    read_host(host::CLOCK_BOOTTIME)
}

fn perf_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

fn read_perf() -> Tick {
    tick_from_duration(perf_anchor().elapsed())
}

fn read_wall() -> Tick {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since) => tick_from_duration(since),
        Err(before) => -tick_from_duration(before.duration()),
    }
}

/// Wall-clock time in ticks since the Unix epoch. Deadline domain of
/// daytime condition variables.
#[must_use]
pub fn wall_now() -> Tick {
    read_wall()
}

const RESOLUTION_SAMPLES: usize = 8;
const RESOLUTION_MAX_SPINS: usize = 1 << 20;

/// Smallest observable step of `read`, in ticks (at least 1).
fn measure_resolution(read: fn() -> Tick) -> Tick {
    let mut best = Tick::MAX;
    for _ in 0..RESOLUTION_SAMPLES {
        let start = read();
        let mut next = start;
        let mut spins = 0;
        while next == start && spins < RESOLUTION_MAX_SPINS {
            next = read();
            spins += 1;
        }
        if next > start {
            best = best.min(next - start);
        }
    }
    if best == Tick::MAX { 1 } else { best.max(1) }
}

/// The selected clock: a reader plus its cached resolution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    source: ClockSource,
    resolution: Tick,
    read: fn() -> Tick,
}

impl Clock {
    /// Select `requested`; `Auto` never fails.
    pub(crate) fn select(requested: ClockSource) -> Result<Self> {
        match requested {
            ClockSource::Auto => Ok(Self::auto()),
            source => Self::probe(source).ok_or(ThreadError::UnsupportedClock(source)),
        }
    }

    pub(crate) fn auto() -> Self {
        ClockSource::PROBE_ORDER
            .iter()
            .find_map(|&source| Self::probe(source))
            .unwrap_or_else(|| Self::measured(ClockSource::Perf, read_perf))
    }

    fn probe(source: ClockSource) -> Option<Self> {
        let read: fn() -> Tick = match source {
            ClockSource::Auto => return None,
            ClockSource::Interrupt => read_interrupt,
            ClockSource::Tick => read_tick,
            ClockSource::Multimedia => read_multimedia,
            ClockSource::Perf => return Some(Self::measured(source, read_perf)),
            ClockSource::Wall => return Some(Self::measured(source, read_wall)),
        };
        let id = source.host_clock()?;
        host::clock_nanos(id)?;
        let resolution = match host::clock_resolution_nanos(id) {
            Some(ns) => ((ns + 999) / 1_000).max(1),
            None => measure_resolution(read),
        };
        Some(Self {
            source,
            resolution,
            read,
        })
    }

    fn measured(source: ClockSource, read: fn() -> Tick) -> Self {
        Self {
            source,
            resolution: measure_resolution(read),
            read,
        }
    }

    pub(crate) fn source(&self) -> ClockSource {
        self.source
    }

    pub(crate) fn resolution(&self) -> Tick {
        self.resolution
    }

    pub(crate) fn read(&self) -> Tick {
        (self.read)()
    }
}

fn clock() -> &'static Clock {
    crate::runtime::get().clock()
}

/// Current time on the runtime clock.
#[must_use]
pub fn now() -> Tick {
    clock().read()
}

/// The source selected at setup.
#[must_use]
pub fn source() -> ClockSource {
    clock().source()
}

/// Resolution of the selected source, in ticks.
#[must_use]
pub fn resolution() -> Tick {
    clock().resolution()
}

/// Block until `deadline` on the runtime clock.
///
/// The deadline is pulled in by one resolution unit so coarse clocks do not
/// overshoot by a whole step. Returns early only through cancellation; this
/// is a cancellation point.
pub fn wait_until(deadline: Tick) {
    let clock = clock();
    let target = deadline.saturating_sub(clock.resolution());
    crate::cancel::test_cancel();
    loop {
        let now = clock.read();
        if now >= target {
            return;
        }
        crate::cancel::park_timeout(duration_from_tick(target - now));
        crate::cancel::test_cancel();
    }
}

/// Block for `delay`. Cancellation point.
pub fn sleep(delay: Duration) {
    wait_until(now().saturating_add(tick_from_duration(delay)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_clock_sources() {
        assert_eq!(ClockSource::from_str_loose("interrupt"), ClockSource::Interrupt);
        assert_eq!(ClockSource::from_str_loose("TICK"), ClockSource::Tick);
        assert_eq!(ClockSource::from_str_loose("boottime"), ClockSource::Multimedia);
        assert_eq!(ClockSource::from_str_loose(" perf "), ClockSource::Perf);
        assert_eq!(ClockSource::from_str_loose("realtime"), ClockSource::Wall);
        assert_eq!(ClockSource::from_str_loose("bogus"), ClockSource::Auto);
    }

    #[test]
    fn only_wall_is_non_monotonic() {
        for source in ClockSource::PROBE_ORDER {
            assert_eq!(source.is_monotonic(), source != ClockSource::Wall);
        }
    }

    #[test]
    fn tick_duration_conversions() {
        assert_eq!(tick_from_duration(Duration::from_millis(3)), 3 * TICKS_PER_MS);
        assert_eq!(duration_from_tick(TICKS_PER_SEC), Duration::from_secs(1));
        assert_eq!(duration_from_tick(-5), Duration::ZERO);
        assert_eq!(tick_from_duration(Duration::MAX), Tick::MAX);
    }

    #[test]
    fn auto_selects_a_monotonic_source() {
        let clock = Clock::auto();
        assert_ne!(clock.source(), ClockSource::Auto);
        assert!(clock.source().is_monotonic());
        assert!(clock.resolution() >= 1);
    }

    #[test]
    fn perf_and_wall_are_always_available() {
        assert!(Clock::select(ClockSource::Perf).is_ok());
        assert!(Clock::select(ClockSource::Wall).is_ok());
    }

    #[test]
    fn every_available_monotonic_source_is_non_decreasing() {
        for source in ClockSource::PROBE_ORDER {
            let Ok(clock) = Clock::select(source) else {
                continue;
            };
            if !source.is_monotonic() {
                continue;
            }
            let mut last = clock.read();
            for _ in 0..10_000 {
                let next = clock.read();
                assert!(next >= last, "{source} went backwards: {last} -> {next}");
                last = next;
            }
        }
    }

    #[test]
    fn wait_until_past_deadline_returns_immediately() {
        let start = Instant::now();
        wait_until(now() - TICKS_PER_SEC);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn sleep_waits_at_least_the_delay_minus_resolution() {
        let delay = Duration::from_millis(20);
        let start = now();
        sleep(delay);
        let elapsed = now() - start;
        assert!(elapsed + resolution() >= tick_from_duration(delay));
    }
}
