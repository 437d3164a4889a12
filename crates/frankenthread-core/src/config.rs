//! Runtime configuration.
//!
//! The configuration is handed to [`crate::runtime::setup`] once per process.
//! When nobody calls `setup`, the first runtime entry point builds one from
//! the environment:
//! - `FRANKENTHREAD_CLOCK`: `auto` (default), `interrupt`, `tick`,
//!   `multimedia`, `perf` or `wall`.
//! - `FRANKENTHREAD_RT_PRIORITY`: enable best-effort real-time priorities
//!   (`1`, `true`, `on`, `yes`).
//! - `FRANKENTHREAD_RT_OFFSET`: signed offset added to every base priority.
//!
//! Unknown values fall back to the defaults rather than failing.

use serde::{Deserialize, Serialize};

use crate::clock::ClockSource;
use crate::error::{Result, ThreadError};

pub const ENV_CLOCK: &str = "FRANKENTHREAD_CLOCK";
pub const ENV_RT_PRIORITY: &str = "FRANKENTHREAD_RT_PRIORITY";
pub const ENV_RT_OFFSET: &str = "FRANKENTHREAD_RT_OFFSET";

/// Largest magnitude accepted for [`RuntimeConfig::priority_offset`]. Matches
/// the span of `SCHED_RR` priorities on POSIX hosts.
pub const MAX_PRIORITY_OFFSET: i32 = 99;

/// Process-wide runtime options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Apply `SCHED_RR` priorities to runtime threads. Best effort: hosts
    /// that refuse (missing privileges) keep the default policy.
    pub enable_realtime_priority: bool,
    /// Added to every thread's base priority when real-time priorities are on.
    pub priority_offset: i32,
    /// Clock backing [`crate::clock::now`].
    pub clock_source: ClockSource,
}

impl RuntimeConfig {
    /// Build from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_CLOCK) {
            config.clock_source = ClockSource::from_str_loose(&raw);
        }
        if let Some(raw) = lookup(ENV_RT_PRIORITY) {
            config.enable_realtime_priority = parse_bool_loose(&raw).unwrap_or(false);
        }
        if let Some(raw) = lookup(ENV_RT_OFFSET) {
            config.priority_offset = raw
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|offset| offset.abs() <= MAX_PRIORITY_OFFSET)
                .unwrap_or(0);
        }
        config
    }

    /// Reject values no host could honor.
    pub fn validate(&self) -> Result<()> {
        if self.priority_offset.abs() > MAX_PRIORITY_OFFSET {
            return Err(ThreadError::InvalidConfig(format!(
                "priority_offset {} outside -{MAX_PRIORITY_OFFSET}..={MAX_PRIORITY_OFFSET}",
                self.priority_offset
            )));
        }
        Ok(())
    }
}

fn parse_bool_loose(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" | "enable" | "enabled" => Some(true),
        "0" | "false" | "off" | "no" | "disable" | "disabled" | "" => Some(false),
        _ => None,
    }
}
