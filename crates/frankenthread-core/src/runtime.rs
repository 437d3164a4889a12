//! Process-wide runtime state.
//!
//! [`setup`] may be called once, before or instead of the lazy path. The
//! first runtime entry point that needs the state without a prior `setup`
//! builds it from [`RuntimeConfig::from_env`]. Either way the state is
//! immutable afterwards and lives until the process exits.

use std::sync::OnceLock;

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::error::{Result, ThreadError};
use crate::thread::Priority;

pub(crate) struct Runtime {
    config: RuntimeConfig,
    clock: Clock,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    fn build(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let clock = Clock::select(config.clock_source)?;
        Ok(Self { config, clock })
    }

    fn from_env() -> Self {
        let config = RuntimeConfig::from_env();
        let runtime = Self::build(config).unwrap_or_else(|err| {
            log::warn!("environment configuration rejected ({err}); using defaults");
            Self {
                config: RuntimeConfig::default(),
                clock: Clock::auto(),
            }
        });
        runtime.log_selection("environment");
        runtime
    }

    fn log_selection(&self, origin: &str) {
        log::debug!(
            "runtime initialized from {origin}: clock={} resolution={}us realtime_priority={} priority_offset={}",
            self.clock.source(),
            self.clock.resolution(),
            self.config.enable_realtime_priority,
            self.config.priority_offset,
        );
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.clock
    }

    /// `SCHED_RR` priority for a thread of `base` priority, if real-time
    /// priorities are enabled.
    pub(crate) fn realtime_priority(&self, base: Priority) -> Option<i32> {
        self.config
            .enable_realtime_priority
            .then(|| base.0.saturating_add(self.config.priority_offset))
    }
}

pub(crate) fn get() -> &'static Runtime {
    RUNTIME.get_or_init(Runtime::from_env)
}

/// Initialize the runtime with `config`.
///
/// Fails with [`ThreadError::AlreadyInitialized`] if `setup` already ran or
/// a runtime entry point already initialized from the environment; the
/// existing state is kept.
pub fn setup(config: RuntimeConfig) -> Result<()> {
    if RUNTIME.get().is_some() {
        log::warn!("runtime setup ignored: already initialized");
        return Err(ThreadError::AlreadyInitialized);
    }
    let runtime = Runtime::build(config)?;
    let mut installed = false;
    let active = RUNTIME.get_or_init(|| {
        installed = true;
        runtime
    });
    if !installed {
        log::warn!("runtime setup ignored: lost initialization race");
        return Err(ThreadError::AlreadyInitialized);
    }
    active.log_selection("setup");
    Ok(())
}

/// Whether the runtime state exists yet.
#[must_use]
pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

/// The active configuration, initializing from the environment if needed.
#[must_use]
pub fn config() -> &'static RuntimeConfig {
    &get().config
}
