//! `log` backend for the harness binary.
//!
//! Runtime records (`setup` decisions, priority fallbacks, contract
//! violations) go to stderr, filtered by `FRANKENTHREAD_LOG` or the
//! `--verbose` flag.

use std::io::Write;
use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::HarnessError;

/// Environment variable holding the console level (`error` .. `trace`, `off`).
pub const LOG_ENV: &str = "FRANKENTHREAD_LOG";

struct ConsoleLogger {
    level: LevelFilter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "\u{1B}[{}m[{:>5}] {}: {}\u{1B}[0m",
            color,
            record.level(),
            record.target(),
            record.args(),
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Parse a level name. Unknown names turn logging off.
#[must_use]
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_ascii_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "INFO" => LevelFilter::Info,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Level from [`LOG_ENV`], `Warn` when unset.
#[must_use]
pub fn level_from_env() -> LevelFilter {
    std::env::var(LOG_ENV).map_or(LevelFilter::Warn, |value| parse_level(&value))
}

/// Install the console logger. Fails if any logger is already installed.
pub fn init(level: LevelFilter) -> Result<(), HarnessError> {
    static LOGGER: OnceLock<ConsoleLogger> = OnceLock::new();
    let logger = LOGGER.get_or_init(|| ConsoleLogger { level });
    log::set_logger(logger).map_err(|_| HarnessError::LoggerInstalled)?;
    log::set_max_level(logger.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("Trace"), LevelFilter::Trace);
    }

    #[test]
    fn unknown_level_disables_logging() {
        assert_eq!(parse_level("chatty"), LevelFilter::Off);
        assert_eq!(parse_level(""), LevelFilter::Off);
    }

    #[test]
    fn enabled_respects_the_filter() {
        let logger = ConsoleLogger {
            level: LevelFilter::Info,
        };
        let info = Metadata::builder().level(Level::Info).build();
        let debug = Metadata::builder().level(Level::Debug).build();
        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&debug));
    }
}
