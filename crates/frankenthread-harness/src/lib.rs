//! Scenario harness for frankenthread.
//!
//! This crate provides:
//! - Scenario catalog: concurrent workloads that check one runtime property each
//! - Runner: executes scenarios in isolation and builds a run report
//! - Structured logs: JSONL evidence records, artifact index and validation
//! - Console logging: a `log` backend for the runtime's own diagnostics

#![forbid(unsafe_code)]

pub mod console_log;
pub mod error;
pub mod runner;
pub mod scenarios;
pub mod structured_log;

pub use error::HarnessError;
pub use runner::{RunReport, ScenarioReport, ScenarioRunner};
pub use scenarios::{Scenario, ScenarioConfig};
