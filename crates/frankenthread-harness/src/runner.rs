//! Scenario execution engine.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use frankenthread_core::clock;
use serde::Serialize;

use crate::error::HarnessError;
use crate::scenarios::{self, Scenario, ScenarioConfig};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome, Primitive};

/// Result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub primitive: Primitive,
    pub outcome: Outcome,
    pub threads: u32,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub details: serde_json::Value,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub clock_source: String,
    pub clock_resolution_us: i64,
    pub iterations: u32,
    pub passed: usize,
    pub failed: usize,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Resolve scenario names. `all` (or an empty list) selects the whole catalog.
pub fn select(names: &[String]) -> Result<Vec<&'static Scenario>, HarnessError> {
    if names.is_empty() || names.iter().any(|name| name == "all") {
        return Ok(scenarios::catalog().iter().collect());
    }
    names
        .iter()
        .map(|name| scenarios::find(name).ok_or_else(|| HarnessError::UnknownScenario(name.clone())))
        .collect()
}

/// Runs scenarios and records each one as structured log entries.
pub struct ScenarioRunner {
    config: ScenarioConfig,
}

impl ScenarioRunner {
    #[must_use]
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }

    /// Run `scenarios` in order. A failing or panicking scenario does not
    /// stop the run.
    pub fn run(
        &self,
        scenarios: &[&Scenario],
        emitter: &mut LogEmitter,
    ) -> Result<RunReport, HarnessError> {
        let source = clock::source().name().to_string();
        let resolution = clock::resolution();

        emitter.emit_entry(
            LogEntry::new("", LogLevel::Info, "run_start")
                .with_clock_source(&source)
                .with_details(serde_json::json!({
                    "scenarios": scenarios.len(),
                    "iterations": self.config.iterations,
                    "clock_resolution_us": resolution,
                })),
        )?;

        let mut reports = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            emitter.emit_entry(
                LogEntry::new("", LogLevel::Debug, "scenario_start")
                    .with_scenario(scenario.name, scenario.primitive),
            )?;
            let report = self.run_one(scenario);
            emitter.emit_entry(scenario_end_entry(&report, &source))?;
            reports.push(report);
        }

        let passed = reports
            .iter()
            .filter(|report| report.outcome == Outcome::Pass)
            .count();
        let failed = reports.len() - passed;
        emitter.emit_entry(
            LogEntry::new(
                "",
                if failed == 0 { LogLevel::Info } else { LogLevel::Error },
                "run_end",
            )
            .with_outcome(if failed == 0 { Outcome::Pass } else { Outcome::Fail })
            .with_details(serde_json::json!({ "passed": passed, "failed": failed })),
        )?;
        emitter.flush()?;

        Ok(RunReport {
            run_id: emitter.run_id().to_string(),
            clock_source: source,
            clock_resolution_us: resolution,
            iterations: self.config.iterations,
            passed,
            failed,
            scenarios: reports,
        })
    }

    fn run_one(&self, scenario: &Scenario) -> ScenarioReport {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| scenario.run(&self.config)));
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut report = ScenarioReport {
            name: scenario.name.to_string(),
            primitive: scenario.primitive,
            outcome: Outcome::Pass,
            threads: 0,
            iterations: 0,
            latency_ns: None,
            duration_ms,
            message: None,
            details: serde_json::Value::Null,
        };
        match result {
            Ok(Ok(measurement)) => {
                report.threads = measurement.threads;
                report.iterations = measurement.iterations;
                report.latency_ns = measurement.latency_ns;
                report.details = measurement.details;
            }
            Ok(Err(failure)) => {
                log::warn!("scenario {} failed: {}", scenario.name, failure.message);
                report.outcome = Outcome::Fail;
                report.message = Some(failure.message);
                report.details = failure.details;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("scenario {} panicked: {message}", scenario.name);
                report.outcome = Outcome::Error;
                report.message = Some(format!("panicked: {message}"));
            }
        }
        report
    }
}

fn scenario_end_entry(report: &ScenarioReport, source: &str) -> LogEntry {
    let level = match report.outcome {
        Outcome::Pass | Outcome::Skip => LogLevel::Info,
        Outcome::Fail | Outcome::Timeout => LogLevel::Warn,
        Outcome::Error => LogLevel::Error,
    };
    let mut details = serde_json::Map::new();
    if let Some(message) = &report.message {
        details.insert("message".to_string(), message.clone().into());
    }
    if !report.details.is_null() {
        details.insert("measured".to_string(), report.details.clone());
    }

    let mut entry = LogEntry::new("", level, "scenario_end")
        .with_scenario(&report.name, report.primitive)
        .with_clock_source(source)
        .with_outcome(report.outcome)
        .with_workload(report.threads, report.iterations)
        .with_duration_ms(report.duration_ms);
    if let Some(ns) = report.latency_ns {
        entry = entry.with_latency_ns(ns);
    }
    if !details.is_empty() {
        entry = entry.with_details(serde_json::Value::Object(details));
    }
    entry
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_all_returns_catalog() {
        let all = select(&["all".to_string()]).unwrap();
        assert_eq!(all.len(), scenarios::catalog().len());
        assert_eq!(select(&[]).unwrap().len(), all.len());
    }

    #[test]
    fn select_unknown_name_fails() {
        let err = select(&["mutex_exclusion".to_string(), "bogus".to_string()]).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownScenario(name) if name == "bogus"));
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&7_u8), "non-string panic payload");
    }

    #[test]
    fn end_entry_carries_failure_message() {
        let report = ScenarioReport {
            name: "semaphore_admission".to_string(),
            primitive: Primitive::Semaphore,
            outcome: Outcome::Fail,
            threads: 8,
            iterations: 10,
            latency_ns: None,
            duration_ms: 3,
            message: Some("peak holders within permits".to_string()),
            details: serde_json::Value::Null,
        };
        let entry = scenario_end_entry(&report, "interrupt");
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.outcome, Some(Outcome::Fail));
        assert_eq!(
            entry.details.unwrap()["message"],
            "peak holders within permits"
        );
    }
}
