//! Structured JSONL evidence for scenario runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`ArtifactIndex`]: links a run's logs to files on disk with SHA-256 integrity.
//! - [`LogEmitter`]: writes JSONL lines to a file or an in-memory buffer.
//! - [`validate_log_line`]: validates a single JSONL line against the schema.
//! - [`validate_log_file`]: validates an entire JSONL file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix of every trace id this harness generates.
pub const TRACE_PREFIX: &str = "frankenthread";

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

/// Scenario outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    Error,
    Timeout,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// Runtime primitive a scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Mutex,
    Condvar,
    Semaphore,
    Rwlock,
    Tls,
    Cancel,
    Clock,
    Once,
    Thread,
}

const PRIMITIVES: [&str; 9] = [
    "mutex",
    "condvar",
    "semaphore",
    "rwlock",
    "tls",
    "cancel",
    "clock",
    "once",
    "thread",
];

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primitive: Option<Primitive>,
    /// Clock source the runtime selected for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    /// Wall-clock duration of a whole scenario (milliseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            scenario: None,
            primitive: None,
            clock_source: None,
            outcome: None,
            threads: None,
            iterations: None,
            latency_ns: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Set the scenario name and the primitive it exercises.
    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>, primitive: Primitive) -> Self {
        self.scenario = Some(scenario.into());
        self.primitive = Some(primitive);
        self
    }

    #[must_use]
    pub fn with_clock_source(mut self, source: impl Into<String>) -> Self {
        self.clock_source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Set the thread and iteration counts of a scenario.
    #[must_use]
    pub fn with_workload(mut self, threads: u32, iterations: u32) -> Self {
        self.threads = Some(threads);
        self.iterations = Some(iterations);
        self
    }

    #[must_use]
    pub fn with_latency_ns(mut self, ns: u64) -> Self {
        self.latency_ns = Some(ns);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Artifact index
// ---------------------------------------------------------------------------

/// A single artifact entry in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Artifact index linking a run's logs to the files it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            generated_utc: now_utc(),
            artifacts: Vec::new(),
        }
    }

    /// Hash `path` and add it to the index.
    pub fn add_file(&mut self, path: &Path, kind: impl Into<String>) -> std::io::Result<&mut Self> {
        let data = std::fs::read(path)?;
        self.artifacts.push(ArtifactEntry {
            path: path.display().to_string(),
            kind: kind.into(),
            sha256: sha256_hex(&data),
            size_bytes: Some(data.len() as u64),
        });
        Ok(self)
    }

    /// Re-hash every artifact and return the paths whose contents changed or
    /// disappeared.
    #[must_use]
    pub fn stale_artifacts(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter(|entry| match std::fs::read(&entry.path) {
                Ok(data) => !sha256_hex(&data).eq_ignore_ascii_case(&entry.sha256),
                Err(_) => true,
            })
            .map(|entry| entry.path.clone())
            .collect()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Lower-case hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

enum Sink {
    File(BufWriter<File>),
    Buffer(Vec<u8>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::File(file) => file,
            Self::Buffer(buf) => buf,
        }
    }
}

/// Writes structured JSONL log entries to a file or a buffer.
pub struct LogEmitter {
    sink: Sink,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
            seq: 0,
            run_id: run_id.to_string(),
        })
    }

    /// Create an emitter that keeps its lines in memory.
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self {
            sink: Sink::Buffer(Vec::new()),
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Lines written so far, for buffer emitters. `None` for file emitters.
    #[must_use]
    pub fn buffered_lines(&self) -> Option<Vec<String>> {
        match &self.sink {
            Sink::Buffer(buf) => Some(
                String::from_utf8_lossy(buf)
                    .lines()
                    .map(str::to_string)
                    .collect(),
            ),
            Sink::File(_) => None,
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{TRACE_PREFIX}::{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a bare event with an auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(&trace_id, level, event).with_run(&self.run_id);
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry, filling in the trace and run ids
    /// when they are missing.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        self.write_line(&entry)
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.sink.writer(), "{line}")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.sink.writer().flush()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &str, message: String| {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message,
        });
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            fail("<json>", format!("invalid JSON: {e}"));
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        fail("<root>", "expected JSON object".to_string());
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            fail(field, "required field missing".to_string());
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error", "fatal"].contains(&level)
    {
        fail("level", format!("invalid level: '{level}'"));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail", "skip", "error", "timeout"].contains(&outcome)
    {
        fail("outcome", format!("invalid outcome: '{outcome}'"));
    }

    if let Some(primitive) = obj.get("primitive").and_then(|v| v.as_str())
        && !PRIMITIVES.contains(&primitive)
    {
        fail("primitive", format!("invalid primitive: '{primitive}'"));
    }

    // A primitive without a scenario cannot be attributed.
    if obj.contains_key("primitive") && !obj.contains_key("scenario") {
        fail(
            "scenario",
            "entries naming a primitive must name their scenario".to_string(),
        );
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").count() != 3
    {
        fail(
            "trace_id",
            format!("trace_id should follow <prefix>::<run_id>::<seq> format, got: '{trace_id}'"),
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value).map_err(|e| {
        vec![LogValidationError {
            line_number,
            field: "<deserialization>".to_string(),
            message: format!("failed to deserialize: {e}"),
        }]
    })
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
#[must_use]
pub fn now_utc() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(since_epoch.as_secs(), since_epoch.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
    )
}

// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
