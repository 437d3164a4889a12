//! CLI entrypoint for the frankenthread scenario harness.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use frankenthread_core::{ClockSource, RuntimeConfig, clock};
use frankenthread_harness::scenarios::{self, DEFAULT_ITERATIONS, ScenarioConfig};
use frankenthread_harness::structured_log::{self, ArtifactIndex, LogEmitter};
use frankenthread_harness::{ScenarioRunner, console_log, runner};

/// Scenario tooling for the frankenthread runtime.
#[derive(Debug, Parser)]
#[command(name = "frankenthread-harness")]
#[command(about = "Scenario harness for the frankenthread runtime")]
struct Cli {
    /// Print runtime diagnostics at debug level (overrides FRANKENTHREAD_LOG).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run scenarios and record structured evidence.
    Run {
        /// Scenario name; repeat for several. `all` runs the whole catalog.
        #[arg(long, default_value = "all")]
        scenario: Vec<String>,
        /// JSONL log path (if omitted, the log is discarded after validation).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Per-thread iterations for tunable scenarios.
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: u32,
        /// Clock source to install before running (default: environment).
        #[arg(long)]
        clock: Option<String>,
        /// Output path for the JSON run report (if omitted, prints to stdout).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output path for an artifact index covering the log and report.
        #[arg(long)]
        artifact_index: Option<PathBuf>,
    },
    /// Print the selected clock source, its resolution and sample deltas.
    Clock {
        /// Number of 1ms sleeps to sample.
        #[arg(long, default_value_t = 5)]
        samples: u32,
    },
    /// List the scenario catalog.
    List,
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        console_log::level_from_env()
    };
    console_log::init(level)?;

    match cli.command {
        Command::Run {
            scenario,
            log,
            iterations,
            clock,
            report,
            artifact_index,
        } => {
            if let Some(name) = clock {
                let config = RuntimeConfig {
                    clock_source: ClockSource::from_str_loose(&name),
                    ..RuntimeConfig::from_env()
                };
                frankenthread_core::setup(config)?;
            }

            let selected = runner::select(&scenario)?;
            let run_id = format!(
                "run-{}",
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
            );
            let mut emitter = match &log {
                Some(path) => LogEmitter::to_file(path, &run_id)?,
                None => LogEmitter::to_buffer(&run_id),
            };

            let outcome = ScenarioRunner::new(ScenarioConfig { iterations })
                .run(&selected, &mut emitter)?;
            for entry in &outcome.scenarios {
                eprintln!(
                    "{:<32} {:<8} {:>6}ms {}",
                    entry.name,
                    entry.outcome.as_str(),
                    entry.duration_ms,
                    entry.message.as_deref().unwrap_or("")
                );
            }
            eprintln!(
                "{} passed, {} failed (clock: {})",
                outcome.passed, outcome.failed, outcome.clock_source
            );

            let json = outcome.to_json();
            match &report {
                Some(path) => std::fs::write(path, &json)?,
                None => println!("{json}"),
            }

            if let Some(index_path) = artifact_index {
                let mut index = ArtifactIndex::new(&run_id);
                if let Some(path) = &log {
                    index.add_file(path, "log")?;
                }
                if let Some(path) = &report {
                    index.add_file(path, "report")?;
                }
                std::fs::write(&index_path, index.to_json()?)?;
            }

            if !outcome.all_passed() {
                std::process::exit(1);
            }
        }
        Command::Clock { samples } => {
            println!("source: {}", clock::source().name());
            println!("resolution: {}us", clock::resolution());
            for i in 0..samples {
                let before = clock::now();
                clock::sleep(Duration::from_millis(1));
                println!("sample {i}: slept 1ms, observed {}us", clock::now() - before);
            }
        }
        Command::List => {
            for scenario in scenarios::catalog() {
                println!(
                    "{:<32} {:<10} {}",
                    scenario.name,
                    format!("{:?}", scenario.primitive).to_lowercase(),
                    scenario.summary
                );
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = structured_log::validate_log_file(&log)?;
            for error in &errors {
                eprintln!("{error}");
            }
            println!("{lines} lines, {} errors", errors.len());
            if !errors.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
