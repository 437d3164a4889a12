//! Process-wide setup. Each test re-executes this binary so every check
//! starts from an uninitialized runtime.

use std::process::Command;

use frankenthread_core::clock::{self, ClockSource};
use frankenthread_core::config::{ENV_CLOCK, ENV_RT_OFFSET, ENV_RT_PRIORITY, RuntimeConfig};
use frankenthread_core::error::ThreadError;
use frankenthread_core::runtime;

const CHILD_ENV: &str = "FRANKENTHREAD_SETUP_CHILD";

fn in_child(test_name: &str, envs: &[(&str, &str)], body: impl FnOnce()) {
    if std::env::var_os(CHILD_ENV).is_some() {
        body();
        return;
    }
    let exe = std::env::current_exe().expect("test binary path");
    let mut command = Command::new(exe);
    command
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .env_remove(ENV_CLOCK)
        .env_remove(ENV_RT_PRIORITY)
        .env_remove(ENV_RT_OFFSET);
    for (name, value) in envs {
        command.env(name, value);
    }
    let output = command.output().expect("spawn child test binary");
    assert!(
        output.status.success(),
        "child {test_name} failed:\n{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn explicit_setup_applies_once() {
    in_child("explicit_setup_applies_once", &[], || {
        assert!(!runtime::is_initialized());
        let config = RuntimeConfig {
            clock_source: ClockSource::Perf,
            priority_offset: 2,
            ..RuntimeConfig::default()
        };
        runtime::setup(config.clone()).unwrap();
        assert_eq!(clock::source(), ClockSource::Perf);
        assert_eq!(runtime::config(), &config);

        let again = runtime::setup(RuntimeConfig::default());
        assert!(matches!(again, Err(ThreadError::AlreadyInitialized)));
        assert_eq!(clock::source(), ClockSource::Perf);
    });
}

#[test]
fn invalid_setup_leaves_runtime_uninitialized() {
    in_child("invalid_setup_leaves_runtime_uninitialized", &[], || {
        let config = RuntimeConfig {
            priority_offset: 1_000,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            runtime::setup(config),
            Err(ThreadError::InvalidConfig(_))
        ));
        assert!(!runtime::is_initialized());
        runtime::setup(RuntimeConfig::default()).unwrap();
    });
}

#[test]
fn lazy_setup_reads_the_environment() {
    in_child(
        "lazy_setup_reads_the_environment",
        &[(ENV_CLOCK, "wall"), (ENV_RT_OFFSET, "7")],
        || {
            assert!(!runtime::is_initialized());
            assert_eq!(clock::source(), ClockSource::Wall);
            assert!(runtime::is_initialized());
            assert_eq!(runtime::config().priority_offset, 7);
            assert!(!runtime::config().enable_realtime_priority);
        },
    );
}

#[test]
fn first_use_blocks_later_setup() {
    in_child("first_use_blocks_later_setup", &[], || {
        let _ = clock::now();
        assert!(matches!(
            runtime::setup(RuntimeConfig::default()),
            Err(ThreadError::AlreadyInitialized)
        ));
    });
}
