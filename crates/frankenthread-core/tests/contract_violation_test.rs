//! Fatal contract violations abort the process.
//!
//! Each case re-executes this test binary filtered to itself with
//! `FRANKENTHREAD_FATAL_CASE` set; the child performs the misuse and must
//! die, reporting the operation and the call site in this file.

use std::process::Command;
use std::sync::Arc;

use frankenthread_core::cancel;
use frankenthread_core::sync::{Mutex, RwLock, StaticMutex};

const CASE_ENV: &str = "FRANKENTHREAD_FATAL_CASE";

fn run_misuse(test_name: &str, case: &str, misuse: impl FnOnce()) {
    if std::env::var(CASE_ENV).as_deref() == Ok(case) {
        misuse();
        // Unreachable when the contract holds.
        std::process::exit(0);
    }

    let exe = std::env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CASE_ENV, case)
        .output()
        .expect("spawn child test binary");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        !output.status.success(),
        "case {case} exited cleanly; stderr:\n{stderr}"
    );
    assert!(
        stderr.contains("fatal contract violation"),
        "case {case} missing report; stderr:\n{stderr}"
    );
    assert!(
        stderr.contains("contract_violation_test.rs"),
        "case {case} report lacks the call site; stderr:\n{stderr}"
    );
    assert!(
        stderr.contains("backtrace:"),
        "case {case} report lacks a backtrace; stderr:\n{stderr}"
    );
}

#[test]
fn unlocking_an_unlocked_mutex_aborts() {
    run_misuse("unlocking_an_unlocked_mutex_aborts", "unlock-unlocked", || {
        let mutex = Mutex::new_fast();
        mutex.unlock();
    });
}

#[test]
fn unlocking_another_threads_mutex_aborts() {
    run_misuse(
        "unlocking_another_threads_mutex_aborts",
        "unlock-foreign",
        || {
            let mutex = Arc::new(Mutex::new_fast());
            let holder = Arc::clone(&mutex);
            std::thread::spawn(move || holder.lock()).join().unwrap();
            mutex.unlock();
        },
    );
}

#[test]
fn destroying_a_locked_mutex_aborts() {
    run_misuse("destroying_a_locked_mutex_aborts", "destroy-locked", || {
        let mutex = Mutex::new_fast();
        mutex.lock();
        mutex.destroy();
    });
}

#[test]
fn relocking_a_fast_mutex_aborts() {
    run_misuse("relocking_a_fast_mutex_aborts", "relock-fast", || {
        let mutex = Mutex::new_fast();
        mutex.lock();
        mutex.lock();
    });
}

#[test]
fn unlocking_an_unheld_static_mutex_aborts() {
    run_misuse(
        "unlocking_an_unheld_static_mutex_aborts",
        "static-unlock",
        || {
            static LOCK: StaticMutex = StaticMutex::new();
            LOCK.unlock();
        },
    );
}

#[test]
fn unlocking_an_unheld_rwlock_aborts() {
    run_misuse("unlocking_an_unheld_rwlock_aborts", "rwlock-unlock", || {
        let lock = RwLock::new();
        lock.unlock();
    });
}

#[test]
fn unbalanced_restore_cancel_aborts() {
    run_misuse("unbalanced_restore_cancel_aborts", "restore-twice", || {
        let state = cancel::save_cancel();
        cancel::restore_cancel(state);
        cancel::restore_cancel(state);
    });
}

#[test]
fn popping_an_empty_cleanup_stack_aborts() {
    run_misuse("popping_an_empty_cleanup_stack_aborts", "cleanup-pop", || {
        cancel::cleanup_pop();
    });
}

#[test]
fn read_unlock_by_a_non_reader_aborts() {
    run_misuse(
        "read_unlock_by_a_non_reader_aborts",
        "rwlock-foreign-read",
        || {
            let lock = Arc::new(RwLock::new());
            let reader = Arc::clone(&lock);
            let (held, release) = (
                Arc::new(std::sync::Barrier::new(2)),
                Arc::new(std::sync::Barrier::new(2)),
            );
            let (reader_held, reader_release) = (Arc::clone(&held), Arc::clone(&release));
            std::thread::spawn(move || {
                reader.read_lock();
                reader_held.wait();
                reader_release.wait();
                reader.unlock();
            });
            held.wait();
            lock.unlock();
        },
    );
}

#[test]
fn relocking_a_static_mutex_aborts() {
    run_misuse("relocking_a_static_mutex_aborts", "static-relock", || {
        static LOCK: StaticMutex = StaticMutex::new();
        LOCK.lock();
        LOCK.lock();
    });
}
