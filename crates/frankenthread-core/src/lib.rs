//! # frankenthread-core
//!
//! A thread and synchronization runtime with one behavioral contract on
//! every host: threads, mutexes, condition variables, semaphores,
//! read/write locks, thread-specific storage, deferred cancellation and a
//! monotonic clock.
//!
//! Dependency order, leaves first: [`clock`] → [`sys`] address waits →
//! [`sync`] primitives → [`tls`] → [`cancel`] → [`thread`].
//!
//! `unsafe` is denied at the crate level and allowed only in the modules
//! that talk to the operating system.

#![deny(unsafe_code)]

pub mod cancel;
pub mod clock;
pub mod config;
pub mod contract;
pub mod error;
pub mod runtime;
pub mod sync;
pub mod sys;
pub mod thread;
pub mod tls;

pub use cancel::{
    CancelState, Cancelled, cleanup_pop, cleanup_push, cleanup_run, restore_cancel, save_cancel,
    test_cancel, with_cleanup,
};
pub use clock::{ClockSource, Tick};
pub use config::RuntimeConfig;
pub use error::{Resource, Result, ThreadError};
pub use runtime::setup;
pub use sync::{Condvar, Mutex, Once, RwLock, Semaphore, StaticMutex, TryLock, WaitOutcome};
pub use thread::{Priority, Thread};
