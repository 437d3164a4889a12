//! Recoverable runtime errors.
//!
//! Programming errors (unlocking a mutex the caller does not hold, unbalanced
//! cancel restore, ...) never surface here: they are fatal and go through
//! [`crate::contract::violation`].

use std::fmt;
use std::io;

use thiserror::Error;

use crate::clock::ClockSource;

/// A bounded resource that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// The host refused to create another thread.
    Threads,
    /// Not enough memory for the new thread's stack.
    StackMemory,
    /// All [`crate::tls::KEYS_MAX`] thread-specific storage keys are in use.
    TlsKeys,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Threads => "threads",
            Self::StackMemory => "thread stack memory",
            Self::TlsKeys => "thread-specific storage keys",
        })
    }
}

/// Error type for every fallible runtime operation.
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(Resource),

    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("runtime already initialized")]
    AlreadyInitialized,

    #[error("clock source `{0}` is not available on this host")]
    UnsupportedClock(ClockSource),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("thread-specific storage key is stale or was never created")]
    StaleKey,
}

impl ThreadError {
    /// Wrap a raw errno value reported by `op`.
    pub(crate) fn from_errno(op: &'static str, errno: i32) -> Self {
        Self::Os {
            op,
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// Classify a failed `std::thread::Builder::spawn`.
    pub(crate) fn from_spawn(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::ResourceExhausted(Resource::Threads),
            io::ErrorKind::OutOfMemory => Self::ResourceExhausted(Resource::StackMemory),
            _ => Self::Os {
                op: "thread spawn",
                source: err,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ThreadError>;
