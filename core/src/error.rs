//! Core error types and utilities

use nix::errno::Errno;
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Creating a worker process failed. Workers spawned before `index`
    /// remain live and owned by the supervisor.
    #[error("Spawn error: worker {index} could not be created after {spawned} spawned: {source}")]
    SpawnError {
        /// Index of the worker that failed
        index: usize,
        /// Number of workers successfully spawned before the failure
        spawned: usize,
        /// Underlying OS error
        #[source]
        source: Errno,
    },

    /// A signal disposition or mask operation failed
    #[error("Signal operation error: {op}: {source}")]
    SignalOpError {
        /// Operation that failed (e.g. "sigaction", "pthread_sigmask")
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: Errno,
    },

    /// Waiting for children failed for a reason other than "no children left"
    #[error("Reap error: {source}")]
    ReapError {
        /// Underlying OS error
        #[source]
        source: Errno,
    },

    /// Handle bookkeeping disagrees with what the kernel reported
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A configuration value is out of range; the message starts with the
    /// offending field path
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Process-wide setup such as the tracing subscriber failed
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::SpawnError { .. } => "CORE101",
            CoreError::SignalOpError { .. } => "CORE102",
            CoreError::ReapError { .. } => "CORE103",
            CoreError::ProtocolViolation(_) => "CORE104",
        }
    }

    /// Whether the error undermines the supervision protocol.
    ///
    /// Spawn failures are left to the caller's policy; signal, reap and
    /// bookkeeping failures cannot heal by retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::SignalOpError { .. }
                | CoreError::ReapError { .. }
                | CoreError::ProtocolViolation(_)
        )
    }

    pub(crate) fn signal_op(op: &'static str, source: Errno) -> Self {
        CoreError::SignalOpError { op, source }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;
