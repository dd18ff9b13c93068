//! Worker status types for the brood supervisor
//!
//! These types describe what the supervisor knows about each forked worker:
//! how it changed state ([`ExitStatus`]), where it is in its lifecycle
//! ([`WorkerState`]) and the final reap record ([`WorkerExit`]).
//!
//! ## Worker Lifecycle
//!
//! Workers progress through the following states:
//! - `Spawned`: the process exists and has not been observed to terminate
//! - `Terminated`: a termination was observed, not yet consumed by bookkeeping
//! - `Reaped`: the termination was consumed; terminal

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a child process changed state, decoded from a raw wait status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExitStatus {
    /// The process called `exit` / returned from main
    #[serde(rename_all = "camelCase")]
    NormalExit {
        /// Exit code (0..=255)
        code: i32,
    },
    /// The process was terminated by a signal
    #[serde(rename_all = "camelCase")]
    Signaled {
        /// Terminating signal number
        signal: i32,
        /// Whether a core dump was produced
        #[serde(default)]
        core_dumped: bool,
    },
    /// The process was stopped by a signal (job control)
    Stopped {
        /// Stopping signal number
        signal: i32,
    },
    /// The process was resumed by `SIGCONT`
    Continued,
}

impl ExitStatus {
    /// Whether this status ends the process (normal exit or fatal signal)
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::NormalExit { .. } | Self::Signaled { .. })
    }

    /// Whether this is a normal exit with code 0
    pub fn is_success(&self) -> bool {
        matches!(self, Self::NormalExit { code: 0 })
    }

    /// Exit code for normal exits
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::NormalExit { code } => Some(*code),
            _ => None,
        }
    }

    /// Signal number for signaled or stopped processes
    pub fn signal(&self) -> Option<i32> {
        match self {
            Self::Signaled { signal, .. } | Self::Stopped { signal } => Some(*signal),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NormalExit { code } => write!(f, "exited with status {}", code),
            Self::Signaled {
                signal,
                core_dumped: true,
            } => write!(f, "terminated by signal {} (core dumped)", signal),
            Self::Signaled { signal, .. } => write!(f, "terminated by signal {}", signal),
            Self::Stopped { signal } => write!(f, "stopped by signal {}", signal),
            Self::Continued => f.write_str("continued"),
        }
    }
}

/// Lifecycle state of a single worker handle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum WorkerState {
    /// Process created, termination not yet observed
    #[default]
    Spawned,
    /// Termination observed but not yet consumed
    Terminated {
        /// Status recorded at notification time
        status: ExitStatus,
    },
    /// Termination consumed by the supervisor (terminal)
    Reaped {
        /// Final status of the worker
        status: ExitStatus,
    },
}

impl WorkerState {
    /// Whether the worker has reached its terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reaped { .. })
    }

    /// Recorded status, if a termination has been observed
    pub fn status(&self) -> Option<ExitStatus> {
        match self {
            Self::Spawned => None,
            Self::Terminated { status } | Self::Reaped { status } => Some(*status),
        }
    }
}

/// One reap result: the worker's logical index and how it ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExit {
    /// Logical index assigned at spawn time (0..N-1)
    pub index: usize,
    /// Final status
    pub status: ExitStatus,
}
