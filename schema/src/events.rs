//! Event system for the brood supervisor
//!
//! This module defines the events a supervisor run reports to its observers:
//! worker creation, job-control notifications, reaps and spawn failures.
//!
//! Events are designed to be serializable and can be:
//! - Logged as structured JSON lines
//! - Collected by tests to verify the exactly-once reap property
//! - Printed by the command-line front end

use crate::worker::WorkerExit;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Events emitted during a supervisor run
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum SupervisorEvent {
    /// A worker process was created
    #[serde(rename_all = "camelCase")]
    WorkerSpawned {
        /// Logical worker index
        index: usize,
        /// Process ID assigned by the operating system
        pid: i32,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A worker was stopped by a signal; its handle stays live
    #[serde(rename_all = "camelCase")]
    WorkerStopped {
        /// Logical worker index
        index: usize,
        /// Stopping signal number
        signal: i32,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A stopped worker was resumed
    #[serde(rename_all = "camelCase")]
    WorkerContinued {
        /// Logical worker index
        index: usize,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A worker terminated and was reaped
    #[serde(rename_all = "camelCase")]
    WorkerReaped {
        /// Reap record
        exit: WorkerExit,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// Creating a worker failed; earlier workers remain live
    #[serde(rename_all = "camelCase")]
    SpawnFailed {
        /// Index that could not be spawned
        index: usize,
        /// Error description
        error: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },
}

/// Event severity level for filtering
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub enum EventSeverity {
    /// Debug information
    Debug,
    /// Informational events
    Info,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
}

impl SupervisorEvent {
    /// Worker index the event refers to
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::WorkerSpawned { index, .. }
            | Self::WorkerStopped { index, .. }
            | Self::WorkerContinued { index, .. }
            | Self::SpawnFailed { index, .. } => *index,
            Self::WorkerReaped { exit, .. } => exit.index,
        }
    }

    /// Get the timestamp for this event
    #[must_use]
    pub fn timestamp(&self) -> &str {
        match self {
            Self::WorkerSpawned { timestamp, .. }
            | Self::WorkerStopped { timestamp, .. }
            | Self::WorkerContinued { timestamp, .. }
            | Self::WorkerReaped { timestamp, .. }
            | Self::SpawnFailed { timestamp, .. } => timestamp,
        }
    }

    /// Get the severity level for this event
    #[must_use]
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::WorkerSpawned { .. } | Self::WorkerContinued { .. } => EventSeverity::Debug,
            Self::WorkerReaped { exit, .. } => {
                if exit.status.is_success() || exit.status.code().is_some() {
                    EventSeverity::Info
                } else {
                    EventSeverity::Warning
                }
            }
            Self::WorkerStopped { .. } => EventSeverity::Warning,
            Self::SpawnFailed { .. } => EventSeverity::Error,
        }
    }

    /// Create a current timestamp string in RFC3339 format
    #[must_use]
    pub fn current_timestamp() -> String {
        humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
    }

    /// Create a worker spawned event
    #[must_use]
    pub fn spawned(index: usize, pid: i32) -> Self {
        Self::WorkerSpawned {
            index,
            pid,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a worker stopped event
    #[must_use]
    pub fn stopped(index: usize, signal: i32) -> Self {
        Self::WorkerStopped {
            index,
            signal,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a worker continued event
    #[must_use]
    pub fn continued(index: usize) -> Self {
        Self::WorkerContinued {
            index,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a worker reaped event
    #[must_use]
    pub fn reaped(exit: WorkerExit) -> Self {
        Self::WorkerReaped {
            exit,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a spawn failure event
    #[must_use]
    pub fn spawn_failed(index: usize, error: String) -> Self {
        Self::SpawnFailed {
            index,
            error,
            timestamp: Self::current_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ExitStatus;

    #[test]
    fn test_event_index_and_timestamp() {
        let event = SupervisorEvent::spawned(3, 4242);
        assert_eq!(event.index(), 3);
        assert!(event.timestamp().ends_with('Z'));

        let reaped = SupervisorEvent::reaped(WorkerExit {
            index: 1,
            status: ExitStatus::NormalExit { code: 101 },
        });
        assert_eq!(reaped.index(), 1);
    }

    #[test]
    fn test_event_severity() {
        let normal = SupervisorEvent::reaped(WorkerExit {
            index: 0,
            status: ExitStatus::NormalExit { code: 100 },
        });
        assert_eq!(normal.severity(), EventSeverity::Info);

        let killed = SupervisorEvent::reaped(WorkerExit {
            index: 0,
            status: ExitStatus::Signaled {
                signal: 6,
                core_dumped: false,
            },
        });
        assert_eq!(killed.severity(), EventSeverity::Warning);

        let failed = SupervisorEvent::spawn_failed(2, "EAGAIN".to_string());
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert!(EventSeverity::Error > EventSeverity::Warning);
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = SupervisorEvent::stopped(0, 19);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "workerStopped");
        assert_eq!(json["signal"], 19);
    }
}
