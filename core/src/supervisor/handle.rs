//! Worker handles and their lifecycle transitions
//!
//! A [`WorkerHandle`] is created in `Spawned` state when the parent side of a
//! fork returns, and moves to `Reaped` exactly once. The process ID is only
//! held while the process may still exist: once the handle is reaped the
//! kernel is free to hand the same PID to an unrelated process, so the handle
//! forgets it.

use crate::{CoreError, Result};
use nix::unistd::Pid;
use schema::{ExitStatus, WorkerExit, WorkerState};

/// One spawned worker, owned by the supervisor from spawn until reaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    index: usize,
    pid: Option<Pid>,
    state: WorkerState,
}

impl WorkerHandle {
    pub(crate) fn spawned(index: usize, pid: Pid) -> Self {
        Self {
            index,
            pid: Some(pid),
            state: WorkerState::Spawned,
        }
    }

    /// Logical index in spawn order
    pub fn index(&self) -> usize {
        self.index
    }

    /// Process ID, present only until the worker is reaped
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Whether the worker has not yet been observed to terminate
    pub fn is_live(&self) -> bool {
        matches!(self.state, WorkerState::Spawned)
    }

    /// Record an observed termination. Only `Spawned` handles accept one.
    pub(crate) fn terminate(&mut self, status: ExitStatus) -> Result<()> {
        if !status.is_termination() {
            return Err(CoreError::ProtocolViolation(format!(
                "worker {}: '{}' is not a termination",
                self.index, status
            )));
        }
        match self.state {
            WorkerState::Spawned => {
                self.state = WorkerState::Terminated { status };
                Ok(())
            }
            other => Err(CoreError::ProtocolViolation(format!(
                "worker {}: termination observed in state {:?}",
                self.index, other
            ))),
        }
    }

    /// Consume the recorded termination and forget the PID.
    pub(crate) fn reap(&mut self) -> Result<WorkerExit> {
        match self.state {
            WorkerState::Terminated { status } => {
                self.state = WorkerState::Reaped { status };
                self.pid = None;
                Ok(WorkerExit {
                    index: self.index,
                    status,
                })
            }
            other => Err(CoreError::ProtocolViolation(format!(
                "worker {}: cannot reap from state {:?}",
                self.index, other
            ))),
        }
    }
}
