//! Spawn loop
//!
//! Workers are forked only while the caller holds a critical section that
//! defers `SIGCHLD`. A worker that exits before the loop finishes therefore
//! cannot have its termination observed until every handle exists.

use super::{Supervisor, WorkerHandle};
use crate::config::MAX_WORKER_EXIT_CODE;
use crate::process::{exit_immediately, ForkSide};
use crate::signal_gate::{self, CriticalSection};
use crate::{CoreError, Result};
use nix::sys::signal::{SigSet, Signal};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info};

impl Supervisor {
    /// Spawn `count` workers that all run `body`.
    ///
    /// See [`Supervisor::spawn_all_indexed`] for the protocol and error
    /// behavior.
    pub fn spawn_all<F>(
        &mut self,
        section: &CriticalSection<'_>,
        count: usize,
        body: F,
    ) -> Result<&[WorkerHandle]>
    where
        F: Fn(),
    {
        self.spawn_all_indexed(section, count, |_| body())
    }

    /// Spawn `count` workers; worker `i` runs `body(i)` and then exits with
    /// `exit_code_base + i`. A body that panics terminates the worker with
    /// `SIGABRT`.
    ///
    /// Returns the handles created by this call in index order.
    ///
    /// ## Errors
    ///
    /// - `ProtocolViolation` if `section` does not defer `SIGCHLD`
    /// - `ValidationError` if a worker index has no valid exit code
    /// - `SpawnError` if a fork fails; handles created before the failure
    ///   stay owned by the supervisor and must still be reaped
    pub fn spawn_all_indexed<F>(
        &mut self,
        section: &CriticalSection<'_>,
        count: usize,
        body: F,
    ) -> Result<&[WorkerHandle]>
    where
        F: Fn(usize),
    {
        if !section.defers(Signal::SIGCHLD) {
            return Err(CoreError::ProtocolViolation(
                "workers must be spawned inside a section deferring SIGCHLD".to_string(),
            ));
        }

        let first = self.workers.len();
        if let Some(last) = (first + count).checked_sub(1) {
            if self.config.exit_code_for(last).is_none() {
                return Err(CoreError::ValidationError(format!(
                    "workers: worker {} has no exit code in 0..={} from base {}",
                    last,
                    MAX_WORKER_EXIT_CODE,
                    self.config.exit_code_base
                )));
            }
        }

        for spawned in 0..count {
            let index = first + spawned;
            let code = self.config.exit_code_base + index as i32;

            match (self.fork)() {
                Ok(ForkSide::Child) => run_worker(section.saved_mask(), index, code, &body),
                Ok(ForkSide::Parent(pid)) => {
                    debug!("Spawned worker {} as pid {}", index, pid);
                    self.live.insert(pid, index);
                    self.workers.push(WorkerHandle::spawned(index, pid));
                }
                Err(source) => {
                    error!("Failed to spawn worker {}: {}", index, source);
                    return Err(CoreError::SpawnError {
                        index,
                        spawned,
                        source,
                    });
                }
            }
        }

        info!("Spawned {} workers", count);
        Ok(&self.workers[first..])
    }
}

/// Child side of the fork. Never returns into the parent's control flow.
fn run_worker<F>(mask: &SigSet, index: usize, code: i32, body: &F) -> !
where
    F: Fn(usize),
{
    signal_gate::reset_in_child(mask);
    if panic::catch_unwind(AssertUnwindSafe(|| body(index))).is_err() {
        std::process::abort();
    }
    exit_immediately(code)
}
