//! Child supervisor implementation
//!
//! This module owns the spawn-then-reap protocol for a fixed set of forked
//! workers: every worker is spawned while `SIGCHLD` is deferred, and every
//! spawned worker is reaped exactly once.
//!
//! ## Architecture
//!
//! The supervisor is single-threaded and synchronous. Concurrency comes only
//! from the workers themselves and from the asynchronous `SIGCHLD` handler,
//! which races the reap loop:
//!
//! ```text
//! open section ─► spawn N ─► close section ─► reap until ECHILD
//!                  │                            ▲
//!                  └── worker exits ─► SIGCHLD ─┘ (deferred, then recorded)
//! ```
//!
//! ## Components
//!
//! - [`Supervisor`]: handle arena plus the spawn and reap loops
//! - [`WorkerHandle`]: one worker and its lifecycle state
//! - [`ReapObserver`]: receives spawn, stop/continue and reap notifications
//! - [`RunReport`]: outcome of [`Supervisor::run`]

use crate::config::SupervisorConfig;
use crate::process::{fork_process, ForkSide};
use crate::signal_gate::SignalGate;
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use schema::WorkerExit;
use std::collections::HashMap;
use tracing::{info, warn};

pub mod handle;
pub mod observer;
mod reap;
mod spawn;


pub use handle::*;
pub use observer::*;

/// Outcome of a complete supervisor run
#[derive(Debug)]
pub struct RunReport {
    /// One entry per spawned worker, in reap order
    pub exits: Vec<WorkerExit>,
    /// Spawn failure that cut the run short, if any. Workers spawned before
    /// the failure are still included in `exits`.
    pub spawn_error: Option<CoreError>,
}

impl RunReport {
    /// Whether every requested worker was spawned
    pub fn is_complete(&self) -> bool {
        self.spawn_error.is_none()
    }
}

/// Process creation primitive used by the spawn loop
pub(crate) type ForkFn = fn() -> std::result::Result<ForkSide, Errno>;

/// Owns the worker handles and drives the spawn and reap loops
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    fork: ForkFn,
    /// Arena of handles; a handle's position equals its logical index
    workers: Vec<WorkerHandle>,
    /// PIDs of handles still in `Spawned` state
    live: HashMap<Pid, usize>,
}

impl Supervisor {
    /// Create a supervisor with no workers
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            fork: fork_process,
            workers: Vec::new(),
            live: HashMap::new(),
        }
    }

    /// Replace the process creation primitive
    #[cfg(test)]
    pub(crate) fn with_fork(mut self, fork: ForkFn) -> Self {
        self.fork = fork;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// All handles in spawn order
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Number of workers not yet reaped
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Run the whole protocol for `config.workers` workers.
    ///
    /// Installs the termination handler (unless disabled), spawns inside a
    /// critical section deferring `SIGCHLD`, closes the section and reaps.
    /// A spawn failure does not abort the run: the workers that were
    /// spawned are still reaped and the failure is returned in the report.
    pub fn run<F>(
        &mut self,
        gate: &SignalGate,
        body: F,
        observer: &mut dyn ReapObserver,
    ) -> Result<RunReport>
    where
        F: Fn(usize),
    {
        self.config.validate()?;
        if self.config.install_handler {
            gate.install_termination_handler()?;
        }

        let first = self.workers.len();
        let section = gate.enter_critical_section(&[Signal::SIGCHLD])?;
        let spawn_error = match self.spawn_all_indexed(&section, self.config.workers, body) {
            Ok(_) => None,
            Err(e @ CoreError::SpawnError { .. }) => {
                warn!("Continuing with partial worker set: {}", e);
                Some(e)
            }
            Err(e) => return Err(e),
        };

        for handle in &self.workers[first..] {
            if let Some(pid) = handle.pid() {
                observer.on_spawned(handle.index(), pid.as_raw());
            }
        }
        if let Some(e @ CoreError::SpawnError { index, .. }) = &spawn_error {
            observer.on_spawn_failed(*index, &e.to_string());
        }

        section.close()?;
        let exits = self.reap_all(observer)?;
        info!(
            "Run finished: {} workers reaped{}",
            exits.len(),
            if spawn_error.is_some() { " (partial spawn)" } else { "" }
        );
        Ok(RunReport { exits, spawn_error })
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            warn!(
                "Supervisor dropped with {} unreaped workers; they will be orphaned",
                self.live.len()
            );
        }
    }
}
