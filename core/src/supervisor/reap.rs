//! Reap loop
//!
//! Termination statuses reach the supervisor on two paths: the `SIGCHLD`
//! handler's record table and the loop's own `waitpid` calls. Each child is
//! reaped by exactly one of them, so every status is consumed exactly once.
//! `ECHILD` is the only normal end of the loop, and it is trusted only after
//! no handler is between reaping and publishing.

use super::{ReapObserver, Supervisor};
use crate::config::ReapMode;
use crate::process::{classify, wait_any, wait_for, WaitOutcome};
use crate::signal_gate;
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::wait::WaitPidFlag;
use nix::unistd::Pid;
use schema::{ExitStatus, WorkerExit};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);

/// Sleep schedule between empty polls: doubles from 1ms up to a ceiling
#[derive(Debug)]
struct Backoff {
    current: Duration,
    ceiling: Duration,
}

impl Backoff {
    fn new(ceiling: Duration) -> Self {
        Self {
            current: INITIAL_BACKOFF.min(ceiling),
            ceiling,
        }
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF.min(self.ceiling);
    }
}

impl Supervisor {
    /// Reap every live worker, returning one [`WorkerExit`] per worker in the
    /// order terminations were consumed.
    ///
    /// Stops and continues are passed to `observer` and leave the worker
    /// live. The loop ends when the process has no children left.
    ///
    /// ## Errors
    ///
    /// - `ReapError` for any wait failure other than `EINTR` or `ECHILD`
    /// - `ProtocolViolation` if a status names an unknown PID, or if no
    ///   children remain while a handle is still live
    pub fn reap_all(&mut self, observer: &mut dyn ReapObserver) -> Result<Vec<WorkerExit>> {
        let mut exits = Vec::with_capacity(self.live.len());
        let flags = self.wait_flags();
        let mut backoff = Backoff::new(self.config.poll_interval());

        loop {
            self.consume_records(observer, &mut exits)?;

            let outcome = match self.config.reap_mode {
                ReapMode::Blocking => wait_any(flags),
                ReapMode::Poll => wait_any(flags | WaitPidFlag::WNOHANG),
            };
            match outcome {
                Ok(WaitOutcome::Changed { pid, raw }) => {
                    backoff.reset();
                    self.consume(pid, raw, observer, &mut exits)?;
                }
                Ok(WaitOutcome::StillAlive) => std::thread::sleep(backoff.next()),
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    signal_gate::wait_quiescent();
                    self.consume_records(observer, &mut exits)?;
                    break;
                }
                Err(source) => {
                    error!("waitpid failed: {}", source);
                    return Err(CoreError::ReapError { source });
                }
            }
        }

        self.ensure_all_reaped()?;
        info!("Reaped {} workers", exits.len());
        Ok(exits)
    }

    /// Reap workers one at a time in spawn order, waiting on each PID in
    /// turn. The returned exits are in index order.
    ///
    /// Errors are the same as for [`Supervisor::reap_all`].
    pub fn reap_in_order(&mut self, observer: &mut dyn ReapObserver) -> Result<Vec<WorkerExit>> {
        let mut exits = Vec::with_capacity(self.live.len());
        let flags = self.wait_flags();

        for position in 0..self.workers.len() {
            loop {
                self.consume_records(observer, &mut exits)?;
                let handle = &self.workers[position];
                let pid = match (handle.is_live(), handle.pid()) {
                    (true, Some(pid)) => pid,
                    _ => break,
                };

                match wait_for(pid, flags) {
                    Ok(WaitOutcome::Changed { pid, raw }) => {
                        self.consume(pid, raw, observer, &mut exits)?
                    }
                    Ok(WaitOutcome::StillAlive) | Err(Errno::EINTR) => continue,
                    Err(Errno::ECHILD) => {
                        // Either the handler took it, or it is gone for good
                        signal_gate::wait_quiescent();
                        self.consume_records(observer, &mut exits)?;
                        if self.workers[position].is_live() {
                            return Err(CoreError::ProtocolViolation(format!(
                                "worker {} (pid {}) is no longer a child but was never reaped",
                                position, pid
                            )));
                        }
                    }
                    Err(source) => {
                        error!("waitpid({}) failed: {}", pid, source);
                        return Err(CoreError::ReapError { source });
                    }
                }
            }
        }

        exits.sort_by_key(|exit| exit.index);
        info!("Reaped {} workers in spawn order", exits.len());
        Ok(exits)
    }

    fn wait_flags(&self) -> WaitPidFlag {
        if self.config.report_job_control {
            WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED
        } else {
            WaitPidFlag::empty()
        }
    }

    fn consume_records(
        &mut self,
        observer: &mut dyn ReapObserver,
        exits: &mut Vec<WorkerExit>,
    ) -> Result<()> {
        for record in signal_gate::take_records() {
            self.consume(record.pid, record.raw, observer, exits)?;
        }
        Ok(())
    }

    /// Apply one raw status to the handle owning `pid`
    fn consume(
        &mut self,
        pid: Pid,
        raw: i32,
        observer: &mut dyn ReapObserver,
        exits: &mut Vec<WorkerExit>,
    ) -> Result<()> {
        let Some(&index) = self.live.get(&pid) else {
            return Err(CoreError::ProtocolViolation(format!(
                "status {:#x} for pid {} matches no live worker",
                raw, pid
            )));
        };
        let Some(status) = classify(pid, raw) else {
            return Ok(());
        };

        match status {
            ExitStatus::Stopped { signal } => {
                if self.config.report_job_control {
                    debug!("Worker {} (pid {}) stopped by signal {}", index, pid, signal);
                    observer.on_stopped(index, signal);
                }
            }
            ExitStatus::Continued => {
                if self.config.report_job_control {
                    debug!("Worker {} (pid {}) continued", index, pid);
                    observer.on_continued(index);
                }
            }
            _ => {
                let handle = &mut self.workers[index];
                handle.terminate(status)?;
                let exit = handle.reap()?;
                self.live.remove(&pid);
                debug!("Reaped worker {} (pid {}): {}", index, pid, status);
                observer.on_reaped(&exit);
                exits.push(exit);
            }
        }
        Ok(())
    }

    fn ensure_all_reaped(&self) -> Result<()> {
        if self.live.is_empty() {
            return Ok(());
        }
        let mut stray: Vec<usize> = self.live.values().copied().collect();
        stray.sort_unstable();
        warn!("No children remain but workers {:?} were never reaped", stray);
        Err(CoreError::ProtocolViolation(format!(
            "no children remain but workers {:?} are still live",
            stray
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(5));
        let delays: Vec<_> = (0..5).map(|_| backoff.next().as_millis()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(1));
    }

    #[test]
    fn test_backoff_ceiling_below_initial() {
        let mut backoff = Backoff::new(Duration::from_micros(200));
        assert_eq!(backoff.next(), Duration::from_micros(200));
        assert_eq!(backoff.next(), Duration::from_micros(200));
    }
}
