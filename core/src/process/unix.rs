//! Unix process creation, waiting and status decoding
//!
//! The functions here are thin, allocation-free wrappers so that they can be
//! called from the child side of a fork and from the `SIGCHLD` handler.
//!
//! ## Raw statuses
//!
//! Waits return the raw status integer rather than a decoded value. Decoding
//! happens once, in [`classify`], when the supervisor consumes the status.

// fork() and the raw waitpid() call require unsafe
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::WaitPidFlag;
use nix::unistd::{fork, ForkResult, Pid};
use schema::ExitStatus;
use tracing::{debug, error};

/// Result of a single wait call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A child changed state
    Changed {
        /// Child that changed state
        pid: Pid,
        /// Raw status as reported by `waitpid`
        raw: i32,
    },
    /// `WNOHANG` was given and no child has changed state yet
    StillAlive,
}

/// Which side of a fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkSide {
    /// Caller is the original process; carries the new child's PID
    Parent(Pid),
    /// Caller is the new child
    Child,
}

/// Create a new process that is a copy of the caller.
///
/// ## Safety
///
/// The child of a multi-threaded parent may only rely on async-signal-safe
/// operations until it exits. Callers keep the child side minimal and end it
/// with [`exit_immediately`].
pub fn fork_process() -> std::result::Result<ForkSide, Errno> {
    // Safety: the child branch is handled by the caller, which only runs the
    // worker body and then calls _exit without returning into the parent's
    // control flow.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(ForkSide::Parent(child)),
        ForkResult::Child => Ok(ForkSide::Child),
    }
}

/// Exit code a worker uses when it cannot restore its inherited signal
/// state. Worker exit codes never reach it.
pub const SETUP_FAILURE_EXIT_CODE: i32 = 255;

/// Terminate the calling process without running destructors or atexit hooks
pub fn exit_immediately(code: i32) -> ! {
    // Safety: _exit is async-signal-safe and never returns
    unsafe { libc::_exit(code) }
}

/// Wait for any child of this process to change state
pub fn wait_any(flags: WaitPidFlag) -> std::result::Result<WaitOutcome, Errno> {
    raw_waitpid(-1, flags)
}

/// Wait for a specific child to change state
pub fn wait_for(pid: Pid, flags: WaitPidFlag) -> std::result::Result<WaitOutcome, Errno> {
    raw_waitpid(pid.as_raw(), flags)
}

/// `waitpid(2)` returning the undecoded status. Async-signal-safe.
pub(crate) fn raw_waitpid(
    pid: libc::pid_t,
    flags: WaitPidFlag,
) -> std::result::Result<WaitOutcome, Errno> {
    let mut status: libc::c_int = 0;
    // Safety: status points to a valid c_int for the duration of the call
    let res = unsafe { libc::waitpid(pid, &mut status, flags.bits()) };
    match Errno::result(res)? {
        0 => Ok(WaitOutcome::StillAlive),
        child => Ok(WaitOutcome::Changed {
            pid: Pid::from_raw(child),
            raw: status,
        }),
    }
}

/// Decode a raw wait status into an [`ExitStatus`].
///
/// Signal numbers are passed through as integers, so terminations by
/// real-time signals decode like any other. Returns `None` for statuses
/// that fit none of the four shapes.
pub fn classify(pid: Pid, raw: i32) -> Option<ExitStatus> {
    if libc::WIFEXITED(raw) {
        Some(ExitStatus::NormalExit {
            code: libc::WEXITSTATUS(raw),
        })
    } else if libc::WIFSIGNALED(raw) {
        Some(ExitStatus::Signaled {
            signal: libc::WTERMSIG(raw),
            core_dumped: libc::WCOREDUMP(raw),
        })
    } else if libc::WIFSTOPPED(raw) {
        Some(ExitStatus::Stopped {
            signal: libc::WSTOPSIG(raw),
        })
    } else if libc::WIFCONTINUED(raw) {
        Some(ExitStatus::Continued)
    } else {
        debug!("Ignoring wait status {:#x} for pid {}", raw, pid);
        None
    }
}

/// Send a signal to a single child process
///
/// ## Error Handling
///
/// - `ESRCH` (No such process) is treated as success since the child has
///   already exited and been reaped
/// - Other errors are propagated as `SignalOpError`
pub fn signal_worker(pid: Pid, signal: Signal) -> Result<()> {
    debug!("Sending {} to process {}", signal, pid);

    match kill(pid, signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!("Process {} already exited", pid);
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process {}: {}", signal, pid, e);
            Err(CoreError::signal_op("kill", e))
        }
    }
}
