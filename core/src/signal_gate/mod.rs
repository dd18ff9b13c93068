//! Signal Gate: handler installation and scoped signal deferral
//!
//! The gate owns the process's signal dispositions for the signals the
//! supervisor cares about and hands out [`CriticalSection`] guards during
//! which chosen signals are deferred instead of delivered.
//!
//! ## Why deferral
//!
//! Between "spawn the workers" and "start waiting for them" a fast worker
//! can already have died. If its `SIGCHLD` were handled in that window the
//! supervisor might not yet have a handle for the pid. Spawning inside a
//! section that defers `SIGCHLD` turns every such early termination into a
//! delayed one.
//!
//! ## Guarantees
//!
//! - A deferred signal is queued, never dropped: the kernel keeps it pending
//!   for the supervising thread, and deliveries taken by other threads are
//!   recorded in [`DeferredSignalSet`] and re-raised when the section closes.
//! - Closing a section restores the exact thread mask that was in place when
//!   it was opened, on every exit path including unwinding.
//! - The gate is neither `Send` nor `Sync`: masks belong to a thread.

// sigaction() is unsafe because it replaces process-wide handlers
#![allow(unsafe_code)]

mod deferred;
mod records;

pub use deferred::{delivery_count, DeferredSignalSet};
pub use records::{handler_stats, HandlerStats, TerminationRecord, RECORD_SLOTS};

pub(crate) use records::{take_records, wait_quiescent};

use crate::process::{exit_immediately, SETUP_FAILURE_EXIT_CODE};
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{
    raise, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use tracing::{debug, error, info, warn};

/// Owner of signal dispositions and critical sections for one thread
#[derive(Debug)]
pub struct SignalGate {
    /// Dispositions replaced by this gate, restored on drop
    installed: RefCell<Vec<(Signal, SigAction)>>,
    /// Whether a critical section is currently open
    section_open: Cell<bool>,
    _not_send: PhantomData<*const ()>,
}

impl SignalGate {
    /// Create a gate with no handlers installed and no section open
    pub fn new() -> Self {
        Self {
            installed: RefCell::new(Vec::new()),
            section_open: Cell::new(false),
            _not_send: PhantomData,
        }
    }

    /// Install the child-termination handler.
    ///
    /// The handler records every reapable child each time it runs; see
    /// [`handler_stats`]. Installing twice through the same gate is a no-op.
    pub fn install_termination_handler(&self) -> Result<()> {
        if self.is_installed(Signal::SIGCHLD) {
            debug!("Termination handler already installed");
            return Ok(());
        }
        // SA_RESTART: a blocking waitpid interrupted by the handler resumes
        // instead of failing with EINTR. Stop/continue notifications stay on.
        self.install(
            Signal::SIGCHLD,
            SigHandler::Handler(records::on_child_state_change),
            SaFlags::SA_RESTART,
        )?;
        info!("Installed SIGCHLD termination handler");
        Ok(())
    }

    /// Install a handler that counts deliveries of `signal`.
    ///
    /// Counts are read with [`delivery_count`]. Refuses signals that cannot
    /// be caught and `SIGCHLD`, which belongs to the termination handler.
    pub fn install_counting_handler(&self, signal: Signal) -> Result<()> {
        if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP | Signal::SIGCHLD) {
            return Err(CoreError::signal_op("sigaction", Errno::EINVAL));
        }
        if self.is_installed(signal) {
            return Ok(());
        }
        self.install(
            signal,
            SigHandler::Handler(deferred::on_counted_signal),
            SaFlags::SA_RESTART,
        )?;
        debug!("Installed counting handler for {}", signal);
        Ok(())
    }

    fn is_installed(&self, signal: Signal) -> bool {
        self.installed.borrow().iter().any(|(s, _)| *s == signal)
    }

    fn install(&self, signal: Signal, handler: SigHandler, flags: SaFlags) -> Result<()> {
        // Our own signal is blocked while the handler runs
        let mut mask = SigSet::empty();
        mask.add(signal);
        let action = SigAction::new(handler, flags, mask);
        // Safety: both handlers only touch atomics and call async-signal-safe
        // functions.
        let previous = unsafe { sigaction(signal, &action) }.map_err(|e| {
            error!("Failed to install handler for {}: {}", signal, e);
            CoreError::signal_op("sigaction", e)
        })?;
        self.installed.borrow_mut().push((signal, previous));
        Ok(())
    }

    /// Defer delivery of `signals` until the returned guard is released.
    ///
    /// Fails with `SignalOpError` if the thread mask cannot be changed, and
    /// with `ProtocolViolation` if a section is already open on this gate.
    pub fn enter_critical_section(&self, signals: &[Signal]) -> Result<CriticalSection<'_>> {
        if self.section_open.get() {
            return Err(CoreError::ProtocolViolation(
                "a critical section is already open on this thread".to_string(),
            ));
        }
        if signals
            .iter()
            .any(|s| matches!(s, Signal::SIGKILL | Signal::SIGSTOP))
        {
            return Err(CoreError::signal_op("pthread_sigmask", Errno::EINVAL));
        }

        let mut set = SigSet::empty();
        for signal in signals {
            set.add(*signal);
        }
        let bits = deferred::mask_of(signals);

        deferred::defer(bits);
        let saved = match set.thread_swap_mask(SigmaskHow::SIG_BLOCK) {
            Ok(saved) => saved,
            Err(e) => {
                deferred::release(bits);
                error!("Failed to block {:?}: {}", signals, e);
                return Err(CoreError::signal_op("pthread_sigmask", e));
            }
        };
        self.section_open.set(true);
        debug!("Entered critical section deferring {:?}", signals);

        Ok(CriticalSection {
            gate: self,
            signals: signals.to_vec(),
            bits,
            saved,
            closed: false,
        })
    }

    /// Whether a critical section is open on this gate
    pub fn in_critical_section(&self) -> bool {
        self.section_open.get()
    }
}

impl Default for SignalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SignalGate {
    fn drop(&mut self) {
        for (signal, previous) in self.installed.get_mut().drain(..).rev() {
            // Safety: restores the disposition that was in place before us
            if let Err(e) = unsafe { sigaction(signal, &previous) } {
                warn!("Failed to restore disposition of {}: {}", signal, e);
            }
        }
    }
}

/// Scoped deferral of a set of signals, released on drop
#[derive(Debug)]
pub struct CriticalSection<'g> {
    gate: &'g SignalGate,
    signals: Vec<Signal>,
    bits: u64,
    saved: SigSet,
    closed: bool,
}

impl CriticalSection<'_> {
    /// Signals this section defers
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Whether `signal` is deferred by this section
    pub fn defers(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }

    /// Thread mask in place before the section opened
    pub fn saved_mask(&self) -> &SigSet {
        &self.saved
    }

    /// Deferred signals that have arrived since the section opened.
    ///
    /// Combines the kernel's pending set with deliveries other threads
    /// handed back to the gate.
    pub fn pending(&self) -> Result<Vec<Signal>> {
        // Safety: sigset_t is plain data; sigemptyset initializes it
        let mut raw: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe { libc::sigemptyset(&mut raw) };
        Errno::result(unsafe { libc::sigpending(&mut raw) })
            .map_err(|e| CoreError::signal_op("sigpending", e))?;

        Ok(self
            .signals
            .iter()
            .copied()
            .filter(|sig| {
                // Safety: raw was filled by sigpending above
                let kernel = unsafe { libc::sigismember(&raw, *sig as libc::c_int) } == 1;
                kernel || deferred::is_pending(*sig)
            })
            .collect())
    }

    /// Release the section, surfacing a mask restore failure.
    pub fn close(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.gate.section_open.set(false);

        // Clear deferral first so handlers running on unblock act normally
        let redeliver = deferred::release(self.bits);
        self.saved.thread_set_mask().map_err(|e| {
            error!("Failed to restore signal mask: {}", e);
            CoreError::signal_op("pthread_sigmask", e)
        })?;

        for signal in self.signals.iter().copied() {
            if redeliver & deferred::bit(signal as libc::c_int) != 0 {
                debug!("Re-raising {} deferred on another thread", signal);
                raise(signal).map_err(|e| CoreError::signal_op("raise", e))?;
            }
        }
        debug!("Left critical section deferring {:?}", self.signals);
        Ok(())
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("Critical section release failed: {}", e);
        }
    }
}

/// Reset inherited signal state in a freshly forked worker.
///
/// Restores `mask`, returns `SIGCHLD` to its default disposition and forgets
/// the parent's deferred state and records. Async-signal-safe. A worker that
/// cannot do this exits with [`SETUP_FAILURE_EXIT_CODE`] instead of running
/// its body under the parent's mask.
pub(crate) fn reset_in_child(mask: &SigSet) {
    deferred::reset_after_fork();
    records::reset_after_fork();
    if restore_child_signals(mask).is_err() {
        exit_immediately(SETUP_FAILURE_EXIT_CODE);
    }
}

fn restore_child_signals(mask: &SigSet) -> std::result::Result<(), Errno> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // Safety: installing SIG_DFL has no handler-safety requirements
    unsafe { sigaction(Signal::SIGCHLD, &default) }?;
    mask.thread_set_mask()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_section_restores_mask() {
        let gate = SignalGate::new();
        let before = SigSet::thread_get_mask().unwrap();
        assert!(!before.contains(Signal::SIGUSR2));

        {
            let section = gate.enter_critical_section(&[Signal::SIGUSR2]).unwrap();
            assert!(gate.in_critical_section());
            assert!(section.defers(Signal::SIGUSR2));
            let during = SigSet::thread_get_mask().unwrap();
            assert!(during.contains(Signal::SIGUSR2));
            assert!(DeferredSignalSet::snapshot()
                .deferred
                .contains(&Signal::SIGUSR2));
        }

        assert!(!gate.in_critical_section());
        let after = SigSet::thread_get_mask().unwrap();
        assert_eq!(
            after.contains(Signal::SIGUSR2),
            before.contains(Signal::SIGUSR2)
        );
        assert!(!DeferredSignalSet::snapshot()
            .deferred
            .contains(&Signal::SIGUSR2));
    }

    #[test]
    #[serial]
    fn test_nested_section_is_refused() {
        let gate = SignalGate::new();
        let _outer = gate.enter_critical_section(&[Signal::SIGUSR2]).unwrap();
        let inner = gate.enter_critical_section(&[Signal::SIGHUP]);
        assert!(matches!(inner, Err(CoreError::ProtocolViolation(_))));
    }

    #[test]
    #[serial]
    fn test_uncatchable_signals_are_refused() {
        let gate = SignalGate::new();
        assert!(matches!(
            gate.enter_critical_section(&[Signal::SIGKILL]),
            Err(CoreError::SignalOpError { .. })
        ));
        assert!(matches!(
            gate.install_counting_handler(Signal::SIGSTOP),
            Err(CoreError::SignalOpError { .. })
        ));
        assert!(matches!(
            gate.install_counting_handler(Signal::SIGCHLD),
            Err(CoreError::SignalOpError { .. })
        ));
        assert!(!gate.in_critical_section());
    }

    #[test]
    #[serial]
    fn test_raised_signal_is_deferred_until_close() {
        let gate = SignalGate::new();
        gate.install_counting_handler(Signal::SIGUSR1).unwrap();
        let before = delivery_count(Signal::SIGUSR1);

        let section = gate.enter_critical_section(&[Signal::SIGUSR1]).unwrap();
        // raise() targets the calling thread, which blocks SIGUSR1
        raise(Signal::SIGUSR1).unwrap();
        raise(Signal::SIGUSR1).unwrap();
        assert_eq!(delivery_count(Signal::SIGUSR1), before);
        assert_eq!(section.pending().unwrap(), vec![Signal::SIGUSR1]);

        section.close().unwrap();
        // Two raises of a blocked classic signal coalesce into one delivery
        assert_eq!(delivery_count(Signal::SIGUSR1), before + 1);
    }

    #[test]
    #[serial]
    fn test_section_released_on_early_return() {
        fn fails_inside(gate: &SignalGate) -> Result<()> {
            let _section = gate.enter_critical_section(&[Signal::SIGUSR2])?;
            Err(CoreError::ValidationError("bail out".to_string()))
        }

        let gate = SignalGate::new();
        assert!(fails_inside(&gate).is_err());
        assert!(!gate.in_critical_section());
        assert!(!SigSet::thread_get_mask()
            .unwrap()
            .contains(Signal::SIGUSR2));
    }

    #[test]
    #[serial]
    fn test_child_signal_restore_applies_saved_mask() {
        let before = SigSet::thread_get_mask().unwrap();
        let mut blocked = SigSet::empty();
        blocked.add(Signal::SIGUSR2);
        blocked.thread_block().unwrap();

        restore_child_signals(&before).unwrap();
        assert!(!SigSet::thread_get_mask().unwrap().contains(Signal::SIGUSR2));
    }
}
