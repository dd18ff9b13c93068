//! Process-wide deferred-signal bookkeeping
//!
//! Blocking a signal in the supervising thread's mask is not enough in a
//! multi-threaded process: the kernel delivers a process-directed signal to
//! any thread that does not block it. Every handler installed by the gate
//! therefore checks this set first and, while its signal is deferred, only
//! marks it pending. The owning critical section re-raises pending signals
//! on its own thread when it closes.
//!
//! Deferred and pending bits share one atomic word (deferred in the low 32
//! bits, pending in the high 32) so that "mark pending while deferred" and
//! "clear on close" cannot interleave.

use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicU64, Ordering};

static STATE: AtomicU64 = AtomicU64::new(0);

/// One counter per classic signal number, indexed by signal number
static DELIVERIES: [AtomicU64; 32] = [const { AtomicU64::new(0) }; 32];

const PENDING_SHIFT: u32 = 32;

/// Bit for `signal` in the deferred half of the state word.
pub(crate) fn bit(signal: libc::c_int) -> u64 {
    debug_assert!((1..32).contains(&signal));
    1u64 << signal
}

pub(crate) fn mask_of(signals: &[Signal]) -> u64 {
    signals
        .iter()
        .fold(0, |acc, sig| acc | bit(*sig as libc::c_int))
}

fn signals_in(mask: u64) -> Vec<Signal> {
    Signal::iterator()
        .filter(|sig| mask & bit(*sig as libc::c_int) != 0)
        .collect()
}

/// Mark `mask` as deferred. Returns the bits that were already deferred.
pub(crate) fn defer(mask: u64) -> u64 {
    STATE.fetch_or(mask, Ordering::SeqCst) & mask
}

/// Stop deferring `mask`; returns the subset that arrived while deferred.
pub(crate) fn release(mask: u64) -> u64 {
    let clear = mask | (mask << PENDING_SHIFT);
    let prev = STATE.fetch_and(!clear, Ordering::SeqCst);
    (prev >> PENDING_SHIFT) & mask
}

/// Called from signal handlers. Returns `true` when the delivery was
/// recorded as pending and the handler must not act on it now.
pub(crate) fn defer_delivery(signal: libc::c_int) -> bool {
    let b = bit(signal);
    let mut current = STATE.load(Ordering::SeqCst);
    loop {
        if current & b == 0 {
            return false;
        }
        let next = current | (b << PENDING_SHIFT);
        match STATE.compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

/// Whether `signal` arrived while deferred and has not been re-raised yet
pub(crate) fn is_pending(signal: Signal) -> bool {
    let b = bit(signal as libc::c_int) << PENDING_SHIFT;
    STATE.load(Ordering::SeqCst) & b != 0
}

/// The fork child inherits the parent's state word; it owns no sections.
pub(crate) fn reset_after_fork() {
    STATE.store(0, Ordering::SeqCst);
}

/// Handler that only counts deliveries of its signal.
pub(crate) extern "C" fn on_counted_signal(signal: libc::c_int) {
    if !(1..32).contains(&signal) || defer_delivery(signal) {
        return;
    }
    DELIVERIES[signal as usize].fetch_add(1, Ordering::SeqCst);
}

/// Number of deliveries the counting handler has acted on for `signal`
pub fn delivery_count(signal: Signal) -> u64 {
    DELIVERIES[signal as usize].load(Ordering::SeqCst)
}

/// Snapshot of the process-wide deferred-signal state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredSignalSet {
    /// Signals currently deferred by an open critical section
    pub deferred: Vec<Signal>,
    /// Deferred signals that arrived and await re-delivery
    pub pending: Vec<Signal>,
}

impl DeferredSignalSet {
    /// Read the current state
    pub fn snapshot() -> Self {
        let state = STATE.load(Ordering::SeqCst);
        Self {
            deferred: signals_in(state & 0xffff_ffff),
            pending: signals_in(state >> PENDING_SHIFT),
        }
    }

    /// Whether nothing is deferred or pending
    pub fn is_empty(&self) -> bool {
        self.deferred.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SIGURG is never deferred by anything else in the unit test binary.
    const SIG: Signal = Signal::SIGURG;

    #[test]
    fn test_delivery_marks_pending_only_while_deferred() {
        let mask = mask_of(&[SIG]);
        assert!(!defer_delivery(SIG as libc::c_int));

        assert_eq!(defer(mask), 0);
        assert!(defer_delivery(SIG as libc::c_int));
        assert!(is_pending(SIG));
        // Coalesces like the kernel does
        assert!(defer_delivery(SIG as libc::c_int));

        assert_eq!(release(mask), mask);
        assert!(!is_pending(SIG));
        assert!(!defer_delivery(SIG as libc::c_int));
    }

    #[test]
    fn test_release_without_delivery_reports_nothing() {
        let mask = mask_of(&[Signal::SIGWINCH]);
        defer(mask);
        assert_eq!(release(mask), 0);
    }

    #[test]
    fn test_mask_of() {
        let mask = mask_of(&[Signal::SIGINT, Signal::SIGCHLD]);
        assert_eq!(
            mask,
            (1 << libc::SIGINT as u64) | (1 << libc::SIGCHLD as u64)
        );
        let mut names = signals_in(mask);
        names.sort_by_key(|s| *s as i32);
        assert_eq!(names, vec![Signal::SIGINT, Signal::SIGCHLD]);
    }
}
