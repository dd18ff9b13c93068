//! Integration tests for the signal gate
//!
//! Signal dispositions and the deferred-signal state are process-wide, so
//! the tests run serially.

#![cfg(unix)]

use brood_core::signal_gate::delivery_count;
use brood_core::{CoreError, DeferredSignalSet, SignalGate};
use nix::sys::signal::{raise, SigSet, Signal};
use serial_test::serial;

#[test]
#[serial]
fn test_pending_reports_raised_signal() {
    let gate = SignalGate::new();
    gate.install_counting_handler(Signal::SIGUSR1).unwrap();
    let before = delivery_count(Signal::SIGUSR1);

    let section = gate.enter_critical_section(&[Signal::SIGUSR1]).unwrap();
    assert!(gate.in_critical_section());
    assert!(section.pending().unwrap().is_empty());

    raise(Signal::SIGUSR1).unwrap();
    raise(Signal::SIGUSR1).unwrap();
    assert_eq!(section.pending().unwrap(), vec![Signal::SIGUSR1]);
    assert_eq!(delivery_count(Signal::SIGUSR1), before);

    section.close().unwrap();
    assert!(!gate.in_critical_section());
    // Standard signals coalesce while blocked
    assert_eq!(delivery_count(Signal::SIGUSR1), before + 1);
}

#[test]
#[serial]
fn test_snapshot_tracks_open_section() {
    let gate = SignalGate::new();
    assert!(DeferredSignalSet::snapshot().is_empty());

    let section = gate
        .enter_critical_section(&[Signal::SIGUSR2, Signal::SIGCHLD])
        .unwrap();
    let snapshot = DeferredSignalSet::snapshot();
    assert!(snapshot.deferred.contains(&Signal::SIGUSR2));
    assert!(snapshot.deferred.contains(&Signal::SIGCHLD));
    assert!(snapshot.pending.is_empty());
    assert!(section.defers(Signal::SIGCHLD));
    assert!(!section.defers(Signal::SIGUSR1));

    drop(section);
    assert!(DeferredSignalSet::snapshot().is_empty());
}

#[test]
#[serial]
fn test_section_leaves_mask_as_found() {
    let gate = SignalGate::new();

    // Caller already blocks SIGUSR2 on its own
    let mut preblocked = SigSet::empty();
    preblocked.add(Signal::SIGUSR2);
    preblocked.thread_block().unwrap();

    let section = gate
        .enter_critical_section(&[Signal::SIGUSR2, Signal::SIGCHLD])
        .unwrap();
    section.close().unwrap();

    let mask = SigSet::thread_get_mask().unwrap();
    assert!(mask.contains(Signal::SIGUSR2));
    assert!(!mask.contains(Signal::SIGCHLD));

    preblocked.thread_unblock().unwrap();
}

#[test]
#[serial]
fn test_counting_handler_rejects_sigchld() {
    let gate = SignalGate::new();
    let err = gate.install_counting_handler(Signal::SIGCHLD).unwrap_err();
    assert!(matches!(err, CoreError::SignalOpError { op: "sigaction", .. }));
}
