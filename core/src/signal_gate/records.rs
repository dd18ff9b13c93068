//! Termination records written by the `SIGCHLD` handler
//!
//! The handler never classifies, logs or allocates. For every child that is
//! reapable when it runs it reserves a slot, performs one non-blocking
//! `waitpid`, and publishes the pid together with the raw status. The
//! supervisor's reap loop later takes the published records and interprets
//! them.
//!
//! Slot protocol (`pid` word):
//!
//! ```text
//! EMPTY --handler reserve--> RESERVED --waitpid hit--> pid > 0 --take--> EMPTY
//!                                      \--no child----------------------> EMPTY
//! ```
//!
//! A `RESERVED` slot means a reap is in flight: the kernel may already have
//! released the child while its status is not yet visible here.

use super::deferred;
use crate::process::unix::{raw_waitpid, WaitOutcome};
use nix::errno::Errno;
use nix::sys::wait::WaitPidFlag;
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Number of termination records the handler can hold before it stops
/// draining and leaves children for the reap loop.
pub const RECORD_SLOTS: usize = 256;

const EMPTY: i32 = 0;
const RESERVED: i32 = -1;

struct Slot {
    pid: AtomicI32,
    raw: AtomicI32,
}

impl Slot {
    const fn new() -> Self {
        Self {
            pid: AtomicI32::new(EMPTY),
            raw: AtomicI32::new(0),
        }
    }
}

static SLOTS: [Slot; RECORD_SLOTS] = [const { Slot::new() }; RECORD_SLOTS];

static RECORDED: AtomicU64 = AtomicU64::new(0);
static OVERFLOWED: AtomicU64 = AtomicU64::new(0);
static INVOCATIONS: AtomicU64 = AtomicU64::new(0);

/// A child state change observed by the handler, not yet interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationRecord {
    /// Child that changed state
    pub pid: Pid,
    /// Raw wait status
    pub raw: i32,
}

/// Counters describing handler activity since process start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    /// State changes the handler reaped and recorded (monotonic)
    pub recorded: u64,
    /// Times the handler stopped draining because every slot was taken
    pub overflowed: u64,
    /// Times the handler ran, including deferred runs
    pub invocations: u64,
}

/// Current handler counters
pub fn handler_stats() -> HandlerStats {
    HandlerStats {
        recorded: RECORDED.load(Ordering::SeqCst),
        overflowed: OVERFLOWED.load(Ordering::SeqCst),
        invocations: INVOCATIONS.load(Ordering::SeqCst),
    }
}

fn reserve() -> Option<&'static Slot> {
    SLOTS.iter().find(|slot| {
        slot.pid
            .compare_exchange(EMPTY, RESERVED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    })
}

/// `SIGCHLD` handler. Async-signal-safe: atomics and `waitpid` only.
pub(crate) extern "C" fn on_child_state_change(_signal: libc::c_int) {
    let saved_errno = Errno::last_raw();
    INVOCATIONS.fetch_add(1, Ordering::SeqCst);

    if !deferred::defer_delivery(libc::SIGCHLD) {
        drain_reapable();
    }

    Errno::set_raw(saved_errno);
}

/// Several SIGCHLDs coalesce into one delivery, so keep polling until no
/// child is reapable rather than reaping a single one.
fn drain_reapable() {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        let Some(slot) = reserve() else {
            OVERFLOWED.fetch_add(1, Ordering::SeqCst);
            return;
        };
        match raw_waitpid(-1, flags) {
            Ok(WaitOutcome::Changed { pid, raw }) => {
                slot.raw.store(raw, Ordering::Relaxed);
                slot.pid.store(pid.as_raw(), Ordering::Release);
                RECORDED.fetch_add(1, Ordering::SeqCst);
            }
            // StillAlive, ECHILD, EINTR: nothing more to take right now
            _ => {
                slot.pid.store(EMPTY, Ordering::Release);
                return;
            }
        }
    }
}

/// Take every published record. Records come out in slot order, which is
/// unrelated to the order the children changed state.
pub(crate) fn take_records() -> Vec<TerminationRecord> {
    let mut taken = Vec::new();
    for slot in &SLOTS {
        let pid = slot.pid.load(Ordering::Acquire);
        if pid <= 0 {
            continue;
        }
        let raw = slot.raw.load(Ordering::Relaxed);
        if slot
            .pid
            .compare_exchange(pid, EMPTY, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            taken.push(TerminationRecord {
                pid: Pid::from_raw(pid),
                raw,
            });
        }
    }
    taken
}

/// Whether a handler is between reaping a child and publishing its status
pub(crate) fn in_flight() -> bool {
    SLOTS
        .iter()
        .any(|slot| slot.pid.load(Ordering::Acquire) == RESERVED)
}

/// Spin until no handler run is in flight.
pub(crate) fn wait_quiescent() {
    while in_flight() {
        std::thread::yield_now();
    }
}

/// Records copied into a fork child belong to the parent.
pub(crate) fn reset_after_fork() {
    for slot in &SLOTS {
        slot.pid.store(EMPTY, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_take_records_on_idle_table_is_empty() {
        // Every test leaves the table drained
        assert!(take_records().is_empty());
        assert!(!in_flight());
        wait_quiescent();
    }

    #[test]
    #[serial]
    fn test_published_slot_is_taken_once() {
        let slot = reserve().expect("free slot");
        assert!(in_flight());
        slot.raw.store(101 << 8, Ordering::Relaxed);
        slot.pid.store(999_999, Ordering::Release);

        let records = take_records();
        assert!(records.contains(&TerminationRecord {
            pid: Pid::from_raw(999_999),
            raw: 101 << 8,
        }));
        assert!(!take_records()
            .iter()
            .any(|r| r.pid == Pid::from_raw(999_999)));
    }

    #[test]
    #[serial]
    fn test_full_table_leaves_children_to_reap_loop() {
        use crate::config::SupervisorConfig;
        use crate::signal_gate::SignalGate;
        use crate::supervisor::{NullObserver, Supervisor};
        use nix::sys::signal::Signal;
        use std::time::{Duration, Instant};

        // Pids above the default pid_max never name a real child
        const FILLER_BASE: i32 = 4_000_000;

        assert!(take_records().is_empty());
        let mut filled = 0;
        while let Some(slot) = reserve() {
            slot.raw.store(0, Ordering::Relaxed);
            slot.pid.store(FILLER_BASE + filled, Ordering::Release);
            filled += 1;
        }
        assert_eq!(filled as usize, RECORD_SLOTS);

        let before = handler_stats();
        let gate = SignalGate::new();
        gate.install_termination_handler().unwrap();
        let mut supervisor = Supervisor::new(SupervisorConfig {
            workers: 2,
            ..SupervisorConfig::default()
        });
        let section = gate.enter_critical_section(&[Signal::SIGCHLD]).unwrap();
        supervisor.spawn_all(&section, 2, || {}).unwrap();
        section.close().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handler_stats().overflowed == before.overflowed && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        // Let the second worker's notification land too
        std::thread::sleep(Duration::from_millis(100));
        let after = handler_stats();
        assert!(after.overflowed > before.overflowed);
        assert_eq!(after.recorded, before.recorded);

        let fillers = take_records();
        assert_eq!(fillers.len(), RECORD_SLOTS);
        assert!(fillers.iter().all(|r| r.pid.as_raw() >= FILLER_BASE));

        let exits = supervisor.reap_all(&mut NullObserver).unwrap();
        let mut codes: Vec<_> = exits.iter().map(|e| e.status.code()).collect();
        codes.sort();
        assert_eq!(codes, vec![Some(100), Some(101)]);
    }
}
