//! Observers for supervisor runs
//!
//! The reap loop reports job-control notifications and reaps through a
//! [`ReapObserver`]. Stop and continue notifications never consume a handle;
//! this is the only place they surface.

use schema::{SupervisorEvent, WorkerExit};
use tracing::debug;

/// Receives notifications from a supervisor run. All methods default to no-ops.
pub trait ReapObserver {
    /// A worker process was created
    fn on_spawned(&mut self, _index: usize, _pid: i32) {}

    /// A worker was stopped by `signal`; it remains live
    fn on_stopped(&mut self, _index: usize, _signal: i32) {}

    /// A stopped worker was resumed
    fn on_continued(&mut self, _index: usize) {}

    /// A worker terminated and its handle was reaped
    fn on_reaped(&mut self, _exit: &WorkerExit) {}

    /// Creating worker `index` failed
    fn on_spawn_failed(&mut self, _index: usize, _error: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ReapObserver for NullObserver {}

/// Observer that records every notification as a [`SupervisorEvent`]
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Vec<SupervisorEvent>,
}

impl EventRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events in arrival order
    pub fn events(&self) -> &[SupervisorEvent] {
        &self.events
    }

    /// Take the recorded events, leaving the recorder empty
    pub fn take(&mut self) -> Vec<SupervisorEvent> {
        std::mem::take(&mut self.events)
    }

    fn push(&mut self, event: SupervisorEvent) {
        debug!("Recorded event {:?}", event);
        self.events.push(event);
    }
}

impl ReapObserver for EventRecorder {
    fn on_spawned(&mut self, index: usize, pid: i32) {
        self.push(SupervisorEvent::spawned(index, pid));
    }

    fn on_stopped(&mut self, index: usize, signal: i32) {
        self.push(SupervisorEvent::stopped(index, signal));
    }

    fn on_continued(&mut self, index: usize) {
        self.push(SupervisorEvent::continued(index));
    }

    fn on_reaped(&mut self, exit: &WorkerExit) {
        self.push(SupervisorEvent::reaped(*exit));
    }

    fn on_spawn_failed(&mut self, index: usize, error: &str) {
        self.push(SupervisorEvent::spawn_failed(index, error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::ExitStatus;

    #[test]
    fn test_event_recorder_collects_in_order() {
        let mut recorder = EventRecorder::new();
        recorder.on_spawned(0, 100);
        recorder.on_stopped(0, 19);
        recorder.on_continued(0);
        recorder.on_reaped(&WorkerExit {
            index: 0,
            status: ExitStatus::NormalExit { code: 100 },
        });

        let kinds: Vec<_> = recorder
            .events()
            .iter()
            .map(|e| match e {
                SupervisorEvent::WorkerSpawned { .. } => "spawned",
                SupervisorEvent::WorkerStopped { .. } => "stopped",
                SupervisorEvent::WorkerContinued { .. } => "continued",
                SupervisorEvent::WorkerReaped { .. } => "reaped",
                SupervisorEvent::SpawnFailed { .. } => "failed",
            })
            .collect();
        assert_eq!(kinds, vec!["spawned", "stopped", "continued", "reaped"]);

        let taken = recorder.take();
        assert_eq!(taken.len(), 4);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_null_observer_accepts_everything() {
        let mut observer = NullObserver;
        observer.on_spawn_failed(3, "EAGAIN");
        observer.on_stopped(1, 19);
    }
}
