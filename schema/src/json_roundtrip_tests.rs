//! JSON round-trip tests for schema types
//!
//! These tests pin the wire shape of the types the command-line front end
//! prints, so that consumers of `--json` output keep working.

use crate::events::*;
use crate::worker::*;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Helper to test JSON round-trip for any serializable type
    fn test_json_roundtrip<T>(original: &T)
    where
        T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let json = serde_json::to_string(original).expect("Failed to serialize to JSON");
        let deserialized: T = serde_json::from_str(&json).expect("Failed to deserialize from JSON");
        assert_eq!(*original, deserialized, "Round-trip failed for JSON: {}", json);
    }

    #[test]
    fn test_exit_status_wire_shape() {
        let value = serde_json::to_value(ExitStatus::Signaled {
            signal: 6,
            core_dumped: true,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "kind": "signaled", "signal": 6, "coreDumped": true })
        );

        let value = serde_json::to_value(ExitStatus::NormalExit { code: 100 }).unwrap();
        assert_eq!(value, json!({ "kind": "normalExit", "code": 100 }));

        let value = serde_json::to_value(ExitStatus::Continued).unwrap();
        assert_eq!(value, json!({ "kind": "continued" }));
    }

    #[test]
    fn test_signaled_core_dump_defaults_to_false() {
        let status: ExitStatus =
            serde_json::from_value(json!({ "kind": "signaled", "signal": 9 })).unwrap();
        assert_eq!(
            status,
            ExitStatus::Signaled {
                signal: 9,
                core_dumped: false
            }
        );
    }

    #[test]
    fn test_worker_state_wire_shape() {
        let state = WorkerState::Reaped {
            status: ExitStatus::NormalExit { code: 101 },
        };
        assert_eq!(
            serde_json::to_value(state).unwrap(),
            json!({ "state": "reaped", "status": { "kind": "normalExit", "code": 101 } })
        );
        test_json_roundtrip(&state);
        test_json_roundtrip(&WorkerState::Spawned);
    }

    #[test]
    fn test_supervisor_event_json_roundtrip() {
        let events = vec![
            SupervisorEvent::spawned(0, 1234),
            SupervisorEvent::stopped(1, 19),
            SupervisorEvent::continued(1),
            SupervisorEvent::reaped(WorkerExit {
                index: 1,
                status: ExitStatus::NormalExit { code: 101 },
            }),
            SupervisorEvent::spawn_failed(2, "Resource temporarily unavailable".to_string()),
        ];
        for event in &events {
            test_json_roundtrip(event);
        }
    }

    #[test]
    fn test_reaped_event_fields_are_camel_case() {
        let event = SupervisorEvent::WorkerReaped {
            exit: WorkerExit {
                index: 4,
                status: ExitStatus::NormalExit { code: 104 },
            },
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "eventType": "workerReaped",
                "exit": { "index": 4, "status": { "kind": "normalExit", "code": 104 } },
                "timestamp": "2024-01-01T00:00:00Z"
            })
        );
    }
}
