#[cfg(test)]
mod tests {
    use crate::error::*;
    use nix::errno::Errno;
    use std::error::Error;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::SpawnError {
            index: 3,
            spawned: 3,
            source: Errno::EAGAIN,
        };
        assert!(err
            .to_string()
            .starts_with("Spawn error: worker 3 could not be created after 3 spawned"));

        let err = CoreError::SignalOpError {
            op: "sigaction",
            source: Errno::EINVAL,
        };
        assert!(err.to_string().starts_with("Signal operation error: sigaction"));

        let err = CoreError::ProtocolViolation("pid 42 has no handle".to_string());
        assert_eq!(err.to_string(), "Protocol violation: pid 42 has no handle");

        let err = CoreError::ConfigurationError("bad config".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad config");
    }

    #[test]
    fn test_errno_is_exposed_as_source() {
        let err = CoreError::ReapError {
            source: Errno::EINVAL,
        };
        let source = err.source().expect("reap error carries its errno");
        assert_eq!(source.to_string(), Errno::EINVAL.to_string());

        let err = CoreError::ValidationError("test".to_string());
        assert!(err.source().is_none());
    }

    #[test]
    fn test_fatality() {
        assert!(!CoreError::SpawnError {
            index: 0,
            spawned: 0,
            source: Errno::ENOMEM
        }
        .is_fatal());
        assert!(CoreError::ReapError {
            source: Errno::EINVAL
        }
        .is_fatal());
        assert!(CoreError::signal_op("pthread_sigmask", Errno::EINVAL).is_fatal());
        assert!(CoreError::ProtocolViolation("x".to_string()).is_fatal());
        assert!(!CoreError::ValidationError("x".to_string()).is_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoreError::ConfigurationError("test".to_string()).code(),
            "CORE001"
        );
        assert_eq!(
            CoreError::ValidationError("test".to_string()).code(),
            "CORE002"
        );
        assert_eq!(
            CoreError::InitializationError("test".to_string()).code(),
            "CORE003"
        );
        assert_eq!(
            CoreError::SpawnError {
                index: 0,
                spawned: 0,
                source: Errno::EAGAIN
            }
            .code(),
            "CORE101"
        );
        assert_eq!(
            CoreError::ReapError {
                source: Errno::EINVAL
            }
            .code(),
            "CORE103"
        );
        assert_eq!(
            CoreError::ProtocolViolation("test".to_string()).code(),
            "CORE104"
        );
    }
}
