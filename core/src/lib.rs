//! Core functionality for the brood supervisor
//!
//! This crate contains the signal gate, the child supervisor and the process
//! primitives they are built on, shared by the CLI and the integration tests.
//!
//! A typical run:
//!
//! ```no_run
//! use brood_core::{NullObserver, SignalGate, Supervisor, SupervisorConfig};
//!
//! # fn main() -> brood_core::Result<()> {
//! let gate = SignalGate::new();
//! let mut supervisor = Supervisor::new(SupervisorConfig::default());
//! let report = supervisor.run(&gate, |_index| {}, &mut NullObserver)?;
//! for exit in &report.exits {
//!     println!("worker {}: {}", exit.index, exit.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod signal_gate;
#[cfg(unix)]
pub mod supervisor;

#[cfg(test)]
mod error_tests;

// Re-export schema types for convenience
pub use schema::*;

pub use config::{ReapMode, SupervisorConfig};
pub use error::{CoreError, Result};
#[cfg(unix)]
pub use signal_gate::{CriticalSection, DeferredSignalSet, SignalGate};
#[cfg(unix)]
pub use supervisor::{
    EventRecorder, NullObserver, ReapObserver, RunReport, Supervisor, WorkerHandle,
};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` takes precedence over `level` when set.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
