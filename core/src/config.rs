//! Configuration loading and validation for supervisor runs
//!
//! This module parses a TOML document into a [`SupervisorConfig`], applies
//! defaults through serde, and performs strict validation with field-path
//! error messages.
//!
//! ```toml
//! workers = 2
//! exitCodeBase = 100
//! reapMode = "poll"
//! pollIntervalMs = 50
//! ```

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Largest exit code a worker may be assigned. 255 is left to workers that
/// fail to restore their signal state before running.
pub const MAX_WORKER_EXIT_CODE: i32 = 254;

/// How the reap loop waits for the next child state change
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReapMode {
    /// Block in `waitpid` until any child changes state
    #[default]
    Blocking,
    /// Poll with `WNOHANG`, backing off between empty polls
    Poll,
}

/// Settings for one supervisor run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Number of workers to spawn
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Worker `i` exits with `exit_code_base + i`
    #[serde(default = "default_exit_code_base")]
    pub exit_code_base: i32,
    /// Wait strategy of the reap loop
    #[serde(default)]
    pub reap_mode: ReapMode,
    /// Upper bound of the poll backoff in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Ask for and report stop/continue notifications
    #[serde(default = "default_true")]
    pub report_job_control: bool,
    /// Install the `SIGCHLD` handler before spawning
    #[serde(default = "default_true")]
    pub install_handler: bool,
}

fn default_workers() -> usize {
    2
}

fn default_exit_code_base() -> i32 {
    100
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            exit_code_base: default_exit_code_base(),
            reap_mode: ReapMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            report_job_control: true,
            install_handler: true,
        }
    }
}

impl SupervisorConfig {
    /// Poll backoff ceiling as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Exit code worker `index` terminates with
    pub fn exit_code_for(&self, index: usize) -> Option<i32> {
        let index = i32::try_from(index).ok()?;
        let code = self.exit_code_base.checked_add(index)?;
        (0..=MAX_WORKER_EXIT_CODE).contains(&code).then_some(code)
    }

    /// Validate the configuration and return `Result<()>` with field-path errors
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_WORKER_EXIT_CODE).contains(&self.exit_code_base) {
            return Err(CoreError::ValidationError(format!(
                "exitCodeBase: must be between 0 and {}",
                MAX_WORKER_EXIT_CODE
            )));
        }
        if self.workers > 0 && self.exit_code_for(self.workers - 1).is_none() {
            return Err(CoreError::ValidationError(format!(
                "workers: {} workers from exitCodeBase {} exceed exit code {}",
                self.workers, self.exit_code_base, MAX_WORKER_EXIT_CODE
            )));
        }
        if self.reap_mode == ReapMode::Poll && self.poll_interval_ms == 0 {
            return Err(CoreError::ValidationError(
                "pollIntervalMs: must be > 0 in poll mode".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load supervisor config from TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<SupervisorConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_config_from_toml_str(&data)
}

/// Load supervisor config from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<SupervisorConfig> {
    let cfg: SupervisorConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}
