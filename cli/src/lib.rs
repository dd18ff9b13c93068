//! Command implementations for the `brood` binary
//!
//! The binary only parses arguments; everything it does lives here so the
//! commands can be driven from tests with an in-memory writer.

pub mod error;

pub use error::{CliError, Result};

use brood_core::config::load_config_from_toml_path;
use brood_core::signal_gate::delivery_count;
use brood_core::{
    ReapMode, ReapObserver, RunReport, SignalGate, Supervisor, SupervisorConfig, SupervisorEvent,
    WorkerExit,
};
use nix::sys::signal::{raise, Signal};
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Options of `brood run`. Command-line values override the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// TOML file with a `SupervisorConfig`
    pub config: Option<PathBuf>,
    /// Number of workers
    pub workers: Option<usize>,
    /// Exit code of worker 0
    pub exit_base: Option<i32>,
    /// Reap loop wait strategy
    pub mode: Option<ReapMode>,
    /// Poll backoff ceiling in milliseconds
    pub poll_interval_ms: Option<u64>,
    /// Indices of workers that abort instead of exiting
    pub abort: Vec<usize>,
    /// Print events as JSON lines
    pub json: bool,
}

impl RunOptions {
    /// Build and validate the effective configuration
    pub fn resolve(&self) -> Result<SupervisorConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from_toml_path(path)
                .map_err(|e| CliError::ConfigError(format!("{}: {}", path.display(), e)))?,
            None => SupervisorConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(base) = self.exit_base {
            config.exit_code_base = base;
        }
        if let Some(mode) = self.mode {
            config.reap_mode = mode;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        config.validate()?;

        if let Some(bad) = self.abort.iter().find(|i| **i >= config.workers) {
            return Err(CliError::InvalidArgument(format!(
                "--abort {}: only {} workers are spawned",
                bad, config.workers
            )));
        }
        Ok(config)
    }
}

/// Observer that writes each notification as it happens
pub struct EventPrinter<W: Write> {
    out: W,
    json: bool,
    failed: Option<io::Error>,
}

impl<W: Write> EventPrinter<W> {
    /// Print human-readable lines, or JSON lines when `json` is set
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            failed: None,
        }
    }

    /// Surface the first write failure, if any
    pub fn finish(mut self) -> Result<W> {
        match self.failed.take() {
            Some(e) => Err(e.into()),
            None => {
                self.out.flush()?;
                Ok(self.out)
            }
        }
    }

    fn emit(&mut self, event: SupervisorEvent, text: impl FnOnce() -> String) {
        if self.failed.is_some() {
            return;
        }
        let written = if self.json {
            serde_json::to_string(&event)
                .map_err(io::Error::from)
                .and_then(|line| writeln!(self.out, "{}", line))
        } else {
            writeln!(self.out, "{}", text())
        };
        if let Err(e) = written {
            self.failed = Some(e);
        }
    }
}

impl<W: Write> ReapObserver for EventPrinter<W> {
    fn on_spawned(&mut self, index: usize, pid: i32) {
        self.emit(SupervisorEvent::spawned(index, pid), || {
            format!("worker {} spawned as pid {}", index, pid)
        });
    }

    fn on_stopped(&mut self, index: usize, signal: i32) {
        self.emit(SupervisorEvent::stopped(index, signal), || {
            format!("worker {} stopped by signal {}", index, signal)
        });
    }

    fn on_continued(&mut self, index: usize) {
        self.emit(SupervisorEvent::continued(index), || {
            format!("worker {} continued", index)
        });
    }

    fn on_reaped(&mut self, exit: &WorkerExit) {
        self.emit(SupervisorEvent::reaped(*exit), || {
            format!("worker {} {}", exit.index, exit.status)
        });
    }

    fn on_spawn_failed(&mut self, index: usize, error: &str) {
        self.emit(
            SupervisorEvent::spawn_failed(index, error.to_string()),
            || format!("worker {} could not be spawned: {}", index, error),
        );
    }
}

/// `brood run`: spawn, reap and report every worker
pub fn run_workers<W: Write>(config: SupervisorConfig, abort: &[usize], json: bool, out: W) -> Result<RunReport> {
    let workers = config.workers;
    let gate = SignalGate::new();
    let mut supervisor = Supervisor::new(config);
    let mut printer = EventPrinter::new(out, json);

    let report = supervisor.run(
        &gate,
        |index| {
            if abort.contains(&index) {
                std::process::abort();
            }
        },
        &mut printer,
    )?;

    let mut out = printer.finish()?;
    if !json {
        writeln!(out, "reaped {} of {} workers", report.exits.len(), workers)?;
    }
    info!("Run complete: {} exits", report.exits.len());
    Ok(report)
}

/// Outcome of `brood gate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateReport {
    /// Whether the raised signal was reported pending inside the section
    pub pending_inside: bool,
    /// Handler runs observed after the section was released
    pub deliveries: u64,
}

/// `brood gate`: defer `signal`, raise it, report it pending, then release.
///
/// `hold` keeps the section open longer so the signal can also be sent from
/// outside (for example with Ctrl-C for `SIGINT`).
pub fn gate_demo<W: Write>(signal: Signal, hold: Duration, mut out: W) -> Result<GateReport> {
    let gate = SignalGate::new();
    gate.install_counting_handler(signal)?;
    let before = delivery_count(signal);

    let section = gate.enter_critical_section(&[signal])?;
    writeln!(out, "{} deferred", signal)?;
    raise(signal).map_err(|e| CliError::CommandFailed(format!("raise {}: {}", signal, e)))?;

    let pending_inside = section.pending()?.contains(&signal);
    writeln!(
        out,
        "{} is {}",
        signal,
        if pending_inside { "pending" } else { "not pending" }
    )?;
    if !hold.is_zero() {
        debug!("Holding section open for {:?}", hold);
        std::thread::sleep(hold);
    }
    section.close()?;

    let deliveries = delivery_count(signal) - before;
    writeln!(out, "{} released, handler ran {} time(s)", signal, deliveries)?;
    Ok(GateReport {
        pending_inside,
        deliveries,
    })
}

/// `brood schema`: JSON schema of the event stream
pub fn event_schema() -> Result<String> {
    let schema = schemars::schema_for!(SupervisorEvent);
    Ok(serde_json::to_string_pretty(&schema)?)
}

/// Parse a signal given as `SIGUSR1`, `usr1` or `10`
pub fn parse_signal(value: &str) -> Result<Signal> {
    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number)
            .map_err(|_| CliError::InvalidArgument(format!("unknown signal number {}", number)));
    }
    let name = value.to_ascii_uppercase();
    let name = if name.starts_with("SIG") {
        name
    } else {
        format!("SIG{}", name)
    };
    Signal::from_str(&name)
        .map_err(|_| CliError::InvalidArgument(format!("unknown signal '{}'", value)))
}
