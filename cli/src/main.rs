//! Brood CLI binary
//!
//! Command-line front end for the signal gate and child supervisor.

#![allow(unused_crate_dependencies)]

use brood_core::ReapMode;
use clap::{Parser, Subcommand, ValueEnum};
use cli::{CliError, RunOptions};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

#[derive(Parser)]
#[command(name = "brood")]
#[command(about = "Spawn and reap a brood of forked workers")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn workers, then reap every one of them
    Run {
        /// TOML file with supervisor settings
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Number of workers
        #[arg(short = 'n', long)]
        workers: Option<usize>,
        /// Exit code of worker 0; worker i exits with BASE + i
        #[arg(long, value_name = "BASE")]
        exit_base: Option<i32>,
        /// How the reap loop waits
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Poll backoff ceiling in milliseconds
        #[arg(long, value_name = "MS")]
        poll_interval: Option<u64>,
        /// Worker indices that abort instead of exiting
        #[arg(long, value_delimiter = ',', value_name = "INDEX")]
        abort: Vec<usize>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Defer a signal, raise it inside the section, then release it
    Gate {
        /// Signal name or number
        #[arg(long, default_value = "SIGINT", value_parser = parse_signal_arg)]
        signal: nix::sys::signal::Signal,
        /// Keep the section open this long after raising
        #[arg(long, default_value_t = 0, value_name = "MS")]
        hold_ms: u64,
    },
    /// Print the JSON schema of the event stream
    Schema,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Blocking,
    Poll,
}

impl From<ModeArg> for ReapMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Blocking => ReapMode::Blocking,
            ModeArg::Poll => ReapMode::Poll,
        }
    }
}

fn parse_signal_arg(value: &str) -> Result<nix::sys::signal::Signal, String> {
    cli::parse_signal(value).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = brood_core::utils::init_tracing(&cli.log_level) {
        eprintln!("Warning: {}", e);
    }

    let result: cli::Result<()> = match cli.command {
        Commands::Run {
            config,
            workers,
            exit_base,
            mode,
            poll_interval,
            abort,
            json,
        } => {
            let options = RunOptions {
                config,
                workers,
                exit_base,
                mode: mode.map(ReapMode::from),
                poll_interval_ms: poll_interval,
                abort,
                json,
            };
            options.resolve().and_then(|config| {
                let report = cli::run_workers(config, &options.abort, options.json, io::stdout())?;
                match report.spawn_error {
                    Some(e) => Err(CliError::Core(e)),
                    None => Ok(()),
                }
            })
        }
        Commands::Gate { signal, hold_ms } => {
            cli::gate_demo(signal, Duration::from_millis(hold_ms), io::stdout()).map(|_| ())
        }
        Commands::Schema => cli::event_schema().map(|schema| println!("{}", schema)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("Error [{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}
