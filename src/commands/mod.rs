//! `inference-loadgen` CLI subcommands.
//!
//! Provides `run` (execute a load test) and `init` (generate starter config).

mod init;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

pub use run::RunArgs;

/// Load test commands.
#[derive(Debug, Subcommand)]
pub enum LoadtestCommand {
    /// Run a load test against the configured endpoint
    ///
    /// Uses .loadgen/loadtest.toml (or a custom config path). Credentials are
    /// read from ACCESS_KEY / SECRET_KEY. Prints a summary to the terminal
    /// and writes a JSON report to .loadgen/reports/.
    Run {
        /// Path to config file (default: auto-discover .loadgen/loadtest.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Shape time limit in seconds (overrides config)
        #[arg(long)]
        time_limit: Option<i64>,

        /// Random walk seed (overrides config; random shape only)
        #[arg(long)]
        seed: Option<u64>,

        /// Tick interval in milliseconds (overrides config)
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Export every request record to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Disable JSON report output
        #[arg(long)]
        no_report: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Generate a starter loadtest config file
    ///
    /// Creates .loadgen/loadtest.toml with a constant shape against a
    /// placeholder endpoint.
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

impl LoadtestCommand {
    /// Execute the selected subcommand.
    pub fn execute(self) -> Result<()> {
        match self {
            LoadtestCommand::Run {
                config,
                time_limit,
                seed,
                tick_ms,
                csv,
                no_report,
                no_color,
            } => {
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(run::execute_run(RunArgs {
                    config,
                    time_limit,
                    seed,
                    tick_ms,
                    csv,
                    no_report,
                    no_color,
                }))
            }
            LoadtestCommand::Init { force } => init::execute_init(force),
        }
    }
}
