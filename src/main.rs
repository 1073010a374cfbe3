//! inference-loadgen: adaptive load generator for signed inference endpoints.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

/// Adaptive load generator for SigV4-signed inference endpoints
#[derive(Parser)]
#[command(name = "inference-loadgen")]
#[command(about = "Drive shaped, signed request load at an inference endpoint", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::LoadtestCommand,
}

fn main() -> Result<()> {
    // Credentials may come from a local .env file.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    cli.command.execute()
}
