//! `inference-loadgen run` command implementation.

use anyhow::Result;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use inference_loadgen::loadtest::config::{LoadTestConfig, CONFIG_DIR, CONFIG_FILE};
use inference_loadgen::loadtest::engine::{LoadTestEngine, StopHandle};
use inference_loadgen::loadtest::report::{write_csv_file, write_report, LoadTestReport};
use inference_loadgen::loadtest::signer::Credentials;
use inference_loadgen::loadtest::summary::render_summary;

/// Parsed `run` flags.
#[derive(Debug, Default)]
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub time_limit: Option<i64>,
    pub seed: Option<u64>,
    pub tick_ms: Option<u64>,
    pub csv: Option<PathBuf>,
    pub no_report: bool,
    pub no_color: bool,
}

/// Execute the `run` command.
///
/// Loads the config (explicit path or auto-discovery), applies CLI
/// overrides, runs the engine with Ctrl+C wired to its stop handle, then
/// prints the summary and writes the requested outputs.
pub async fn execute_run(args: RunArgs) -> Result<()> {
    let config_file = match args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: {}\nUse `inference-loadgen init` to create one.",
                    path.display()
                );
            }
            path
        }
        None => match discover_config() {
            Some(path) => path,
            None => {
                anyhow::bail!(
                    "No loadtest config found.\n\
                     Run `inference-loadgen init` to create {CONFIG_DIR}/{CONFIG_FILE},\n\
                     or use `--config path/to/file.toml` to specify one."
                );
            }
        },
    };

    info!(path = %config_file.display(), "loading config");

    let mut config = LoadTestConfig::load(&config_file)
        .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", config_file.display(), e))?;

    apply_overrides(&mut config, args.time_limit, args.seed, args.tick_ms);

    let base_dir = config_file.parent().unwrap_or(Path::new("."));
    let run_config = config
        .resolve(base_dir, Credentials::from_env())
        .map_err(|e| anyhow::anyhow!("Invalid run configuration: {}", e))?;

    let engine = LoadTestEngine::new(run_config);
    let ctrl_c = tokio::spawn(handle_ctrl_c(engine.stop_handle()));

    let result = engine.run().await;
    ctrl_c.abort();
    let result = result.map_err(|e| anyhow::anyhow!("Load test failed: {}", e))?;

    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    println!("{}", render_summary(&result, engine.config()));

    if let Some(csv_path) = &args.csv {
        write_csv_file(&result.records, csv_path).map_err(|e| {
            anyhow::anyhow!("Failed to write CSV '{}': {}", csv_path.display(), e)
        })?;
        eprintln!();
        eprintln!("Records written to: {}", csv_path.display());
    }

    if !args.no_report {
        let report = LoadTestReport::from_result(&result, engine.config());
        let cwd = std::env::current_dir()?;
        match write_report(&report, &cwd) {
            Ok(path) => {
                eprintln!();
                eprintln!("Report written to: {}", path.display());
            }
            Err(e) => warn!(error = %e, "failed to write report"),
        }
    }

    Ok(())
}

/// Apply CLI flag overrides to a loaded config.
fn apply_overrides(
    config: &mut LoadTestConfig,
    time_limit: Option<i64>,
    seed: Option<u64>,
    tick_ms: Option<u64>,
) {
    if let Some(secs) = time_limit {
        config.shape.set_time_limit_secs(secs);
    }
    if let Some(seed) = seed {
        if !config.shape.set_seed(seed) {
            warn!(seed, "--seed ignored because the shape is not random");
        }
    }
    if let Some(ms) = tick_ms {
        config.settings.tick_interval_ms = ms;
    }
}

/// Discover `.loadgen/loadtest.toml` by walking parent directories.
///
/// Starts from the current working directory, matching `.git` discovery.
fn discover_config() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Ctrl+C handler with two-phase shutdown.
///
/// First Ctrl+C drains the run through the stop handle. Second Ctrl+C exits
/// immediately.
async fn handle_ctrl_c(stop: StopHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("\nReceived Ctrl+C, draining virtual users...");
    stop.stop();

    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("\nReceived second Ctrl+C, aborting immediately.");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_loadgen::loadtest::shape::ShapeConfig;

    fn config(shape: &str) -> LoadTestConfig {
        LoadTestConfig::from_toml(&format!(
            r#"
[target]
endpoint = "http://localhost:8080/invocations"
payload_path = "image.png"

[shape]
{shape}
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_discover_config_does_not_panic() {
        let _ = discover_config();
    }

    #[test]
    fn test_apply_overrides_time_limit_and_tick() {
        let mut config = config("type = \"constant\"\ntime_limit_secs = 300\nspawn_rate = 40");
        apply_overrides(&mut config, Some(30), None, Some(250));
        assert_eq!(
            config.shape,
            ShapeConfig::Constant {
                time_limit_secs: 30,
                spawn_rate: 40,
            }
        );
        assert_eq!(config.settings.tick_interval_ms, 250);
    }

    #[test]
    fn test_apply_overrides_seed() {
        let mut config = config("type = \"random\"\ntime_limit_secs = 60");
        apply_overrides(&mut config, None, Some(7), None);
        match config.shape {
            ShapeConfig::Random { seed, .. } => assert_eq!(seed, 7),
            other => panic!("Expected random shape, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_overrides_none_is_noop() {
        let mut config = config("type = \"ramp\"\ntime_limit_secs = 60\nmax_users = 5");
        let before = config.shape.clone();
        apply_overrides(&mut config, None, Some(7), None);
        assert_eq!(config.shape, before);
        assert_eq!(config.settings.tick_interval_ms, 1_000);
    }
}
