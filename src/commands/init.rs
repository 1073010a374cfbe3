//! `inference-loadgen init` command implementation.

use anyhow::Result;

use inference_loadgen::loadtest::config::{CONFIG_DIR, CONFIG_FILE};

/// Execute the `init` command.
///
/// Creates `.loadgen/loadtest.toml` in the current directory. Refuses to
/// overwrite an existing file unless `force` is set.
pub fn execute_init(force: bool) -> Result<()> {
    let config_dir = std::env::current_dir()?.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}\n\
             Use `--force` to overwrite.",
            config_path.display()
        );
    }

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    std::fs::write(&config_path, generate_default_template())?;
    eprintln!("Created {}", config_path.display());
    eprintln!("Set ACCESS_KEY and SECRET_KEY (or a .env file) before running.");

    Ok(())
}

/// Default TOML template: a constant 40-user load for five minutes.
fn generate_default_template() -> String {
    r#"# Load test configuration for inference-loadgen
# Credentials are read from the ACCESS_KEY and SECRET_KEY environment
# variables (a .env file in the working directory is honored).

[target]
endpoint = "https://runtime.sagemaker.us-east-1.amazonaws.com/endpoints/your-endpoint/invocations"
region = "us-east-1"
service = "sagemaker"
content_type = "application/octet-stream"

# Request body, relative to this file
payload_path = "payload.bin"

# Per-request timeout in milliseconds
timeout_ms = 30000

[settings]
# Think time bounds per virtual user, in milliseconds
min_wait_ms = 1
max_wait_ms = 30000

# Scheduler cadence
tick_interval_ms = 1000

# How long to wait for in-flight requests when stopping
drain_timeout_secs = 30

# Load shape: constant | ramp | random | spike
[shape]
type = "constant"
time_limit_secs = 300
spawn_rate = 40

# [shape]
# type = "ramp"
# time_limit_secs = 300
# max_users = 40

# [shape]
# type = "random"
# time_limit_secs = 300
# seed = 42
# min_users = 10
# max_users = 40
# spawn_rate = 100

# [shape]
# type = "spike"
# time_limit_secs = 300
# spike_duration_secs = 5
# pattern_duration_secs = 20
# normal_users = 20
# spike_users = 40
"#
    .to_string()
}
