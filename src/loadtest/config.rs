//! TOML-based run configuration.
//!
//! A config file names the endpoint to load, the think-time and tick
//! settings, and the load shape. Credentials are not part of the file; they
//! come from the environment (see [`Credentials::from_env`]).
//!
//! # Example TOML
//!
//! ```toml
//! [target]
//! endpoint = "https://runtime.sagemaker.us-east-1.amazonaws.com/endpoints/mobilenet/invocations"
//! region = "us-east-1"
//! service = "sagemaker"
//! content_type = "application/octet-stream"
//! payload_path = "sample_images/NO_DR.png"
//! timeout_ms = 30000
//!
//! [settings]
//! min_wait_ms = 1
//! max_wait_ms = 30000
//! tick_interval_ms = 1000
//! drain_timeout_secs = 30
//!
//! [shape]
//! type = "constant"
//! time_limit_secs = 300
//! spawn_rate = 40
//! ```
//!
//! `payload_path` is resolved relative to the directory holding the config
//! file.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::loadtest::error::LoadTestError;
use crate::loadtest::shape::ShapeConfig;
use crate::loadtest::signer::Credentials;
use crate::loadtest::vu::ThinkTime;

/// Where config files live, relative to the project root.
pub const CONFIG_DIR: &str = ".loadgen";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "loadtest.toml";

/// Top-level config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadTestConfig {
    pub target: TargetConfig,
    #[serde(default)]
    pub settings: Settings,
    pub shape: ShapeConfig,
}

/// The `[target]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub payload_path: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// The `[settings]` table. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_service() -> String {
    "sagemaker".to_string()
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_min_wait_ms() -> u64 {
    1
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl LoadTestConfig {
    /// Parse and validate a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, LoadTestError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    ///
    /// Returns [`LoadTestError::ConfigIo`] if the file cannot be read,
    /// [`LoadTestError::ConfigParse`] if the TOML is malformed, or a
    /// validation error.
    pub fn load(path: &Path) -> Result<Self, LoadTestError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Check the target, settings and shape sections.
    ///
    /// Shape problems surface as [`LoadTestError::ShapeConfig`], everything
    /// else as [`LoadTestError::ConfigValidation`].
    pub fn validate(&self) -> Result<(), LoadTestError> {
        self.endpoint_url()?;

        if self.target.timeout_ms == 0 {
            return Err(LoadTestError::validation("target.timeout_ms must be > 0"));
        }
        if self.target.payload_path.as_os_str().is_empty() {
            return Err(LoadTestError::validation("target.payload_path must not be empty"));
        }
        if self.target.content_type.trim().is_empty() {
            return Err(LoadTestError::validation("target.content_type must not be empty"));
        }

        let settings = &self.settings;
        if settings.min_wait_ms > settings.max_wait_ms {
            return Err(LoadTestError::validation(format!(
                "settings.min_wait_ms ({}) must not exceed settings.max_wait_ms ({})",
                settings.min_wait_ms, settings.max_wait_ms
            )));
        }
        if settings.tick_interval_ms == 0 {
            return Err(LoadTestError::validation("settings.tick_interval_ms must be > 0"));
        }
        if settings.drain_timeout_secs == 0 {
            return Err(LoadTestError::validation("settings.drain_timeout_secs must be > 0"));
        }

        self.shape.build()?;
        Ok(())
    }

    /// The endpoint as an absolute http(s) URL with a host.
    pub fn endpoint_url(&self) -> Result<Url, LoadTestError> {
        let url = Url::parse(&self.target.endpoint).map_err(|e| {
            LoadTestError::validation(format!(
                "target.endpoint '{}' is not a valid URL: {e}",
                self.target.endpoint
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LoadTestError::validation(format!(
                "target.endpoint must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(LoadTestError::validation(
                "target.endpoint must include a host",
            ));
        }
        Ok(url)
    }

    /// Resolve into a [`RunConfig`], reading the payload relative to `base_dir`.
    pub fn resolve(
        &self,
        base_dir: &Path,
        credentials: Credentials,
    ) -> Result<RunConfig, LoadTestError> {
        self.validate()?;
        let payload_path = if self.target.payload_path.is_absolute() {
            self.target.payload_path.clone()
        } else {
            base_dir.join(&self.target.payload_path)
        };
        Ok(RunConfig {
            endpoint: self.endpoint_url()?,
            region: self.target.region.clone(),
            service: self.target.service.clone(),
            content_type: self.target.content_type.clone(),
            payload: load_payload(&payload_path)?,
            payload_path,
            timeout: Duration::from_millis(self.target.timeout_ms),
            think_time: ThinkTime::new(
                Duration::from_millis(self.settings.min_wait_ms),
                Duration::from_millis(self.settings.max_wait_ms),
            ),
            tick_interval: Duration::from_millis(self.settings.tick_interval_ms),
            drain_timeout: Duration::from_secs(self.settings.drain_timeout_secs),
            shape: self.shape.clone(),
            credentials,
        })
    }
}

/// Read the request body once for the whole run.
pub fn load_payload(path: &Path) -> Result<Bytes, LoadTestError> {
    std::fs::read(path)
        .map(Bytes::from)
        .map_err(|source| LoadTestError::Payload {
            source,
            path: path.display().to_string(),
        })
}

/// Everything the engine needs for one run. Read-only once the run starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub endpoint: Url,
    pub region: String,
    pub service: String,
    pub content_type: String,
    pub payload: Bytes,
    /// Where the payload was read from, for reporting.
    pub payload_path: PathBuf,
    /// Per-request timeout.
    pub timeout: Duration,
    pub think_time: ThinkTime,
    pub tick_interval: Duration,
    pub drain_timeout: Duration,
    pub shape: ShapeConfig,
    pub credentials: Credentials,
}

impl RunConfig {
    /// A config with the default settings and an in-memory payload.
    pub fn new(
        endpoint: Url,
        payload: impl Into<Bytes>,
        shape: ShapeConfig,
        credentials: Credentials,
    ) -> Self {
        let settings = Settings::default();
        Self {
            endpoint,
            region: default_region(),
            service: default_service(),
            content_type: default_content_type(),
            payload: payload.into(),
            payload_path: PathBuf::new(),
            timeout: Duration::from_millis(default_timeout_ms()),
            think_time: ThinkTime::new(
                Duration::from_millis(settings.min_wait_ms),
                Duration::from_millis(settings.max_wait_ms),
            ),
            tick_interval: Duration::from_millis(settings.tick_interval_ms),
            drain_timeout: Duration::from_secs(settings.drain_timeout_secs),
            shape,
            credentials,
        }
    }
}
