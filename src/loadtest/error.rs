//! Error types for the load generation engine.
//!
//! Defines [`LoadTestError`] for fatal configuration and startup errors,
//! [`SigningError`] for credential problems detected by the request signer,
//! and [`RequestError`] for per-request failures that are recorded as
//! failed samples instead of aborting the run.

/// Fatal errors that prevent a run from starting.
///
/// Every variant surfaces to the caller of
/// [`LoadTestEngine::run`](crate::loadtest::engine::LoadTestEngine::run)
/// before the first request is sent.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure for the target or settings sections.
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// The load shape parameters are out of range (negative rate or target,
    /// non-positive time limit).
    #[error("Invalid load shape: {message}")]
    ShapeConfig { message: String },

    /// Credentials are missing or the request cannot be signed.
    #[error("Request signing failed: {0}")]
    Signing(#[from] SigningError),

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// The request payload could not be loaded.
    #[error("Failed to read payload '{path}': {source}")]
    Payload {
        source: std::io::Error,
        path: String,
    },
}

impl LoadTestError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        Self::ShapeConfig {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }
}

/// Errors raised by [`RequestSigner`](crate::loadtest::signer::RequestSigner).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// The access key id is absent or empty.
    #[error("access key is missing or empty")]
    MissingAccessKey,

    /// The secret access key is absent or empty.
    #[error("secret key is missing or empty")]
    MissingSecretKey,

    /// The endpoint has no host to sign.
    #[error("endpoint has no host component")]
    MissingHost,

    /// The timestamp cannot be rendered as a four-digit-year signing date.
    #[error("timestamp {0} is outside the signable range")]
    InvalidTimestamp(String),
}

/// Per-request failures encountered by virtual users.
///
/// None of these abort the run. Each variant maps to a metrics category via
/// [`RequestError::error_category`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The target answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request exceeded the configured per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A 2xx response whose body is not the expected JSON object.
    #[error("Malformed response (HTTP {status}): {message}")]
    MalformedResponse { status: u16, message: String },

    /// The user was force-terminated by the drain timeout while waiting on
    /// this request.
    #[error("Request aborted during drain")]
    Aborted,
}

impl RequestError {
    /// Returns the error category as a static string for metrics classification.
    ///
    /// Categories: `"http"`, `"timeout"`, `"connection"`, `"malformed"`, `"aborted"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::MalformedResponse { .. } => "malformed",
            Self::Aborted => "aborted",
        }
    }

    /// HTTP status carried by the error, if the target produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::MalformedResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`RequestError`] variant.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Connection {
                message: err.to_string(),
            }
        }
    }
}
