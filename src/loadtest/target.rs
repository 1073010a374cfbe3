//! The inference endpoint seen from the load generator.
//!
//! [`Target`] is the seam between virtual users and the network. The engine
//! uses [`HttpTarget`] against a real endpoint; tests substitute in-process
//! implementations.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::loadtest::error::{LoadTestError, RequestError};
use crate::loadtest::signer::SignedHeaders;

/// Longest error body kept on a [`RequestError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// JSON field carrying the server-side processing time, in seconds.
const PREDICTION_LATENCY_FIELD: &str = "predictionLatency";

/// One signed request ready to send.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub headers: SignedHeaders,
    pub body: Bytes,
}

/// Successful answer from the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvokeResponse {
    pub status: u16,
    /// Server-reported inner processing time, zero when not reported.
    pub prediction_latency: Duration,
}

/// Something virtual users can send signed requests to.
#[async_trait]
pub trait Target: Send + Sync {
    async fn invoke(&self, request: SignedRequest) -> Result<InvokeResponse, RequestError>;
}

/// [`Target`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTarget {
    client: Client,
    endpoint: Url,
}

impl HttpTarget {
    /// Build a target POSTing to `endpoint` with a per-request `timeout`.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, LoadTestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoadTestError::validation(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Target for HttpTarget {
    async fn invoke(&self, request: SignedRequest) -> Result<InvokeResponse, RequestError> {
        let headers = header_map(&request.headers)?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| RequestError::classify_reqwest(&e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RequestError::classify_reqwest(&e))?;

        if !status.is_success() {
            return Err(RequestError::Http {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(InvokeResponse {
            status: status.as_u16(),
            prediction_latency: parse_prediction_latency(status.as_u16(), &body)?,
        })
    }
}

fn header_map(headers: &SignedHeaders) -> Result<HeaderMap, RequestError> {
    let mut map = HeaderMap::with_capacity(4);
    for (name, value) in headers.pairs() {
        let value = HeaderValue::from_str(value).map_err(|e| RequestError::Connection {
            message: format!("invalid {name} header: {e}"),
        })?;
        map.insert(HeaderName::from_static(name), value);
    }
    Ok(map)
}

/// Extract `predictionLatency` from a 2xx body.
///
/// The body must be a JSON object. A missing, negative or non-numeric
/// latency field yields zero.
pub fn parse_prediction_latency(status: u16, body: &[u8]) -> Result<Duration, RequestError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| RequestError::MalformedResponse {
            status,
            message: e.to_string(),
        })?;
    let object = value
        .as_object()
        .ok_or_else(|| RequestError::MalformedResponse {
            status,
            message: "response body is not a JSON object".to_string(),
        })?;
    Ok(object
        .get(PREDICTION_LATENCY_FIELD)
        .and_then(serde_json::Value::as_f64)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(Duration::ZERO))
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}
