//! SigV4-style request signing.
//!
//! [`RequestSigner`] is built once per run from the endpoint, region, service,
//! content type and [`Credentials`]. Each call to [`RequestSigner::sign`]
//! derives a fresh [`SigningContext`] for the given payload and timestamp and
//! returns the [`SignedHeaders`] to attach to the request.
//!
//! Signing is deterministic and side-effect free: the same payload, timestamp
//! and configuration always produce the same `Authorization` header.

use chrono::{DateTime, Datelike, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::loadtest::error::SigningError;

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier placed in the string-to-sign and header.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Headers covered by the signature, sorted and lower-cased.
pub const SIGNED_HEADERS: &str = "content-type;host;x-amz-date";

/// Final component of every credential scope.
const SCOPE_TERMINATOR: &str = "aws4_request";

/// HTTP method of every signed request.
const METHOD: &str = "POST";

/// Environment variable holding the access key id.
pub const ACCESS_KEY_ENV: &str = "ACCESS_KEY";

/// Environment variable holding the secret access key.
pub const SECRET_KEY_ENV: &str = "SECRET_KEY";

/// Access key pair used to sign requests.
///
/// The secret half is held in a [`SecretString`] and never printed.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: SecretString,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: SecretString::from(secret_key.into()),
        }
    }

    /// Read `ACCESS_KEY` / `SECRET_KEY` from the environment.
    ///
    /// Missing variables become empty strings; the signer rejects them when
    /// the run is prepared, before any request is issued.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(ACCESS_KEY_ENV).unwrap_or_default(),
            std::env::var(SECRET_KEY_ENV).unwrap_or_default(),
        )
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    fn validate(&self) -> Result<(), SigningError> {
        if self.access_key.trim().is_empty() {
            return Err(SigningError::MissingAccessKey);
        }
        if self.secret_key.expose_secret().trim().is_empty() {
            return Err(SigningError::MissingSecretKey);
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Intermediate values of one signature computation. Single use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    /// Request timestamp in `YYYYMMDD'T'HHMMSS'Z'` form.
    pub timestamp: String,
    /// Hex SHA-256 of the canonical request.
    pub canonical_request_hash: String,
    /// `date/region/service/aws4_request`.
    pub credential_scope: String,
    /// Hex HMAC-SHA256 signature.
    pub signature: String,
}

/// Headers produced by [`RequestSigner::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub host: String,
    pub content_type: String,
}

impl SignedHeaders {
    /// Header name/value pairs in the order they are sent.
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("content-type", self.content_type.as_str()),
            ("host", self.host.as_str()),
            ("x-amz-date", self.amz_date.as_str()),
            ("authorization", self.authorization.as_str()),
        ]
    }
}

/// Stateless SigV4 signer bound to one endpoint and credential pair.
#[derive(Clone)]
pub struct RequestSigner {
    credentials: Credentials,
    region: String,
    service: String,
    host: String,
    canonical_uri: String,
    content_type: String,
}

impl RequestSigner {
    /// Build a signer for `endpoint`.
    ///
    /// Fails when either key is empty or the endpoint has no host. This is the
    /// run's credential preflight: the engine builds the signer before it
    /// spawns any user.
    pub fn new(
        credentials: Credentials,
        endpoint: &Url,
        region: impl Into<String>,
        service: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Result<Self, SigningError> {
        credentials.validate()?;
        let host = endpoint_host(endpoint).ok_or(SigningError::MissingHost)?;
        let canonical_uri = match endpoint.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        Ok(Self {
            credentials,
            region: region.into(),
            service: service.into(),
            host,
            canonical_uri,
            content_type: content_type.into().trim().to_string(),
        })
    }

    /// The `host` header value that is signed and sent.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Sign `payload` at `timestamp` and return the request headers.
    pub fn sign(
        &self,
        payload: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<SignedHeaders, SigningError> {
        let context = self.signing_context(payload, timestamp)?;
        let authorization = format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={SIGNED_HEADERS}, Signature={}",
            self.credentials.access_key, context.credential_scope, context.signature
        );
        Ok(SignedHeaders {
            authorization,
            amz_date: context.timestamp,
            host: self.host.clone(),
            content_type: self.content_type.clone(),
        })
    }

    /// Compute the full signing context for `payload` at `timestamp`.
    pub fn signing_context(
        &self,
        payload: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<SigningContext, SigningError> {
        if !(1000..=9999).contains(&timestamp.year()) {
            return Err(SigningError::InvalidTimestamp(timestamp.to_rfc3339()));
        }
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        let date = timestamp.format("%Y%m%d").to_string();

        let payload_hash = hex::encode(Sha256::digest(payload));
        let canonical_request = self.canonical_request(&payload_hash, &amz_date);
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

        let credential_scope = format!(
            "{date}/{}/{}/{SCOPE_TERMINATOR}",
            self.region, self.service
        );
        let string_to_sign =
            format!("{ALGORITHM}\n{amz_date}\n{credential_scope}\n{canonical_request_hash}");

        let signing_key = derive_signing_key(
            self.credentials.secret_key.expose_secret(),
            &date,
            &self.region,
            &self.service,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        Ok(SigningContext {
            timestamp: amz_date,
            canonical_request_hash,
            credential_scope,
            signature,
        })
    }

    fn canonical_request(&self, payload_hash: &str, amz_date: &str) -> String {
        let canonical_headers = format!(
            "content-type:{}\nhost:{}\nx-amz-date:{amz_date}\n",
            self.content_type, self.host
        );
        // Query string is always empty.
        format!(
            "{METHOD}\n{}\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{payload_hash}",
            self.canonical_uri
        )
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("credentials", &self.credentials)
            .field("region", &self.region)
            .field("service", &self.service)
            .field("host", &self.host)
            .field("canonical_uri", &self.canonical_uri)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Derive the signing key: `HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region), service), "aws4_request")`.
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as KeyInit>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// `host[:port]`, omitting the port when it is the scheme default.
fn endpoint_host(endpoint: &Url) -> Option<String> {
    let host = endpoint.host_str().filter(|h| !h.is_empty())?;
    Some(match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
