//! Key set fetching over HTTPS

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use super::KeySet;

/// Default maximum JWKS response size (64 KB)
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// Key set retrieval errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// URL is not HTTPS (plain HTTP is only allowed for loopback hosts)
    #[error("JWKS endpoint must use HTTPS: {0}")]
    InsecureUrl(String),

    /// Transport-level failure
    #[error("JWKS request failed: {0}")]
    Http(String),

    /// Request did not complete within the client timeout
    #[error("JWKS request timed out")]
    Timeout,

    /// Endpoint answered with a non-success status
    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    /// Body exceeded the configured size limit
    #[error("JWKS response exceeds {0} bytes")]
    TooLarge(usize),

    /// Body is not a valid key set document
    #[error("invalid JWKS document: {0}")]
    Parse(String),
}

/// Anything that can produce a key set for a URL
///
/// Implementations perform a single attempt; retries and caching are layered
/// on top by the caller.
#[async_trait]
pub trait KeySetSource: Send + Sync + std::fmt::Debug {
    /// Fetch and parse the key set published at `url`
    async fn fetch(&self, url: &str) -> Result<KeySet, FetchError>;
}

/// `reqwest`-backed key set client
#[derive(Debug, Clone)]
pub struct HttpKeySetClient {
    http_client: reqwest::Client,
    max_response_size: usize,
}

impl HttpKeySetClient {
    /// Create a client whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("cognito-token-verifier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        })
    }

    /// Wrap an existing `reqwest` client
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Override the response size limit
    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetClient {
    async fn fetch(&self, url: &str) -> Result<KeySet, FetchError> {
        if !is_allowed_scheme(url) {
            return Err(FetchError::InsecureUrl(url.to_string()));
        }

        info!(jwks_uri = %url, "Fetching JWKS from endpoint");

        let mut response = self.http_client.get(url).send().await.map_err(|e| {
            error!(jwks_uri = %url, error = %e, "Failed to fetch JWKS");
            transport_error(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_uri = %url, status = %status, "JWKS endpoint returned error status");
            return Err(FetchError::Status(status.as_u16()));
        }

        // Content-Length may be absent or wrong; bound the buffered body itself
        let mut body = Vec::with_capacity(
            response
                .content_length()
                .map_or(0, |len| len.min(self.max_response_size as u64) as usize),
        );
        while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(&e))? {
            if body.len() + chunk.len() > self.max_response_size {
                error!(
                    jwks_uri = %url,
                    max_bytes = self.max_response_size,
                    "JWKS response exceeds size limit"
                );
                return Err(FetchError::TooLarge(self.max_response_size));
            }
            body.extend_from_slice(&chunk);
        }

        let key_set = KeySet::from_json(&body).inspect_err(|e| {
            error!(jwks_uri = %url, error = %e, "Failed to parse JWKS JSON");
        })?;

        info!(jwks_uri = %url, key_count = key_set.len(), "Successfully fetched JWKS");
        Ok(key_set)
    }
}

fn transport_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(err.to_string())
    }
}

/// HTTPS anywhere; plain HTTP only for loopback hosts
pub(crate) fn is_allowed_scheme(url: &str) -> bool {
    if url.starts_with("https://") {
        return true;
    }
    let Some(rest) = url.strip_prefix("http://") else {
        return false;
    };
    ["localhost", "127.0.0.1"].iter().any(|host| {
        rest.strip_prefix(host)
            .is_some_and(|tail| tail.is_empty() || tail.starts_with([':', '/']))
    })
}
