//! User attribute lookup for verified access tokens
//!
//! [`CognitoUserClient`] calls the Cognito `GetUser` API, which is authorized
//! by the access token itself. Reach it through
//! [`Verifier::user_attributes`](crate::Verifier::user_attributes) so the
//! token is verified before it is forwarded.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::VerifierConfig;
use crate::error::VerifyError;
use crate::jwks::is_allowed_scheme;

const GET_USER_TARGET: &str = "AWSCognitoIdentityProviderService.GetUser";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

/// Attribute lookup errors, surfaced as [`VerifyError::AttributeLookup`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttributeError {
    /// Endpoint is not HTTPS
    #[error("identity provider endpoint must use HTTPS: {0}")]
    InsecureEndpoint(String),

    /// Transport-level failure
    #[error("request failed: {0}")]
    Http(String),

    /// The service rejected the call
    #[error("{error_type}: {message}")]
    Service {
        /// Service exception name, e.g. `NotAuthorizedException`
        error_type: String,
        /// Service message
        message: String,
    },

    /// Response body could not be read
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<AttributeError> for VerifyError {
    fn from(err: AttributeError) -> Self {
        Self::AttributeLookup(err.to_string())
    }
}

/// Source of user attributes for an already verified access token
#[async_trait]
pub trait UserAttributeSource: Send + Sync {
    /// Attributes of the token's user, by attribute name
    async fn user_attributes(
        &self,
        access_token: &str,
    ) -> Result<HashMap<String, String>, AttributeError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetUserResponse {
    #[serde(default)]
    user_attributes: Vec<AttributeType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeType {
    name: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(default, alias = "Message")]
    message: String,
}

/// `GetUser` client for one region
#[derive(Debug, Clone)]
pub struct CognitoUserClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl CognitoUserClient {
    /// Client for the region of `config`
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &VerifierConfig) -> Result<Self, AttributeError> {
        Self::with_endpoint(config.api_endpoint(), config.fetch_timeout())
    }

    /// Client for an explicit endpoint (tests, VPC endpoints)
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::InsecureEndpoint`] for non-HTTPS endpoints
    /// other than loopback, or [`AttributeError::Http`] if the HTTP client
    /// cannot be built.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AttributeError> {
        let endpoint = endpoint.into();
        if !is_allowed_scheme(&endpoint) {
            return Err(AttributeError::InsecureEndpoint(endpoint));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AttributeError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// Endpoint requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UserAttributeSource for CognitoUserClient {
    async fn user_attributes(
        &self,
        access_token: &str,
    ) -> Result<HashMap<String, String>, AttributeError> {
        let body = json!({ "AccessToken": access_token }).to_string();

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("X-Amz-Target", GET_USER_TARGET)
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, "GetUser request failed");
                AttributeError::Http(e.to_string())
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttributeError::Http(e.to_string()))?;

        if !status.is_success() {
            let service: ServiceError =
                serde_json::from_slice(&bytes).unwrap_or_else(|_| ServiceError {
                    error_type: format!("HTTP {}", status.as_u16()),
                    message: String::new(),
                });
            error!(
                endpoint = %self.endpoint,
                status = %status,
                error_type = %service.error_type,
                "GetUser rejected"
            );
            return Err(AttributeError::Service {
                error_type: service.error_type,
                message: service.message,
            });
        }

        let parsed: GetUserResponse = serde_json::from_slice(&bytes)
            .map_err(|e| AttributeError::InvalidResponse(e.to_string()))?;

        let attributes: HashMap<String, String> = parsed
            .user_attributes
            .into_iter()
            .filter_map(|attr| attr.value.map(|value| (attr.name, value)))
            .collect();

        debug!(count = attributes.len(), "Fetched user attributes");
        Ok(attributes)
    }
}
