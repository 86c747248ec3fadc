//! Verifier configuration
//!
//! A [`VerifierConfig`] names one Cognito user pool. The key set URL and
//! issuer are derived from it; everything else has a default.

use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifyError};

/// Regional Cognito identity provider host
const COGNITO_HOST_TEMPLATE: &str = "cognito-idp.{region}.amazonaws.com";

/// Which Cognito token a verifier accepts (`token_use` claim)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    /// Access tokens (`token_use: access`)
    Access,
    /// ID tokens (`token_use: id`)
    Id,
}

impl TokenUse {
    /// Claim value for this token type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Id => "id",
        }
    }
}

/// Configuration for one user pool
///
/// # Example
///
/// ```rust
/// use cognito_token_verifier::VerifierConfig;
///
/// let config = VerifierConfig::new("us-east-1", "us-east-1_ABC123");
/// assert_eq!(
///     config.jwks_url(),
///     "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_ABC123/.well-known/jwks.json"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// AWS region of the user pool, e.g. `us-east-1`
    pub region: String,
    /// User pool id, e.g. `us-east-1_ABC123`
    pub user_pool_id: String,
    /// How long a fetched key set is trusted, in milliseconds (default: 10 minutes)
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Minimum key set age before an unknown `kid` triggers a refetch, in
    /// milliseconds (default: 5 seconds)
    #[serde(default = "default_min_refresh_interval_ms")]
    pub min_refresh_interval_ms: u64,
    /// Key set request timeout, in milliseconds (default: 10 seconds)
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Clock skew tolerance for `exp`, `nbf` and `iat`, in whole seconds
    /// since claims carry second precision (default: 0)
    #[serde(default)]
    pub leeway_secs: u64,
    /// Accepted header algorithms (default: RS256, the only one Cognito uses)
    #[serde(default = "default_algorithms")]
    pub allowed_algorithms: Vec<Algorithm>,
    /// Require `iss` to name this pool (default: false)
    #[serde(default)]
    pub validate_issuer: bool,
    /// Accepted app client ids; empty disables the audience check
    #[serde(default)]
    pub audiences: Vec<String>,
    /// Required `token_use`; unset disables the check
    #[serde(default)]
    pub token_use: Option<TokenUse>,
    /// Replaces the derived key set URL (tests, proxies)
    #[serde(default)]
    pub jwks_url_override: Option<String>,
}

fn default_cache_ttl_ms() -> u64 {
    600_000
}

fn default_min_refresh_interval_ms() -> u64 {
    5_000
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

/// Milliseconds in `duration`, rounded up so a non-zero duration never becomes 0
fn millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

impl VerifierConfig {
    /// Configuration for `user_pool_id` in `region` with default policy
    pub fn new(region: impl Into<String>, user_pool_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            user_pool_id: user_pool_id.into(),
            cache_ttl_ms: default_cache_ttl_ms(),
            min_refresh_interval_ms: default_min_refresh_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            leeway_secs: 0,
            allowed_algorithms: default_algorithms(),
            validate_issuer: false,
            audiences: Vec::new(),
            token_use: None,
            jwks_url_override: None,
        }
    }

    /// Set the key set freshness window
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = millis_ceil(ttl);
        self
    }

    /// Set the minimum age before an unknown `kid` refetches the key set
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval_ms = millis_ceil(interval);
        self
    }

    /// Set the key set request timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = millis_ceil(timeout);
        self
    }

    /// Set clock skew tolerance, rounded up to whole seconds
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway_secs = leeway
            .as_secs()
            .saturating_add(u64::from(leeway.subsec_nanos() > 0));
        self
    }

    /// Set accepted algorithms
    ///
    /// Only asymmetric algorithms are honoured; HMAC entries are rejected by
    /// [`validate`](Self::validate).
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Require `iss` to equal [`issuer`](Self::issuer)
    pub fn with_issuer_validation(mut self) -> Self {
        self.validate_issuer = true;
        self
    }

    /// Accept only tokens for these app client ids
    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Accept only access or only ID tokens
    pub fn with_token_use(mut self, token_use: TokenUse) -> Self {
        self.token_use = Some(token_use);
        self
    }

    /// Fetch keys from `url` instead of the derived Cognito URL
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url_override = Some(url.into());
        self
    }

    /// Check required fields and policy
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidConfig`] if region or pool id is empty or
    /// contains URL-significant characters, if the cache TTL or fetch timeout
    /// is zero, if no algorithm is allowed, or if an HMAC algorithm is listed.
    pub fn validate(&self) -> Result<()> {
        check_path_segment("region", &self.region)?;
        check_path_segment("user_pool_id", &self.user_pool_id)?;

        if self.fetch_timeout_ms == 0 {
            return Err(VerifyError::InvalidConfig(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }
        if self.cache_ttl_ms == 0 {
            return Err(VerifyError::InvalidConfig(
                "cache TTL must be greater than zero".to_string(),
            ));
        }

        if self.allowed_algorithms.is_empty() {
            return Err(VerifyError::InvalidConfig(
                "at least one algorithm must be allowed".to_string(),
            ));
        }
        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        {
            return Err(VerifyError::InvalidConfig(format!(
                "symmetric algorithm {alg:?} cannot verify provider tokens"
            )));
        }
        Ok(())
    }

    /// Issuer URL of the pool: `https://cognito-idp.<region>.amazonaws.com/<poolId>`
    pub fn issuer(&self) -> String {
        format!(
            "https://{}/{}",
            COGNITO_HOST_TEMPLATE.replace("{region}", &self.region),
            self.user_pool_id
        )
    }

    /// Key set URL: `<issuer>/.well-known/jwks.json` unless overridden
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url_override {
            Some(url) => url.clone(),
            None => format!("{}/.well-known/jwks.json", self.issuer()),
        }
    }

    /// Regional endpoint for identity provider API calls
    pub fn api_endpoint(&self) -> String {
        format!(
            "https://{}/",
            COGNITO_HOST_TEMPLATE.replace("{region}", &self.region)
        )
    }

    /// Key set freshness window
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Minimum key set age before a forced refetch
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }

    /// Key set request timeout
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Clock skew tolerance
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_secs)
    }
}

fn check_path_segment(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(VerifyError::InvalidConfig(format!("{name} is required")));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@' | ':' | '\\'))
    {
        return Err(VerifyError::InvalidConfig(format!(
            "{name} contains characters not allowed in a URL path segment"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_urls() {
        let config = VerifierConfig::new("us-east-1", "us-east-1_ABC123");
        assert_eq!(
            config.jwks_url(),
            "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_ABC123/.well-known/jwks.json"
        );
        assert_eq!(
            config.issuer(),
            "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_ABC123"
        );
        assert_eq!(
            config.api_endpoint(),
            "https://cognito-idp.us-east-1.amazonaws.com/"
        );
    }

    #[test]
    fn test_override_replaces_jwks_url_only() {
        let config =
            VerifierConfig::new("eu-west-1", "eu-west-1_X").with_jwks_url("http://localhost/jwks");
        assert_eq!(config.jwks_url(), "http://localhost/jwks");
        assert_eq!(
            config.issuer(),
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_X"
        );
    }

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::new("us-east-1", "pool");
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.min_refresh_interval(), Duration::from_secs(5));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.leeway(), Duration::ZERO);
        assert_eq!(config.allowed_algorithms, vec![Algorithm::RS256]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_required_fields() {
        for (region, pool) in [("", "pool"), ("us-east-1", ""), ("us-east-1", "a/b"), ("evil.com/x", "p")] {
            let err = VerifierConfig::new(region, pool).validate().unwrap_err();
            assert!(matches!(err, VerifyError::InvalidConfig(_)), "{region}/{pool}");
        }
    }

    #[test]
    fn test_symmetric_algorithms_rejected() {
        let config =
            VerifierConfig::new("us-east-1", "pool").with_algorithms(vec![Algorithm::RS256, Algorithm::HS256]);
        assert!(config.validate().is_err());
        let config = VerifierConfig::new("us-east-1", "pool").with_algorithms(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: VerifierConfig = serde_json::from_value(serde_json::json!({
            "region": "ap-south-1",
            "user_pool_id": "ap-south-1_Pool",
            "token_use": "access",
            "allowed_algorithms": ["RS256", "ES256"]
        }))
        .unwrap();
        assert_eq!(config.token_use, Some(TokenUse::Access));
        assert_eq!(config.cache_ttl_ms, 600_000);
        assert_eq!(
            config.allowed_algorithms,
            vec![Algorithm::RS256, Algorithm::ES256]
        );
        assert!(!config.validate_issuer);
    }

    #[test]
    fn test_sub_second_durations_are_kept() {
        let config = VerifierConfig::new("us-east-1", "pool")
            .with_fetch_timeout(Duration::from_millis(800))
            .with_cache_ttl(Duration::from_millis(900))
            .with_min_refresh_interval(Duration::from_millis(250));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(800));
        assert_eq!(config.cache_ttl(), Duration::from_millis(900));
        assert_eq!(config.min_refresh_interval(), Duration::from_millis(250));
        assert!(config.validate().is_ok());

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["fetch_timeout_ms"], 800);
        let back: VerifierConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_tiny_durations_round_up() {
        let config = VerifierConfig::new("us-east-1", "pool")
            .with_fetch_timeout(Duration::from_micros(10))
            .with_leeway(Duration::from_millis(1500));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(1));
        assert_eq!(config.leeway(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_timeout_and_ttl_rejected() {
        let err = VerifierConfig::new("us-east-1", "pool")
            .with_fetch_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidConfig(msg) if msg.contains("timeout")));

        let err = VerifierConfig::new("us-east-1", "pool")
            .with_cache_ttl(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidConfig(msg) if msg.contains("TTL")));

        let config: std::result::Result<VerifierConfig, _> = serde_json::from_value(serde_json::json!({
            "region": "us-east-1",
            "user_pool_id": "pool",
            "fetch_timeout_ms": 0
        }));
        assert!(config.unwrap().validate().is_err());
    }
}
