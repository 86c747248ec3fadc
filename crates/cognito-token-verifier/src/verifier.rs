//! Token verification against a user pool's published keys
//!
//! The pipeline is linear and fails fast:
//!
//! 1. parse the compact token ([`Token::parse`])
//! 2. read `kid` from the header
//! 3. fetch the pool's key set (cached) and resolve `kid`
//! 4. check `alg` against policy and verify the signature over the original
//!    signing input
//! 5. validate `exp`, `nbf`, `iat` and the configured `iss`/`aud`/`token_use`
//!
//! Claims are only handed out after step 4 succeeds.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::Algorithm;
use tracing::{debug, warn};

use crate::attributes::UserAttributeSource;
use crate::claims::Claims;
use crate::config::VerifierConfig;
use crate::error::{Result, VerifyError};
use crate::jwks::{CachedKeySet, HttpKeySetClient, KeySetCache, KeySetSource};
use crate::resolver::ResolvedKey;
use crate::token::Token;

/// A token whose signature and claims have been verified
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    claims: Claims,
    key_id: String,
    algorithm: Algorithm,
}

impl VerifiedToken {
    /// Verified payload claims
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Consume into the verified claims
    pub fn into_claims(self) -> Claims {
        self.claims
    }

    /// `kid` of the key that verified the signature
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Algorithm the signature was verified with
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// `sub` claim, if present as a string
    pub fn subject(&self) -> Option<&str> {
        self.claims.subject().ok().flatten()
    }

    /// `exp` as a [`SystemTime`], if present
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.claims
            .get_timestamp("exp")
            .ok()
            .flatten()
            .and_then(|exp| u64::try_from(exp).ok())
            .map(|exp| UNIX_EPOCH + Duration::from_secs(exp))
    }
}

/// Verifier for one Cognito user pool
///
/// Cheap to share behind an [`Arc`]; `verify` takes `&self` and may run
/// concurrently. The key set cache belongs to this instance, so verifiers for
/// different pools never share keys.
///
/// # Example
///
/// ```rust,no_run
/// # use cognito_token_verifier::{Verifier, VerifierConfig};
/// # tokio_test::block_on(async {
/// let verifier = Verifier::new(VerifierConfig::new("us-east-1", "us-east-1_ABC123"))?;
///
/// match verifier.verify("eyJraWQiOi...").await {
///     Ok(token) => println!("verified token for {:?}", token.subject()),
///     Err(e) => println!("rejected: {e}"),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Verifier {
    config: Arc<VerifierConfig>,
    jwks_url: String,
    issuer: String,
    key_sets: KeySetCache,
}

impl Verifier {
    /// Create a verifier that fetches keys over HTTPS
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidConfig`] if the configuration is invalid
    /// and [`VerifyError::Fetch`] if the HTTP client cannot be built.
    pub fn new(config: VerifierConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpKeySetClient::new(config.fetch_timeout())?;
        Self::with_source(config, Arc::new(client))
    }

    /// Create a verifier that obtains key sets from `source`
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidConfig`] if the configuration is invalid.
    pub fn with_source(config: VerifierConfig, source: Arc<dyn KeySetSource>) -> Result<Self> {
        config.validate()?;
        let key_sets = KeySetCache::new(
            source,
            config.cache_ttl(),
            config.min_refresh_interval(),
        );

        Ok(Self {
            jwks_url: config.jwks_url(),
            issuer: config.issuer(),
            key_sets,
            config: Arc::new(config),
        })
    }

    /// Verify `raw` and return its claims
    ///
    /// Cancel by dropping the future; use
    /// [`verify_with_timeout`](Self::verify_with_timeout) for a deadline.
    ///
    /// # Errors
    ///
    /// Any [`VerifyError`]; every error means the token must be rejected.
    pub async fn verify(&self, raw: &str) -> Result<VerifiedToken> {
        let result = self.verify_inner(raw).await;
        if let Err(e) = &result {
            warn!(error = %e, kind = ?e.kind(), jwks_uri = %self.jwks_url, "Token rejected");
        }
        result
    }

    /// [`verify`](Self::verify) bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::DeadlineExceeded`] if `timeout` elapses first,
    /// otherwise whatever [`verify`](Self::verify) returns.
    pub async fn verify_with_timeout(&self, raw: &str, timeout: Duration) -> Result<VerifiedToken> {
        tokio::time::timeout(timeout, self.verify(raw))
            .await
            .map_err(|_| {
                warn!(timeout_ms = timeout.as_millis(), "Token verification deadline exceeded");
                VerifyError::DeadlineExceeded
            })?
    }

    /// Look up user attributes for an access token, verifying it first
    ///
    /// `source` is never called unless `raw` verifies.
    ///
    /// # Errors
    ///
    /// Any verification error, or [`VerifyError::AttributeLookup`].
    pub async fn user_attributes(
        &self,
        raw: &str,
        source: &dyn UserAttributeSource,
    ) -> Result<HashMap<String, String>> {
        self.verify(raw).await?;
        Ok(source.user_attributes(raw).await?)
    }

    /// The configuration this verifier was built from
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Key set URL derived from the configuration
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Issuer URL of the configured pool
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Drop the cached key set so the next call refetches
    pub fn clear_cache(&self) {
        self.key_sets.clear();
    }

    async fn verify_inner(&self, raw: &str) -> Result<VerifiedToken> {
        let token = Token::parse(raw)?;
        let key_id = token.key_id()?;

        let key_set = self.key_set_for(key_id).await?;
        let key = key_set.resolve(key_id)?;
        let algorithm = self.check_signature(&token, key)?;
        self.validate_claims(token.payload())?;

        debug!(
            key_id = key_id,
            algorithm = ?algorithm,
            "Token verification successful"
        );

        let key_id = key_id.to_string();
        Ok(VerifiedToken {
            claims: token.into_payload(),
            key_id,
            algorithm,
        })
    }

    /// Key set holding `key_id`, refetching once if the cached set may predate a rotation
    async fn key_set_for(&self, key_id: &str) -> Result<Arc<CachedKeySet>> {
        let cached = self.key_sets.get(&self.jwks_url).await?;
        if cached.contains(key_id) {
            return Ok(cached);
        }

        match self.key_sets.refresh(&self.jwks_url, &cached).await? {
            Some(fresh) => Ok(fresh),
            None => Err(VerifyError::KidsDontMatch {
                kid: key_id.to_string(),
            }),
        }
    }

    fn check_signature(&self, token: &Token, key: &ResolvedKey) -> Result<Algorithm> {
        let declared = token.algorithm();
        let algorithm = Algorithm::from_str(declared)
            .map_err(|_| VerifyError::UnsupportedAlgorithm(declared.to_string()))?;

        if !self.config.allowed_algorithms.contains(&algorithm) {
            return Err(VerifyError::UnsupportedAlgorithm(format!(
                "{declared} is not allowed"
            )));
        }

        // Key and algorithm mismatches are signature failures
        if let Some(published) = key.algorithm()
            && published != declared
        {
            debug!(
                key_id = key.key_id(),
                declared = declared,
                published = published,
                "Token algorithm does not match published key"
            );
            return Err(VerifyError::InvalidSignature);
        }

        match jsonwebtoken::crypto::verify(
            token.encoded_signature(),
            token.signing_input(),
            key.decoding_key(),
            algorithm,
        ) {
            Ok(true) => Ok(algorithm),
            Ok(false) => Err(VerifyError::InvalidSignature),
            Err(e) => {
                debug!(error = %e, key_id = key.key_id(), "Signature check errored");
                Err(VerifyError::InvalidSignature)
            }
        }
    }

    fn validate_claims(&self, claims: &Claims) -> Result<()> {
        let now = unix_now();
        let leeway = self.config.leeway_secs.min(i64::MAX as u64) as i64;

        if let Some(exp) = claims.get_timestamp("exp")?
            && exp.saturating_add(leeway) <= now
        {
            return Err(VerifyError::TokenExpired);
        }
        if let Some(nbf) = claims.get_timestamp("nbf")?
            && nbf > now.saturating_add(leeway)
        {
            return Err(VerifyError::TokenNotYetValid);
        }
        if let Some(iat) = claims.get_timestamp("iat")?
            && iat > now.saturating_add(leeway)
        {
            return Err(VerifyError::TokenUsedBeforeIssued);
        }

        if self.config.validate_issuer {
            match claims.get_str("iss")? {
                Some(iss) if iss == self.issuer => {}
                other => {
                    return Err(VerifyError::InvalidIssuer(
                        other.unwrap_or("<missing>").to_string(),
                    ));
                }
            }
        }

        if let Some(expected) = self.config.token_use {
            match claims.get_str("token_use")? {
                Some(token_use) if token_use == expected.as_str() => {}
                other => {
                    return Err(VerifyError::InvalidTokenUse(
                        other.unwrap_or("<missing>").to_string(),
                    ));
                }
            }
        }

        if !self.config.audiences.is_empty() {
            // ID tokens carry `aud`, access tokens carry `client_id`
            let mut presented = claims.get_string_list("aud")?.unwrap_or_default();
            if let Some(client_id) = claims.get_str("client_id")? {
                presented.push(client_id);
            }
            if !presented
                .iter()
                .any(|aud| self.config.audiences.iter().any(|expected| expected == aud))
            {
                return Err(VerifyError::InvalidAudience);
            }
        }

        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
