//! Key resolution: `kid` → verification key
//!
//! Lookup is an exact string match against the key set. There is no fallback
//! to other keys; a token verifies against the key it names or not at all.

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::Jwk;
use thiserror::Error;
use tracing::error;

use crate::jwks::{KeyRecord, KeySet};

/// Key resolution errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No record carries the requested `kid`
    #[error("key id {0} not found in key set")]
    UnknownKeyId(String),

    /// The record exists but is not a usable signature key
    #[error("key conversion failed: {0}")]
    KeyConversion(String),
}

/// A verification key together with what its record declared
#[derive(Clone)]
pub struct ResolvedKey {
    key_id: String,
    algorithm: Option<String>,
    decoding_key: DecodingKey,
}

// DecodingKey carries key material; keep it out of Debug output
impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ResolvedKey {
    /// Identifier of the record the key came from
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// `alg` published with the key, if any
    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// Key for signature verification
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

/// Find the record for `key_id` and convert it
///
/// # Errors
///
/// - [`ResolveError::UnknownKeyId`] if no record matches exactly
/// - [`ResolveError::KeyConversion`] if the record is not a signature key or
///   its material is malformed
pub fn resolve(key_set: &KeySet, key_id: &str) -> Result<ResolvedKey, ResolveError> {
    let record = key_set
        .get(key_id)
        .ok_or_else(|| ResolveError::UnknownKeyId(key_id.to_string()))?;
    convert(record)
}

/// Convert one record into a [`ResolvedKey`]
///
/// # Errors
///
/// Returns [`ResolveError::KeyConversion`] for non-signature or malformed keys.
pub fn convert(record: &KeyRecord) -> Result<ResolvedKey, ResolveError> {
    if let Some(key_use) = record.key_use()
        && key_use != "sig"
    {
        return Err(ResolveError::KeyConversion(format!(
            "key {} is published for `{key_use}`, not signatures",
            record.key_id()
        )));
    }

    let jwk: Jwk = serde_json::from_value(record.material().clone()).map_err(|e| {
        error!(key_id = record.key_id(), error = %e, "Invalid JWK in key set");
        ResolveError::KeyConversion(format!("invalid JWK {}: {e}", record.key_id()))
    })?;

    let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| {
        error!(key_id = record.key_id(), error = %e, "Failed to create decoding key from JWK");
        ResolveError::KeyConversion(format!("unusable JWK {}: {e}", record.key_id()))
    })?;

    Ok(ResolvedKey {
        key_id: record.key_id().to_string(),
        algorithm: record.algorithm().map(str::to_string),
        decoding_key,
    })
}
