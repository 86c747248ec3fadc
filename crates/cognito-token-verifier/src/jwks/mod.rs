//! JWKS (JSON Web Key Set) retrieval and caching
//!
//! - [`KeySet`] / [`KeyRecord`] - the parsed key set document
//! - [`KeySetSource`] / [`HttpKeySetClient`] - fetching a key set by URL
//! - [`KeySetCache`] - TTL cache with single-flight loads per URL
//!
//! Key material is kept as the published JSON and only converted into a
//! verification key by [`crate::resolver`], so one malformed key does not
//! make the rest of the set unusable.

mod cache;
mod client;

pub use cache::{CachedKeySet, KeySetCache};
pub use client::{FetchError, HttpKeySetClient, KeySetSource};
pub(crate) use client::is_allowed_scheme;

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

/// One published key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    key_id: String,
    key_type: String,
    algorithm: Option<String>,
    key_use: Option<String>,
    material: Value,
}

impl KeyRecord {
    /// Build a record from one entry of the `keys` array
    ///
    /// Returns `Ok(None)` for entries without a `kid`; such keys can never be
    /// selected by a token.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Parse`] when the entry is not an object, or when
    /// `kid`, `kty`, `alg` or `use` have the wrong type.
    pub fn from_jwk(entry: Value) -> Result<Option<Self>, FetchError> {
        let Value::Object(ref fields) = entry else {
            return Err(FetchError::Parse("key entry is not an object".to_string()));
        };

        let key_id = match fields.get("kid") {
            None => return Ok(None),
            Some(Value::String(kid)) => kid.clone(),
            Some(_) => return Err(FetchError::Parse("`kid` must be a string".to_string())),
        };
        let key_type = match fields.get("kty") {
            Some(Value::String(kty)) => kty.clone(),
            _ => {
                return Err(FetchError::Parse(format!(
                    "key {key_id} has no string `kty`"
                )));
            }
        };
        let algorithm = optional_string(fields.get("alg"), "alg", &key_id)?;
        let key_use = optional_string(fields.get("use"), "use", &key_id)?;

        Ok(Some(Self {
            key_id,
            key_type,
            algorithm,
            key_use,
            material: entry,
        }))
    }

    /// Key identifier (`kid`)
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Key type (`kty`), e.g. `RSA`
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// Declared algorithm (`alg`), if published
    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// Declared use (`use`), if published
    pub fn key_use(&self) -> Option<&str> {
        self.key_use.as_deref()
    }

    /// The JWK exactly as published
    pub fn material(&self) -> &Value {
        &self.material
    }
}

fn optional_string(
    value: Option<&Value>,
    name: &str,
    key_id: &str,
) -> Result<Option<String>, FetchError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(FetchError::Parse(format!(
            "key {key_id} has a non-string `{name}`"
        ))),
    }
}

/// An immutable set of keys indexed by `kid`
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    records: Vec<KeyRecord>,
    index: HashMap<String, usize>,
}

impl KeySet {
    /// Build a set, rejecting duplicate identifiers
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Parse`] if two records share a `kid`.
    pub fn from_records(records: Vec<KeyRecord>) -> Result<Self, FetchError> {
        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if index.insert(record.key_id.clone(), position).is_some() {
                return Err(FetchError::Parse(format!(
                    "duplicate kid {} in key set",
                    record.key_id
                )));
            }
        }
        Ok(Self { records, index })
    }

    /// Parse a JWKS document (`{"keys": [...]}`)
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Parse`] if the body is not JSON, has no `keys`
    /// array, or any entry is malformed.
    pub fn from_json(body: &[u8]) -> Result<Self, FetchError> {
        let document: Value = serde_json::from_slice(body)
            .map_err(|e| FetchError::Parse(format!("invalid JSON: {e}")))?;

        let Some(Value::Array(entries)) = document.get("keys") else {
            return Err(FetchError::Parse(
                "document has no `keys` array".to_string(),
            ));
        };

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            match KeyRecord::from_jwk(entry.clone())? {
                Some(record) => records.push(record),
                None => warn!("Skipping JWKS entry without kid"),
            }
        }
        Self::from_records(records)
    }

    /// Exact, case-sensitive lookup by `kid`
    pub fn get(&self, key_id: &str) -> Option<&KeyRecord> {
        self.index.get(key_id).map(|&position| &self.records[position])
    }

    /// Records in document order
    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }

    /// Identifiers in document order
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(KeyRecord::key_id)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set has no keys
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
