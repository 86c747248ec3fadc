//! Typed access to JWT header and payload members
//!
//! Both the JOSE header and the claim set are JSON objects. [`Claims`] keeps
//! them as a map of tagged [`serde_json::Value`]s and offers accessors that
//! fail with [`VerifyError::InvalidClaim`] on a type mismatch rather than
//! coercing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, VerifyError};

/// A JSON object from a token segment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Wrap an already decoded JSON object
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Raw member lookup
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether the member is present (with any type, including `null`)
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// String member; `Err` if present but not a string
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidClaim`] when the member is not a JSON string.
    pub fn get_str(&self, name: &str) -> Result<Option<&str>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(type_mismatch(name, "string", other)),
        }
    }

    /// Numeric member as whole seconds; `Err` if present but not a number
    ///
    /// NumericDate values may be fractional (RFC 7519 §2); the fraction is
    /// truncated toward zero.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidClaim`] when the member is not a JSON number.
    pub fn get_timestamp(&self, name: &str) -> Result<Option<i64>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Some(i64::try_from(u).unwrap_or(i64::MAX)))
                } else {
                    // f64 to i64 `as` saturates and maps NaN to 0
                    Ok(n.as_f64().map(|f| f as i64))
                }
            }
            Some(other) => Err(type_mismatch(name, "number", other)),
        }
    }

    /// Boolean member; `Err` if present but not a bool
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidClaim`] when the member is not a JSON boolean.
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_mismatch(name, "boolean", other)),
        }
    }

    /// String or array-of-strings member (the shape of `aud`)
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidClaim`] for any other shape, including
    /// arrays containing non-strings.
    pub fn get_string_list(&self, name: &str) -> Result<Option<Vec<&str>>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.as_str()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.as_str()),
                    other => Err(type_mismatch(name, "array of strings", other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(type_mismatch(name, "string or array of strings", other)),
        }
    }

    /// Nested object member; `Err` if present but not an object
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidClaim`] when the member is not a JSON object.
    pub fn get_object(&self, name: &str) -> Result<Option<Claims>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Claims(map.clone()))),
            Some(other) => Err(type_mismatch(name, "object", other)),
        }
    }

    /// Iterate over all members in document order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the object has no members
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying JSON object
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// `sub` claim
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidClaim`] when `sub` is not a string.
    pub fn subject(&self) -> Result<Option<&str>> {
        self.get_str("sub")
    }
}

fn type_mismatch(name: &str, expected: &str, found: &Value) -> VerifyError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    VerifyError::InvalidClaim(format!("`{name}` must be a {expected}, found {found}"))
}
