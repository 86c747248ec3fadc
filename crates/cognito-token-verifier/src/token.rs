//! Compact JWS parsing
//!
//! [`Token::parse`] splits `header.payload.signature`, decodes each segment and
//! keeps the original `header.payload` bytes for signature verification.
//! Nothing here is trusted: the payload is only reachable inside the crate
//! and the verifier hands it out after the signature has been checked.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
use thiserror::Error;

use crate::claims::Claims;
use crate::error::VerifyError;

/// Upper bound on the compact token length accepted by the parser
pub const MAX_TOKEN_LENGTH: usize = 16 * 1024;

/// Structural token errors, surfaced as [`VerifyError::MalformedToken`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Token is empty or longer than [`MAX_TOKEN_LENGTH`]
    #[error("token length {0} is outside the accepted range")]
    Length(usize),

    /// Compact form must have exactly three segments
    #[error("expected 3 segments, found {0}")]
    SegmentCount(usize),

    /// A segment is not unpadded base64url
    #[error("{segment} segment is not valid base64url: {reason}")]
    Encoding {
        /// Which segment failed
        segment: &'static str,
        /// Decoder message
        reason: String,
    },

    /// A segment decoded but is not a JSON object
    #[error("{segment} segment is not a JSON object")]
    NotAnObject {
        /// Which segment failed
        segment: &'static str,
    },

    /// Signature segment is empty (unsecured JWS)
    #[error("signature segment is empty")]
    MissingSignature,

    /// Header has no string `alg`
    #[error("header has no `alg`")]
    MissingAlgorithm,

    /// Header lists critical extensions, none of which are supported
    #[error("header declares unsupported critical extensions")]
    CriticalExtensions,
}

/// A parsed but unverified token
#[derive(Debug, Clone)]
pub struct Token {
    header: Claims,
    payload: Claims,
    signature: Vec<u8>,
    encoded_signature: String,
    signing_input: String,
}

impl Token {
    /// Parse a compact serialized token
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] if the segment count, encoding or shape is
    /// invalid. Signature and claims are not checked.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        if raw.is_empty() || raw.len() > MAX_TOKEN_LENGTH {
            return Err(TokenError::Length(raw.len()));
        }

        let segments: Vec<&str> = raw.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(TokenError::SegmentCount(segments.len()));
        };

        let header = decode_object("header", header_b64)?;
        let payload = decode_object("payload", payload_b64)?;

        if signature_b64.is_empty() {
            return Err(TokenError::MissingSignature);
        }
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| TokenError::Encoding {
                segment: "signature",
                reason: e.to_string(),
            })?;

        if !matches!(header.get("alg"), Some(Value::String(_))) {
            return Err(TokenError::MissingAlgorithm);
        }
        if header.contains("crit") {
            return Err(TokenError::CriticalExtensions);
        }

        // Signing input is the received text, never a re-serialization
        let signing_input = raw[..header_b64.len() + 1 + payload_b64.len()].to_string();

        Ok(Self {
            header,
            payload,
            signature,
            encoded_signature: (*signature_b64).to_string(),
            signing_input,
        })
    }

    /// Decoded JOSE header
    pub fn header(&self) -> &Claims {
        &self.header
    }

    /// Header `alg` as written by the issuer
    pub fn algorithm(&self) -> &str {
        // Presence is checked by `parse`
        self.header.get_str("alg").ok().flatten().unwrap_or_default()
    }

    /// Header `kid`
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::NoKidHeader`] if `kid` is absent or not a string.
    pub fn key_id(&self) -> Result<&str, VerifyError> {
        match self.header.get("kid") {
            Some(Value::String(kid)) => Ok(kid),
            _ => Err(VerifyError::NoKidHeader),
        }
    }

    /// Exact `header.payload` bytes that were signed
    pub fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }

    /// Decoded signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub(crate) fn encoded_signature(&self) -> &str {
        &self.encoded_signature
    }

    /// Payload claims; callers inside the crate read them only after the
    /// signature check.
    pub(crate) fn payload(&self) -> &Claims {
        &self.payload
    }

    pub(crate) fn into_payload(self) -> Claims {
        self.payload
    }
}

fn decode_object(segment: &'static str, encoded: &str) -> Result<Claims, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| TokenError::Encoding {
            segment,
            reason: e.to_string(),
        })?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(Claims::new(map)),
        _ => Err(TokenError::NotAnObject { segment }),
    }
}
