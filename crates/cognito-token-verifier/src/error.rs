//! Verification error types
//!
//! Every failure on the verification path is a distinct [`VerifyError`]
//! variant. Callers that need to branch should match on [`VerifyError::kind`]
//! instead of inspecting messages. Any error means the token must be rejected.

use thiserror::Error;

use crate::jwks::FetchError;
use crate::resolver::ResolveError;
use crate::token::TokenError;

/// Result alias used throughout the crate
pub type Result<T, E = VerifyError> = std::result::Result<T, E>;

/// Token verification errors
///
/// # Non-exhaustive
///
/// New claim rules may add variants; downstream matches need a wildcard arm.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyError {
    /// The compact token could not be split or decoded
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token header carries no string `kid`
    #[error("expecting JWT header to have header kid")]
    NoKidHeader,

    /// No key in the fetched key set has the token's `kid`
    #[error("no matching keyIDs are fetched (kid: {kid})")]
    KidsDontMatch {
        /// The key identifier the token declared
        kid: String,
    },

    /// The signature does not verify against the resolved key
    ///
    /// Also covers a key whose type or published `alg` cannot have produced
    /// the token's signature.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The `exp` claim is not in the future
    #[error("token is expired")]
    TokenExpired,

    /// The `nbf` claim is in the future
    #[error("token is not yet valid")]
    TokenNotYetValid,

    /// The `iat` claim is in the future
    #[error("token used before issued")]
    TokenUsedBeforeIssued,

    /// The `iss` claim does not name the configured user pool
    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Neither `aud` nor `client_id` matches a configured audience
    #[error("token audience does not match any configured audience")]
    InvalidAudience,

    /// The `token_use` claim is not the configured one
    #[error("unexpected token_use: {0}")]
    InvalidTokenUse(String),

    /// A claim is present with the wrong JSON type
    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    /// The header `alg` is outside the configured policy (`none`, HMAC or
    /// any algorithm not in the allowed list)
    ///
    /// A refinement of [`VerifyError::InvalidSignature`]: the token is
    /// refused before any signature check is attempted.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The matched key record could not be turned into a verification key
    #[error("key conversion failed: {0}")]
    KeyConversion(String),

    /// The key set could not be retrieved
    #[error("key set fetch failed: {0}")]
    Fetch(String),

    /// The key set document is malformed
    #[error("key set parse failed: {0}")]
    Parse(String),

    /// The caller's deadline elapsed before verification finished
    #[error("verification deadline exceeded")]
    DeadlineExceeded,

    /// The verifier configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The downstream user attribute lookup failed
    #[error("user attribute lookup failed: {0}")]
    AttributeLookup(String),
}

/// Fieldless discriminant of [`VerifyError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`VerifyError::MalformedToken`]
    MalformedToken,
    /// See [`VerifyError::NoKidHeader`]
    NoKidHeader,
    /// See [`VerifyError::KidsDontMatch`]
    KidsDontMatch,
    /// See [`VerifyError::InvalidSignature`]
    InvalidSignature,
    /// See [`VerifyError::TokenExpired`]
    TokenExpired,
    /// See [`VerifyError::TokenNotYetValid`]
    TokenNotYetValid,
    /// See [`VerifyError::TokenUsedBeforeIssued`]
    TokenUsedBeforeIssued,
    /// See [`VerifyError::InvalidIssuer`]
    InvalidIssuer,
    /// See [`VerifyError::InvalidAudience`]
    InvalidAudience,
    /// See [`VerifyError::InvalidTokenUse`]
    InvalidTokenUse,
    /// See [`VerifyError::InvalidClaim`]
    InvalidClaim,
    /// See [`VerifyError::UnsupportedAlgorithm`]
    UnsupportedAlgorithm,
    /// See [`VerifyError::KeyConversion`]
    KeyConversion,
    /// See [`VerifyError::Fetch`]
    Fetch,
    /// See [`VerifyError::Parse`]
    Parse,
    /// See [`VerifyError::DeadlineExceeded`]
    DeadlineExceeded,
    /// See [`VerifyError::InvalidConfig`]
    InvalidConfig,
    /// See [`VerifyError::AttributeLookup`]
    AttributeLookup,
}

impl VerifyError {
    /// The kind of this error, for branching without string matching
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedToken(_) => ErrorKind::MalformedToken,
            Self::NoKidHeader => ErrorKind::NoKidHeader,
            Self::KidsDontMatch { .. } => ErrorKind::KidsDontMatch,
            Self::InvalidSignature => ErrorKind::InvalidSignature,
            Self::TokenExpired => ErrorKind::TokenExpired,
            Self::TokenNotYetValid => ErrorKind::TokenNotYetValid,
            Self::TokenUsedBeforeIssued => ErrorKind::TokenUsedBeforeIssued,
            Self::InvalidIssuer(_) => ErrorKind::InvalidIssuer,
            Self::InvalidAudience => ErrorKind::InvalidAudience,
            Self::InvalidTokenUse(_) => ErrorKind::InvalidTokenUse,
            Self::InvalidClaim(_) => ErrorKind::InvalidClaim,
            Self::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Self::KeyConversion(_) => ErrorKind::KeyConversion,
            Self::Fetch(_) => ErrorKind::Fetch,
            Self::Parse(_) => ErrorKind::Parse,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::AttributeLookup(_) => ErrorKind::AttributeLookup,
        }
    }

    /// Whether retrying later could succeed (transport failures and deadlines)
    ///
    /// Retry policy belongs to the caller; verification itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::DeadlineExceeded)
    }
}

impl From<TokenError> for VerifyError {
    fn from(err: TokenError) -> Self {
        Self::MalformedToken(err.to_string())
    }
}

impl From<FetchError> for VerifyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Parse(msg) => Self::Parse(msg),
            other => Self::Fetch(other.to_string()),
        }
    }
}

impl From<ResolveError> for VerifyError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownKeyId(kid) => Self::KidsDontMatch { kid },
            ResolveError::KeyConversion(msg) => Self::KeyConversion(msg),
        }
    }
}
