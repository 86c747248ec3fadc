//! # Cognito Token Verifier
//!
//! Verification of AWS Cognito user pool JWTs against the pool's published
//! JSON Web Key Set.
//!
//! ## Architecture
//!
//! - [`jwks`] - key set documents, HTTPS fetching and the single-flight cache
//! - [`resolver`] - `kid` lookup and JWK to verification key conversion
//! - [`token`] - compact JWS parsing that keeps the exact signing input
//! - [`claims`] - typed access to payload claims
//! - [`verifier`] - the verification pipeline
//! - [`attributes`] - `GetUser` attribute lookup for verified access tokens
//! - [`config`] / [`error`] - configuration and the error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cognito_token_verifier::{TokenUse, Verifier, VerifierConfig};
//!
//! # async fn run(raw_token: &str) -> Result<(), cognito_token_verifier::VerifyError> {
//! let config = VerifierConfig::new("us-east-1", "us-east-1_ABC123")
//!     .with_issuer_validation()
//!     .with_token_use(TokenUse::Access)
//!     .with_audiences(["my-app-client-id"]);
//! let verifier = Verifier::new(config)?;
//!
//! let token = verifier.verify(raw_token).await?;
//! println!("subject: {:?}", token.subject());
//! # Ok(())
//! # }
//! ```
//!
//! Every error means the token must be rejected; branch on
//! [`VerifyError::kind`] when the reason matters.

#![warn(missing_docs)]

pub mod attributes;
pub mod claims;
pub mod config;
pub mod error;
pub mod jwks;
pub mod resolver;
pub mod token;
pub mod verifier;

pub use attributes::{AttributeError, CognitoUserClient, UserAttributeSource};
pub use claims::Claims;
pub use config::{TokenUse, VerifierConfig};
pub use error::{ErrorKind, Result, VerifyError};
pub use jwks::{FetchError, HttpKeySetClient, KeyRecord, KeySet, KeySetCache, KeySetSource};
pub use resolver::{ResolveError, ResolvedKey};
pub use token::{Token, TokenError};
pub use verifier::{VerifiedToken, Verifier};

/// Re-exported so callers can configure algorithms without a direct dependency
pub use jsonwebtoken::Algorithm;
