//! Common test utilities for integration tests
//!
//! A wiremock stand-in for the Cognito key set and `GetUser` endpoints, plus
//! RSA signing keys for minting tokens.

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cognito_token_verifier::VerifierConfig;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

pub const REGION: &str = "us-east-1";
pub const USER_POOL_ID: &str = "us-east-1_TestPool";
pub const CLIENT_ID: &str = "test-app-client";

/// Cognito mock server
pub struct MockCognito {
    pub server: MockServer,
    pub jwks_url: String,
    pub api_endpoint: String,
}

impl MockCognito {
    /// Start a new mock server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            server,
            jwks_url: format!("{}/jwks", base_url),
            api_endpoint: format!("{}/", base_url),
        }
    }

    /// Verifier configuration pointed at this server
    pub fn config(&self) -> VerifierConfig {
        VerifierConfig::new(REGION, USER_POOL_ID).with_jwks_url(&self.jwks_url)
    }

    /// Mock the key set endpoint with `keys`
    pub async fn mock_jwks(&self, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Mock the key set endpoint and require exactly `times` requests
    pub async fn mock_jwks_expect(&self, keys: Vec<Value>, times: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` for the first `times` requests only
    pub async fn mock_jwks_up_to(&self, keys: Vec<Value>, times: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Mock the key set endpoint with an arbitrary response
    pub async fn mock_jwks_response(&self, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Mock a successful `GetUser` call
    pub async fn mock_get_user(&self, attributes: &[(&str, &str)], times: u64) {
        let user_attributes: Vec<Value> = attributes
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect();

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header(
                "X-Amz-Target",
                "AWSCognitoIdentityProviderService.GetUser",
            ))
            .and(header("Content-Type", "application/x-amz-json-1.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Username": "alice",
                "UserAttributes": user_attributes,
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Mock a rejected `GetUser` call
    pub async fn mock_get_user_error(&self, error_type: &str, message: &str) {
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": error_type,
                "message": message,
            })))
            .mount(&self.server)
            .await;
    }
}

/// RSA signing key with its published JWK
pub struct TestKey {
    pub kid: String,
    pub jwk: Value,
    encoding_key: EncodingKey,
}

impl TestKey {
    fn generate(kid: &str) -> Self {
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};
        use rsa::traits::PublicKeyParts;
        use rsa::RsaPrivateKey;

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key");
        let encoding_key =
            EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("Invalid RSA key");

        let jwk = json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        });

        Self {
            kid: kid.to_string(),
            jwk,
            encoding_key,
        }
    }

    /// Sign `claims` as RS256 with this key's `kid`
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign `claims` with an explicit header
    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        jsonwebtoken::encode(header, claims, &self.encoding_key).expect("Failed to encode test JWT")
    }
}

/// Key published before rotation (generated once per test binary)
pub fn primary_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| TestKey::generate("primary-2025"))
}

/// Key published after rotation
pub fn rotated_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| TestKey::generate("rotated-2026"))
}

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Issuer of the test pool
pub fn issuer() -> String {
    format!("https://cognito-idp.{REGION}.amazonaws.com/{USER_POOL_ID}")
}

/// Access token claims as Cognito issues them
pub fn access_token_claims(exp_offset: Duration) -> Value {
    let now = current_timestamp();
    json!({
        "sub": "8f1c2a6e-0000-4000-8000-123456789abc",
        "iss": issuer(),
        "client_id": CLIENT_ID,
        "token_use": "access",
        "scope": "aws.cognito.signin.user.admin",
        "auth_time": now,
        "iat": now,
        "exp": now + exp_offset.as_secs() as i64,
        "username": "alice",
    })
}

/// ID token claims as Cognito issues them
pub fn id_token_claims(exp_offset: Duration) -> Value {
    let now = current_timestamp();
    json!({
        "sub": "8f1c2a6e-0000-4000-8000-123456789abc",
        "iss": issuer(),
        "aud": CLIENT_ID,
        "token_use": "id",
        "email": "alice@example.com",
        "email_verified": true,
        "cognito:groups": ["admins"],
        "auth_time": now,
        "iat": now,
        "exp": now + exp_offset.as_secs() as i64,
    })
}

/// Replace the payload of `token` without re-signing
pub fn tamper_payload(token: &str, claims: &Value) -> String {
    let mut segments = token.split('.');
    let header = segments.next().expect("header segment");
    let _payload = segments.next().expect("payload segment");
    let signature = segments.next().expect("signature segment");
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.{signature}")
}
