//! JWT validation.
//!
//! Tokens are issued by the platform's authentication service; this module
//! only validates them and turns their claims into a [`Viewer`].

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::domain::Viewer;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Identity (subject)
    pub sub: String,
    /// Role claims; unrecognized ones are ignored
    #[serde(default)]
    pub roles: Vec<String>,
    pub iss: String,
    pub aud: String,
    /// Expiration timestamp (Unix)
    pub exp: u64,
    /// Issued at timestamp (Unix)
    pub iat: u64,
}

impl Claims {
    /// Resolve the caller once; role is never re-derived per call.
    pub fn viewer(&self) -> Viewer {
        Viewer::from_claims(self.sub.clone(), &self.roles)
    }
}

/// JWT service error types.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
    #[error("Token validation failed: {0}")]
    TokenValidation(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
}

/// JWT service for token validation.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiration_secs: u64,
}

impl JwtService {
    pub fn new(secret: &str, issuer: &str, audience: &str, expiration_secs: Option<u64>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            expiration_secs: expiration_secs.unwrap_or(3600),
        }
    }

    /// Create a JWT service from `JWT_SECRET`, `JWT_ISSUER` and `JWT_AUDIENCE`.
    ///
    /// Returns `None` when no secret is configured.
    pub fn from_env() -> Option<Self> {
        let secret = std::env::var("JWT_SECRET").ok()?;
        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "campus-platform".to_string());
        let audience =
            std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "campus-notify".to_string());

        info!(issuer = %issuer, audience = %audience, "JWT validation enabled");

        Some(Self::new(&secret, &issuer, &audience, None))
    }

    /// Mint a token. Used by tests and local tooling; production tokens come
    /// from the authentication service.
    pub fn generate_token(&self, identity: &str, roles: Vec<String>) -> Result<String, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))?
            .as_secs();

        let claims = Claims {
            sub: identity.to_string(),
            roles,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: now + self.expiration_secs,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidToken,
                _ => JwtError::TokenValidation(e.to_string()),
            })
    }
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}
