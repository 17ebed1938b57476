//! JWT authentication extractor.
//!
//! Resolves the caller's [`Viewer`] from a Bearer token once per request.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::api::error::ApiError;
use crate::api::jwt::{Claims, JwtError};
use crate::api::server::AppState;
use crate::domain::Viewer;

/// JWT authentication failure.
#[derive(Debug)]
pub enum JwtAuthError {
    /// Missing Authorization header
    MissingToken,
    /// Invalid token format (not Bearer)
    InvalidFormat,
    /// Token validation failed
    InvalidToken(JwtError),
    /// No JWT secret configured on this server
    NotConfigured,
}

impl From<JwtAuthError> for ApiError {
    fn from(err: JwtAuthError) -> Self {
        match err {
            JwtAuthError::MissingToken => ApiError::unauthorized("Missing authorization token"),
            JwtAuthError::InvalidFormat => ApiError::unauthorized("Invalid token format"),
            JwtAuthError::InvalidToken(JwtError::TokenExpired) => {
                ApiError::unauthorized("Token has expired")
            }
            JwtAuthError::InvalidToken(_) => ApiError::unauthorized("Invalid token"),
            JwtAuthError::NotConfigured => {
                ApiError::service_unavailable("Authentication is not configured")
            }
        }
    }
}

/// Extract the Bearer token from an Authorization header value.
pub fn extract_bearer_token(header: &str) -> Result<&str, JwtAuthError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(JwtAuthError::InvalidFormat)
}

/// Validate a raw token against the state's JWT service.
pub fn authenticate(state: &AppState, token: &str) -> Result<Claims, JwtAuthError> {
    let jwt_service = state
        .jwt_service
        .as_ref()
        .ok_or(JwtAuthError::NotConfigured)?;
    jwt_service
        .validate_token(token)
        .map_err(JwtAuthError::InvalidToken)
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthViewer(pub Viewer);

impl FromRequestParts<AppState> for AuthViewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(JwtAuthError::MissingToken)?
            .to_str()
            .map_err(|_| JwtAuthError::InvalidFormat)?;

        let token = extract_bearer_token(header)?;
        let claims = authenticate(state, token)?;
        let viewer = claims.viewer();

        tracing::debug!(identity = %viewer.identity, role = %viewer.role, "Authenticated request");
        Ok(AuthViewer(viewer))
    }
}
