//! API middleware.
//!
//! Provides request authentication.

pub mod jwt_auth;

pub use jwt_auth::{AuthViewer, JwtAuthError};
