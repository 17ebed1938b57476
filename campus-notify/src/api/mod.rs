//! HTTP and WebSocket API.
//!
//! REST endpoints for the aggregated feed and its mutations, plus the
//! push channel at `/api/notifications/ws`.

pub mod error;
pub mod jwt;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
