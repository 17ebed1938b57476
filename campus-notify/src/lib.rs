//! campus-notify library crate.
//!
//! Server side: event-source adapters, visibility rules, the aggregator and
//! the HTTP/WebSocket API. Client side: the delivery channel manager and the
//! reconciliation cache that a presentation layer drives.

pub mod api;
pub mod client;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
