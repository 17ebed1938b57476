//! Repository layer for the event-source tables.
//!
//! Each source is reached through an async trait so the aggregator can be
//! driven by in-memory fakes in tests.

pub mod broadcast_alert;
pub mod chat;
pub mod direct_message;
pub mod friend_request;

pub use broadcast_alert::*;
pub use chat::*;
pub use direct_message::*;
pub use friend_request::*;
