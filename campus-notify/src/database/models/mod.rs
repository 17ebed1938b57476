//! Database models for the event-source tables.

pub mod sources;

pub use sources::*;
