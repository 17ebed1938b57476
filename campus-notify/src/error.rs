//! Application-wide error types.

use thiserror::Error;

use crate::domain::EventSource;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// A single event source that failed to contribute to an aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceFailure {
    pub source: EventSource,
    pub reason: String,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source {event_source} timed out after {timeout_ms}ms")]
    SourceTimeout {
        event_source: EventSource,
        timeout_ms: u64,
    },

    /// Every event source failed; distinct from an empty feed.
    #[error("Aggregation failed: all sources failed ({})", format_failures(.failures))]
    AggregationFailed { failures: Vec<SourceFailure> },

    #[error("Source {event_source} is read-only for notification mutations")]
    ReadOnlySource { event_source: EventSource },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Delivery channel error: {0}")]
    Channel(String),

    /// A mutation was applied optimistically and then rolled back.
    #[error("Mutation on {target} rejected: {message}")]
    MutationRejected { target: String, message: String },

    #[error("{0}")]
    Other(String),
}

fn format_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Whether this error came from the transport rather than the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::WebSocket(_) | Self::Channel(_))
    }
}
