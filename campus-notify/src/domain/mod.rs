//! Domain types shared by the server and client halves.

pub mod backoff;
pub mod envelope;
pub mod query;
pub mod role;

pub use backoff::BackoffPolicy;
pub use envelope::{
    ActionState, CompositeKey, EnvelopePayload, EventSource, FeedCounts, FeedKind,
    NotificationEnvelope, Severity, TargetScope,
};
pub use query::{FeedQuery, ReadState, SortDirection, SortKey};
pub use role::{Role, Viewer};
