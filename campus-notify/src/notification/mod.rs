//! Notification core.
//!
//! Collects events from the four sources, applies per-role visibility,
//! deduplicates by composite key and exposes the merged feed plus
//! read/processed mutations.
//!
//! # Example
//!
//! ```ignore
//! use campus_notify::notification::{EventSources, NotificationService, NotificationServiceConfig};
//!
//! let service = NotificationService::new(EventSources::sqlite(pool), NotificationServiceConfig::default());
//! let feed = service.fetch(&viewer, &FeedQuery::default()).await?;
//! ```

pub mod aggregator;
pub mod events;
pub mod normalize;
pub mod protocol;
pub mod service;
pub mod visibility;

pub use aggregator::{Aggregator, AggregatorConfig, EventSources, Feed};
pub use events::{FeedSignal, SignalAudience};
pub use protocol::{ClientMessage, ServerMessage, UpdateScope};
pub use service::{DeleteTarget, NotificationService, NotificationServiceConfig, NotificationStats};
pub use visibility::{allowed_categories, can_see, viewer_categories};
