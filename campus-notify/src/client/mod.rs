//! Client side of the notification subsystem.
//!
//! A [`ClientSession`] owns a [`ReconciliationCache`] and a delivery
//! manager that keeps it current over push or polling.

pub mod cache;
pub mod delivery;
pub mod refresh;
pub mod remote;
pub mod session;

pub use cache::{CacheConfig, CacheEvent, ReconciliationCache, RemoteUpdate};
pub use delivery::{ChannelKind, ConnectionStatus, DeliveryChannel, DeliveryConfig, Inbound};
pub use refresh::{RefreshGate, RefreshReason};
pub use remote::{HttpNotificationApi, NotificationApi};
pub use session::{ClientSession, SessionConfig};
