//! Delivery channels.
//!
//! One [`DeliveryChannel`] interface with two implementations, push
//! ([`push::PushChannel`]) and poll ([`poll::PollChannel`]). The
//! [`manager::DeliveryManager`] selects between them: a healthy push channel
//! fully suppresses polling, and polling takes over whenever push is down.

pub mod backoff;
pub mod manager;
pub mod poll;
pub mod push;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::cache::RemoteUpdate;
use crate::Result;

pub use backoff::ReconnectBackoff;
pub use manager::{DeliveryConfig, DeliveryHandle, DeliveryManager, SessionSignal};
pub use poll::{AdaptivePollSchedule, PollChannel, PollScheduleConfig};
pub use push::PushChannel;

/// Error code a server uses when every source failed.
pub const AGGREGATION_FAILED: &str = "AGGREGATION_FAILED";

/// Error code a poll channel reports when the fetch itself failed.
pub const FETCH_FAILED: &str = "FETCH_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelKind {
    Push,
    Poll,
}

/// Which path currently delivers updates to the session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Push,
    Polling,
    #[default]
    Disconnected,
}

/// Push channel lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// One item received from a channel, routed by kind only.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Update(RemoteUpdate),
    Heartbeat,
    ServerError { code: String, message: String },
}

#[async_trait]
pub trait DeliveryChannel: Send {
    fn kind(&self) -> ChannelKind;

    async fn connect(&mut self) -> Result<()>;

    /// Next inbound item. `Ok(None)` means the peer closed the channel.
    ///
    /// Must be cancel safe: the manager drops this future whenever another
    /// event wins the race.
    async fn next(&mut self) -> Result<Option<Inbound>>;

    /// Ask for a full snapshot. Supersedes any request still in flight.
    async fn request_snapshot(&mut self) -> Result<()>;

    async fn heartbeat(&mut self) -> Result<()>;

    /// Close the channel and cancel in-flight work.
    async fn disconnect(&mut self);
}
