//! Push channel wire protocol.
//!
//! JSON text frames. Server frames are tagged by `kind`, client frames by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregator::Feed;
use crate::domain::{EventSource, FeedKind, NotificationEnvelope};

/// Whether a pushed envelope set replaces everything or one kind's slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateScope {
    /// Replaces the whole cached set. Always sent with `kind = notification`.
    Snapshot,
    /// Replaces the cached envelopes of the sources belonging to `kind`.
    Slice,
}

/// Server to client frame.
///
/// `degraded` lists sources that failed the pass; receivers keep their cached
/// envelopes for those sources instead of treating them as removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    Notification {
        scope: UpdateScope,
        envelopes: Vec<NotificationEnvelope>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        degraded: Vec<EventSource>,
    },
    Chat {
        scope: UpdateScope,
        envelopes: Vec<NotificationEnvelope>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        degraded: Vec<EventSource>,
    },
    FriendRequest {
        scope: UpdateScope,
        envelopes: Vec<NotificationEnvelope>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        degraded: Vec<EventSource>,
    },
    Heartbeat {
        at: DateTime<Utc>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn snapshot(feed: Feed) -> Self {
        Self::Notification {
            scope: UpdateScope::Snapshot,
            degraded: degraded_sources(&feed),
            envelopes: feed.envelopes,
        }
    }

    pub fn slice(kind: FeedKind, feed: Feed) -> Self {
        let scope = UpdateScope::Slice;
        let degraded = degraded_sources(&feed);
        let envelopes = feed.envelopes;
        match kind {
            FeedKind::Notification => Self::Notification {
                scope,
                envelopes,
                degraded,
            },
            FeedKind::Chat => Self::Chat {
                scope,
                envelopes,
                degraded,
            },
            FeedKind::FriendRequest => Self::FriendRequest {
                scope,
                envelopes,
                degraded,
            },
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat { at: Utc::now() }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

fn degraded_sources(feed: &Feed) -> Vec<EventSource> {
    feed.degraded.iter().map(|failure| failure.source).collect()
}

/// Client to server frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for a full snapshot.
    Refresh,
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventSource;
    use crate::domain::envelope::fixtures::envelope;
    use crate::error::SourceFailure;

    #[test]
    fn test_slice_is_tagged_by_kind() {
        let feed = Feed {
            envelopes: vec![envelope(EventSource::ChatUnread, "1", "chat_message")],
            ..Default::default()
        };
        let msg = ServerMessage::slice(FeedKind::Chat, feed);
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["kind"], "chat");
        assert_eq!(json["scope"], "slice");
        assert_eq!(json["envelopes"][0]["key"], "chat_unread:1");
        assert!(json.get("degraded").is_none());
    }

    #[test]
    fn test_snapshot_carries_degraded_sources() {
        let feed = Feed {
            degraded: vec![SourceFailure {
                source: EventSource::ChatUnread,
                reason: "timeout".to_string(),
            }],
            ..Default::default()
        };
        match ServerMessage::snapshot(feed) {
            ServerMessage::Notification {
                scope, degraded, ..
            } => {
                assert_eq!(scope, UpdateScope::Snapshot);
                assert_eq!(degraded, vec![EventSource::ChatUnread]);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_heartbeat_and_error() {
        let hb = ServerMessage::from_json(r#"{"kind":"heartbeat","at":"2025-03-01T00:00:00Z"}"#).unwrap();
        assert!(matches!(hb, ServerMessage::Heartbeat { .. }));

        let err = ServerMessage::from_json(r#"{"kind":"error","code":"X","message":"y"}"#).unwrap();
        assert_eq!(err, ServerMessage::error("X", "y"));
    }

    #[test]
    fn test_client_frames() {
        let refresh: ClientMessage = serde_json::from_str(r#"{"type":"refresh"}"#).unwrap();
        assert_eq!(refresh, ClientMessage::Refresh);
        assert_eq!(
            serde_json::to_string(&ClientMessage::Heartbeat).unwrap(),
            r#"{"type":"heartbeat"}"#
        );
    }
}
