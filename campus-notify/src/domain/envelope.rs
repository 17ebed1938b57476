//! Normalized notification envelope.
//!
//! Every record the aggregator pulls from an event source is normalized into a
//! [`NotificationEnvelope`]. Identifiers are only unique within their source, so
//! all deduplication and reconciliation happens on [`CompositeKey`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The store an envelope was read from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventSource {
    DirectMessage,
    BroadcastAlert,
    ChatUnread,
    FriendRequest,
}

impl EventSource {
    pub const ALL: [EventSource; 4] = [
        EventSource::DirectMessage,
        EventSource::BroadcastAlert,
        EventSource::ChatUnread,
        EventSource::FriendRequest,
    ];

    /// Whether read/processed state for this source is owned by the notification core.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::DirectMessage | Self::BroadcastAlert)
    }

    /// The message kind this source is delivered under on the push channel.
    pub fn kind(&self) -> FeedKind {
        match self {
            Self::DirectMessage | Self::BroadcastAlert => FeedKind::Notification,
            Self::ChatUnread => FeedKind::Chat,
            Self::FriendRequest => FeedKind::FriendRequest,
        }
    }
}

/// Coarse routing kind for pushed updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeedKind {
    Notification,
    Chat,
    FriendRequest,
}

impl FeedKind {
    /// Sources whose envelopes travel under this kind.
    pub fn sources(&self) -> &'static [EventSource] {
        match self {
            Self::Notification => &[EventSource::DirectMessage, EventSource::BroadcastAlert],
            Self::Chat => &[EventSource::ChatUnread],
            Self::FriendRequest => &[EventSource::FriendRequest],
        }
    }
}

/// Deduplication key: `source:id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompositeKey {
    source: EventSource,
    id: String,
}

impl CompositeKey {
    pub fn new(source: EventSource, id: impl Into<String>) -> Self {
        Self {
            source,
            id: id.into(),
        }
    }

    pub fn source(&self) -> EventSource {
        self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

impl FromStr for CompositeKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, id) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::validation(format!("Malformed composite key: {}", s)))?;
        let source = EventSource::from_str(source)
            .map_err(|_| crate::Error::validation(format!("Unknown event source: {}", source)))?;
        if id.is_empty() {
            return Err(crate::Error::validation(format!(
                "Composite key has an empty id: {}",
                s
            )));
        }
        Ok(Self::new(source, id))
    }
}

impl TryFrom<String> for CompositeKey {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CompositeKey> for String {
    fn from(key: CompositeKey) -> Self {
        key.to_string()
    }
}

/// Severity, ordered from least to most pressing.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Severity {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Severity {
    /// Lenient parse for values stored by other subsystems.
    ///
    /// Unknown values fall back to [`Severity::Normal`].
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "info" => Self::Low,
            "high" | "warning" => Self::High,
            "urgent" | "critical" => Self::Urgent,
            _ => Self::Normal,
        }
    }
}

/// Who an envelope is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "identity", rename_all = "snake_case")]
pub enum TargetScope {
    /// Addressed to exactly one identity.
    Identity(String),
    /// Addressed to every identity whose role admits the category.
    Broadcast,
}

impl TargetScope {
    pub fn from_optional(identity: Option<String>) -> Self {
        match identity {
            Some(id) if !id.trim().is_empty() => Self::Identity(id),
            _ => Self::Broadcast,
        }
    }
}

/// Whether an envelope asks for administrative action, and whether that happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    NotRequired,
    Pending,
    Processed,
}

impl ActionState {
    pub fn from_flags(requires_action: bool, processed: bool) -> Self {
        match (requires_action, processed) {
            (false, _) => Self::NotRequired,
            (true, false) => Self::Pending,
            (true, true) => Self::Processed,
        }
    }
}

/// Display fields. Opaque to the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePayload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Source-specific reference (chat room, request id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// A notification event after normalization, regardless of source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EnvelopeRepr", from = "EnvelopeRepr")]
pub struct NotificationEnvelope {
    pub key: CompositeKey,
    pub category: String,
    pub severity: Severity,
    pub is_read: bool,
    pub action: ActionState,
    pub created_at: DateTime<Utc>,
    pub target: TargetScope,
    pub payload: EnvelopePayload,
}

impl NotificationEnvelope {
    pub fn source(&self) -> EventSource {
        self.key.source()
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// Plain-bool view of [`ActionState`]; `false` when no action is required.
    pub fn is_processed(&self) -> bool {
        self.action == ActionState::Processed
    }

    pub fn requires_action(&self) -> bool {
        self.action != ActionState::NotRequired
    }

    pub fn is_broadcast(&self) -> bool {
        self.target == TargetScope::Broadcast
    }
}

/// JSON form of an envelope. Carries a derived `is_processed` flag next to
/// `action` for consumers that only understand the boolean.
#[derive(Serialize, Deserialize)]
struct EnvelopeRepr {
    key: CompositeKey,
    category: String,
    #[serde(default)]
    severity: Severity,
    #[serde(default)]
    is_read: bool,
    #[serde(default)]
    action: ActionState,
    #[serde(default)]
    is_processed: bool,
    created_at: DateTime<Utc>,
    target: TargetScope,
    #[serde(default)]
    payload: EnvelopePayload,
}

impl From<NotificationEnvelope> for EnvelopeRepr {
    fn from(envelope: NotificationEnvelope) -> Self {
        Self {
            is_processed: envelope.is_processed(),
            key: envelope.key,
            category: envelope.category,
            severity: envelope.severity,
            is_read: envelope.is_read,
            action: envelope.action,
            created_at: envelope.created_at,
            target: envelope.target,
            payload: envelope.payload,
        }
    }
}

impl From<EnvelopeRepr> for NotificationEnvelope {
    fn from(repr: EnvelopeRepr) -> Self {
        Self {
            key: repr.key,
            category: repr.category,
            severity: repr.severity,
            is_read: repr.is_read,
            action: repr.action,
            created_at: repr.created_at,
            target: repr.target,
            payload: repr.payload,
        }
    }
}

/// Counters derived from a set of envelopes.
///
/// Always recomputed from the set; never tracked incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCounts {
    pub total_unread: usize,
    pub system_unread: usize,
    pub chat_unread: usize,
    pub friend_request_count: usize,
    pub unread_by_category: BTreeMap<String, usize>,
}

impl FeedCounts {
    pub fn from_envelopes<'a, I>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = &'a NotificationEnvelope>,
    {
        let mut counts = Self::default();
        for envelope in envelopes {
            match envelope.source() {
                EventSource::ChatUnread => counts.chat_unread += 1,
                EventSource::FriendRequest => counts.friend_request_count += 1,
                EventSource::DirectMessage | EventSource::BroadcastAlert => {
                    if !envelope.is_read {
                        counts.system_unread += 1;
                    }
                }
            }

            if !envelope.is_read {
                counts.total_unread += 1;
                *counts
                    .unread_by_category
                    .entry(envelope.category.clone())
                    .or_default() += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn envelope(source: EventSource, id: &str, category: &str) -> NotificationEnvelope {
        NotificationEnvelope {
            key: CompositeKey::new(source, id),
            category: category.to_string(),
            severity: Severity::Normal,
            is_read: false,
            action: ActionState::NotRequired,
            created_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            target: TargetScope::Identity("u-1".to_string()),
            payload: EnvelopePayload {
                title: format!("{} {}", source, id),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::envelope;
    use super::*;

    #[test]
    fn composite_key_round_trips_through_text() {
        let key = CompositeKey::new(EventSource::BroadcastAlert, "42");
        assert_eq!(key.to_string(), "broadcast_alert:42");
        assert_eq!("broadcast_alert:42".parse::<CompositeKey>().unwrap(), key);
    }

    #[test]
    fn composite_keys_with_same_id_differ_by_source() {
        let a = CompositeKey::new(EventSource::DirectMessage, "7");
        let b = CompositeKey::new(EventSource::BroadcastAlert, "7");
        assert_ne!(a, b);
    }

    #[test]
    fn composite_key_rejects_garbage() {
        assert!("nope".parse::<CompositeKey>().is_err());
        assert!("mailbox:1".parse::<CompositeKey>().is_err());
        assert!("chat_unread:".parse::<CompositeKey>().is_err());
    }

    #[test]
    fn severity_orders_low_to_urgent() {
        assert!(Severity::Low < Severity::Normal);
        assert!(Severity::High < Severity::Urgent);
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Urgent);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Normal);
    }

    #[test]
    fn action_state_keeps_processed_false_when_not_required() {
        let mut env = envelope(EventSource::DirectMessage, "1", "general");
        env.action = ActionState::from_flags(false, true);
        assert!(!env.is_processed());
        env.action = ActionState::from_flags(true, true);
        assert!(env.is_processed());
    }

    #[test]
    fn json_form_carries_processed_flag() {
        let mut env = envelope(EventSource::BroadcastAlert, "5", "account_change_request");
        env.action = ActionState::Processed;
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["key"], "broadcast_alert:5");
        assert_eq!(json["action"], "processed");
        assert_eq!(json["is_processed"], true);

        let back: NotificationEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn counts_follow_the_set() {
        let mut read = envelope(EventSource::DirectMessage, "1", "general");
        read.is_read = true;
        let envelopes = vec![
            read,
            envelope(EventSource::DirectMessage, "2", "general"),
            envelope(EventSource::BroadcastAlert, "2", "system_error"),
            envelope(EventSource::ChatUnread, "9", "chat_message"),
            envelope(EventSource::FriendRequest, "3", "friend_request"),
        ];

        let counts = FeedCounts::from_envelopes(&envelopes);
        assert_eq!(counts.total_unread, 4);
        assert_eq!(counts.system_unread, 2);
        assert_eq!(counts.chat_unread, 1);
        assert_eq!(counts.friend_request_count, 1);
        assert_eq!(counts.unread_by_category.get("general"), Some(&1));
    }

    #[test]
    fn target_scope_treats_blank_identity_as_broadcast() {
        assert_eq!(TargetScope::from_optional(None), TargetScope::Broadcast);
        assert_eq!(
            TargetScope::from_optional(Some("  ".to_string())),
            TargetScope::Broadcast
        );
    }
}
