//! Row models for the four event-source tables.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// A notice addressed to one recipient.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DirectMessageDbModel {
    pub id: i64,
    pub recipient_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub category: String,
    pub severity: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub requires_action: bool,
    pub is_read: bool,
    pub is_processed: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl DirectMessageDbModel {
    pub fn new(
        recipient_id: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            recipient_id: recipient_id.into(),
            sender_id: None,
            sender_name: None,
            category: category.into(),
            severity: "normal".to_string(),
            title: title.into(),
            body: String::new(),
            link: None,
            requires_action: false,
            is_read: false,
            is_processed: false,
            created_at: now_ms(),
        }
    }
}

/// An administrative alert. `target_id = None` is a broadcast.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BroadcastAlertDbModel {
    pub id: i64,
    pub target_id: Option<String>,
    pub category: String,
    pub severity: String,
    pub title: String,
    pub body: String,
    /// Identity or record the alert is about (the student, the teacher, ...).
    pub subject_ref: Option<String>,
    pub requires_action: bool,
    pub is_read: bool,
    pub is_processed: bool,
    pub created_at: i64,
}

impl BroadcastAlertDbModel {
    pub fn broadcast(category: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            target_id: None,
            category: category.into(),
            severity: "normal".to_string(),
            title: title.into(),
            body: String::new(),
            subject_ref: None,
            requires_action: false,
            is_read: false,
            is_processed: false,
            created_at: now_ms(),
        }
    }

    pub fn targeted(
        target_id: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            target_id: Some(target_id.into()),
            ..Self::broadcast(category, title)
        }
    }
}

/// One unread chat message, as exposed by the chat subsystem.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatUnreadDbModel {
    pub id: i64,
    pub room_id: String,
    pub recipient_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: i64,
}

/// A pending friend request.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FriendRequestDbModel {
    pub id: i64,
    pub requester_id: String,
    pub requester_name: String,
    pub addressee_id: String,
    pub message: Option<String>,
    pub status: String,
    pub created_at: i64,
}

/// Pushed-down subset of a feed query. Everything else is filtered after
/// normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
    pub unread_only: bool,
    pub read_only: bool,
    /// Inclusive lower bound, Unix epoch milliseconds.
    pub since_ms: Option<i64>,
    /// Inclusive upper bound, Unix epoch milliseconds.
    pub until_ms: Option<i64>,
    /// Newest-first fetch window per source.
    pub limit: i64,
}

impl SourceFilter {
    pub const DEFAULT_LIMIT: i64 = 500;

    pub fn new() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            ..Default::default()
        }
    }

    /// `is_read` value rows must have, if constrained.
    pub fn read_flag(&self) -> Option<bool> {
        match (self.unread_only, self.read_only) {
            (true, false) => Some(false),
            (false, true) => Some(true),
            _ => None,
        }
    }
}
