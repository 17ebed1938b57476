//! Native source rows to [`NotificationEnvelope`].

use crate::database::models::{
    BroadcastAlertDbModel, ChatUnreadDbModel, DirectMessageDbModel, FriendRequestDbModel,
};
use crate::database::time::ms_to_datetime;
use crate::domain::{
    ActionState, CompositeKey, EnvelopePayload, EventSource, NotificationEnvelope, Severity,
    TargetScope,
};

use super::events::{CHAT_MESSAGE, FRIEND_REQUEST, canonicalize_category};

pub fn direct_message(row: DirectMessageDbModel) -> NotificationEnvelope {
    NotificationEnvelope {
        key: CompositeKey::new(EventSource::DirectMessage, row.id.to_string()),
        category: canonicalize_category(&row.category),
        severity: Severity::parse_lenient(&row.severity),
        is_read: row.is_read,
        action: ActionState::from_flags(row.requires_action, row.is_processed),
        created_at: ms_to_datetime(row.created_at),
        target: TargetScope::Identity(row.recipient_id),
        payload: EnvelopePayload {
            title: row.title,
            body: row.body,
            sender: row.sender_name.or(row.sender_id),
            reference: row.link,
        },
    }
}

pub fn broadcast_alert(row: BroadcastAlertDbModel) -> NotificationEnvelope {
    NotificationEnvelope {
        key: CompositeKey::new(EventSource::BroadcastAlert, row.id.to_string()),
        category: canonicalize_category(&row.category),
        severity: Severity::parse_lenient(&row.severity),
        is_read: row.is_read,
        action: ActionState::from_flags(row.requires_action, row.is_processed),
        created_at: ms_to_datetime(row.created_at),
        target: TargetScope::from_optional(row.target_id),
        payload: EnvelopePayload {
            title: row.title,
            body: row.body,
            sender: None,
            reference: row.subject_ref,
        },
    }
}

/// Chat rows are unread by construction; the chat subsystem deletes them on read.
pub fn chat_unread(row: ChatUnreadDbModel) -> NotificationEnvelope {
    NotificationEnvelope {
        key: CompositeKey::new(EventSource::ChatUnread, row.id.to_string()),
        category: CHAT_MESSAGE.to_string(),
        severity: Severity::Normal,
        is_read: false,
        action: ActionState::NotRequired,
        created_at: ms_to_datetime(row.created_at),
        target: TargetScope::Identity(row.recipient_id),
        payload: EnvelopePayload {
            title: row.sender_name.clone(),
            body: row.content,
            sender: Some(row.sender_name),
            reference: Some(row.room_id),
        },
    }
}

pub fn friend_request(row: FriendRequestDbModel) -> NotificationEnvelope {
    NotificationEnvelope {
        key: CompositeKey::new(EventSource::FriendRequest, row.id.to_string()),
        category: FRIEND_REQUEST.to_string(),
        severity: Severity::Normal,
        is_read: false,
        action: ActionState::NotRequired,
        created_at: ms_to_datetime(row.created_at),
        target: TargetScope::Identity(row.addressee_id),
        payload: EnvelopePayload {
            title: row.requester_name,
            body: row.message.unwrap_or_default(),
            sender: Some(row.requester_id),
            reference: None,
        },
    }
}
