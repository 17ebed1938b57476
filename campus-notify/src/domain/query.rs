//! Feed query: filters, ordering and paging window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::{NotificationEnvelope, Severity};

/// Read-state filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    Read,
    Unread,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    /// Severity descending, then newest first.
    Severity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Filters are a conjunction; an empty query matches everything visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedQuery {
    pub read_state: Option<ReadState>,
    pub severity: Option<Severity>,
    pub category: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub sort: SortKey,
    pub direction: SortDirection,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FeedQuery {
    pub fn unread() -> Self {
        Self {
            read_state: Some(ReadState::Unread),
            ..Default::default()
        }
    }

    pub fn has_filters(&self) -> bool {
        self.read_state.is_some()
            || self.severity.is_some()
            || self.category.is_some()
            || self.since.is_some()
            || self.until.is_some()
    }

    /// Whether an envelope passes every requested filter.
    pub fn matches(&self, envelope: &NotificationEnvelope) -> bool {
        if let Some(state) = self.read_state {
            let wants_read = state == ReadState::Read;
            if envelope.is_read != wants_read {
                return false;
            }
        }
        if let Some(severity) = self.severity
            && envelope.severity != severity
        {
            return false;
        }
        if let Some(category) = &self.category
            && &envelope.category != category
        {
            return false;
        }
        if let Some(since) = self.since
            && envelope.created_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && envelope.created_at > until
        {
            return false;
        }
        true
    }

    pub fn validate(&self) -> crate::Result<()> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(crate::Error::validation(
                "time range start must not be after its end",
            ));
        }
        Ok(())
    }
}
