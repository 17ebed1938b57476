//! Multi-source feed aggregation.
//!
//! One pass queries every event source concurrently, each under its own
//! timeout. A failing source contributes nothing and is reported in
//! [`Feed::degraded`]; only when every requested source fails does the pass
//! return [`Error::AggregationFailed`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::DbPool;
use crate::database::models::SourceFilter;
use crate::database::repositories::{
    BroadcastAlertRepository, ChatUnreadRepository, DirectMessageRepository,
    FriendRequestRepository, SqlxBroadcastAlertRepository, SqlxChatUnreadRepository,
    SqlxDirectMessageRepository, SqlxFriendRequestRepository,
};
use crate::database::time::datetime_to_ms;
use crate::domain::{
    CompositeKey, EventSource, FeedCounts, FeedQuery, NotificationEnvelope, ReadState,
    SortDirection, SortKey, Viewer,
};
use crate::error::SourceFailure;
use crate::{Error, Result};

use super::events::{canonicalize_category, category_spellings};
use super::normalize;
use super::visibility::VisibilityFilter;

/// Aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Per-source timeout in milliseconds.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    /// Newest-first rows fetched per source in one pass.
    #[serde(default = "default_fetch_window")]
    pub fetch_window: i64,
}

fn default_source_timeout_ms() -> u64 {
    3000
}

fn default_fetch_window() -> i64 {
    SourceFilter::DEFAULT_LIMIT
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            fetch_window: default_fetch_window(),
        }
    }
}

impl AggregatorConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

/// The four event-source adapters.
#[derive(Clone)]
pub struct EventSources {
    pub direct: Arc<dyn DirectMessageRepository>,
    pub broadcast: Arc<dyn BroadcastAlertRepository>,
    pub chat: Arc<dyn ChatUnreadRepository>,
    pub friend: Arc<dyn FriendRequestRepository>,
}

impl EventSources {
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            direct: Arc::new(SqlxDirectMessageRepository::new(pool.clone())),
            broadcast: Arc::new(SqlxBroadcastAlertRepository::new(pool.clone())),
            chat: Arc::new(SqlxChatUnreadRepository::new(pool.clone())),
            friend: Arc::new(SqlxFriendRequestRepository::new(pool)),
        }
    }
}

/// Result of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    /// Visible, filtered, ordered and windowed envelopes.
    pub envelopes: Vec<NotificationEnvelope>,
    /// Counters over the filtered set before the offset/limit window.
    pub counts: FeedCounts,
    /// Size of the filtered set before the window.
    pub total: usize,
    /// Sources that failed this pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<SourceFailure>,
}

impl Feed {
    pub fn is_partial(&self) -> bool {
        !self.degraded.is_empty()
    }
}

pub struct Aggregator {
    sources: EventSources,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(sources: EventSources, config: AggregatorConfig) -> Self {
        Self { sources, config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Aggregate every source for `viewer`.
    pub async fn fetch(&self, viewer: &Viewer, query: &FeedQuery) -> Result<Feed> {
        self.fetch_sources(viewer, query, &EventSource::ALL).await
    }

    /// Aggregate only `sources` for `viewer`.
    pub async fn fetch_sources(
        &self,
        viewer: &Viewer,
        query: &FeedQuery,
        sources: &[EventSource],
    ) -> Result<Feed> {
        query.validate()?;
        // Stored categories are canonical; the filter must be too.
        let query = &FeedQuery {
            category: query.category.as_deref().map(canonicalize_category),
            ..query.clone()
        };

        let visibility = VisibilityFilter::new(viewer);
        let categories = category_spellings(visibility.allowed().iter().copied());
        let filter = self.source_filter(query);
        let wants = |source: EventSource| sources.contains(&source);

        let (direct, broadcast, chat, friend) = tokio::join!(
            self.guarded(EventSource::DirectMessage, wants(EventSource::DirectMessage), async {
                let rows = self.sources.direct.list(&viewer.identity, &filter).await?;
                Ok::<_, Error>(rows.into_iter().map(normalize::direct_message).collect::<Vec<_>>())
            }),
            self.guarded(EventSource::BroadcastAlert, wants(EventSource::BroadcastAlert), async {
                let rows = self
                    .sources
                    .broadcast
                    .list(&viewer.identity, &categories, &filter)
                    .await?;
                Ok::<_, Error>(rows.into_iter().map(normalize::broadcast_alert).collect::<Vec<_>>())
            }),
            self.guarded(EventSource::ChatUnread, wants(EventSource::ChatUnread), async {
                let rows = self
                    .sources
                    .chat
                    .list_unread(&viewer.identity, filter.limit)
                    .await?;
                Ok::<_, Error>(rows.into_iter().map(normalize::chat_unread).collect::<Vec<_>>())
            }),
            self.guarded(EventSource::FriendRequest, wants(EventSource::FriendRequest), async {
                let rows = self
                    .sources
                    .friend
                    .list_pending(&viewer.identity, filter.limit)
                    .await?;
                Ok::<_, Error>(rows.into_iter().map(normalize::friend_request).collect::<Vec<_>>())
            }),
        );

        let mut merged: BTreeMap<CompositeKey, NotificationEnvelope> = BTreeMap::new();
        let mut degraded = Vec::new();
        let mut attempted = 0usize;

        for (source, outcome) in [
            (EventSource::DirectMessage, direct),
            (EventSource::BroadcastAlert, broadcast),
            (EventSource::ChatUnread, chat),
            (EventSource::FriendRequest, friend),
        ] {
            let Some(outcome) = outcome else { continue };
            attempted += 1;
            match outcome {
                Ok(envelopes) => {
                    for envelope in envelopes {
                        merged.insert(envelope.key.clone(), envelope);
                    }
                }
                Err(e) => {
                    warn!(
                        source = %source,
                        viewer = %viewer.identity,
                        error = %e,
                        "Event source failed; continuing without it"
                    );
                    degraded.push(SourceFailure {
                        source,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if attempted > 0 && degraded.len() == attempted {
            return Err(Error::AggregationFailed { failures: degraded });
        }

        let mut visible: Vec<NotificationEnvelope> = merged
            .into_values()
            .filter(|envelope| visibility.allows(envelope))
            .filter(|envelope| query.matches(envelope))
            .collect();

        sort_envelopes(&mut visible, query.sort, query.direction);

        let total = visible.len();
        let counts = FeedCounts::from_envelopes(&visible);
        let envelopes = apply_window(visible, query.offset, query.limit);

        debug!(
            viewer = %viewer.identity,
            role = %viewer.role,
            total,
            returned = envelopes.len(),
            degraded = degraded.len(),
            "Aggregated feed"
        );

        Ok(Feed {
            envelopes,
            counts,
            total,
            degraded,
        })
    }

    /// Run one source query under the per-source timeout. `None` when the
    /// source was not requested.
    async fn guarded<F>(
        &self,
        source: EventSource,
        wanted: bool,
        fut: F,
    ) -> Option<Result<Vec<NotificationEnvelope>>>
    where
        F: Future<Output = Result<Vec<NotificationEnvelope>>>,
    {
        if !wanted {
            return None;
        }
        let timeout = self.config.source_timeout();
        Some(match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::SourceTimeout {
                event_source: source,
                timeout_ms: self.config.source_timeout_ms,
            }),
        })
    }

    fn source_filter(&self, query: &FeedQuery) -> SourceFilter {
        SourceFilter {
            unread_only: query.read_state == Some(ReadState::Unread),
            read_only: query.read_state == Some(ReadState::Read),
            since_ms: query.since.map(datetime_to_ms),
            until_ms: query.until.map(datetime_to_ms),
            limit: self.config.fetch_window,
        }
    }
}

/// Deterministic ordering. Ties always fall back to the composite key.
///
/// Severity ordering is fixed: severity descending, then newest first.
pub fn sort_envelopes(
    envelopes: &mut [NotificationEnvelope],
    sort: SortKey,
    direction: SortDirection,
) {
    envelopes.sort_by(|a, b| compare(a, b, sort, direction));
}

fn compare(
    a: &NotificationEnvelope,
    b: &NotificationEnvelope,
    sort: SortKey,
    direction: SortDirection,
) -> Ordering {
    let primary = match (sort, direction) {
        (SortKey::Severity, _) => b
            .severity
            .cmp(&a.severity)
            .then_with(|| b.created_at.cmp(&a.created_at)),
        (SortKey::CreatedAt, SortDirection::Desc) => b.created_at.cmp(&a.created_at),
        (SortKey::CreatedAt, SortDirection::Asc) => a.created_at.cmp(&b.created_at),
    };
    primary.then_with(|| a.key.cmp(&b.key))
}

fn apply_window(
    envelopes: Vec<NotificationEnvelope>,
    offset: usize,
    limit: Option<usize>,
) -> Vec<NotificationEnvelope> {
    let iter = envelopes.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! In-memory sources with per-source failure/delay injection.

    use super::*;
    use crate::database::models::{
        BroadcastAlertDbModel, ChatUnreadDbModel, DirectMessageDbModel, FriendRequestDbModel,
    };
    use crate::database::repositories::DeleteScope;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default, Clone, Copy)]
    pub enum Behavior {
        #[default]
        Ok,
        Fail,
        Hang,
    }

    async fn behave(behavior: Behavior) -> Result<()> {
        match behavior {
            Behavior::Ok => Ok(()),
            Behavior::Fail => Err(Error::Other("source unavailable".to_string())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    #[derive(Default)]
    pub struct FakeDirect {
        pub rows: Mutex<Vec<DirectMessageDbModel>>,
        pub behavior: Behavior,
    }

    #[async_trait]
    impl DirectMessageRepository for FakeDirect {
        async fn list(&self, recipient: &str, _filter: &SourceFilter) -> Result<Vec<DirectMessageDbModel>> {
            behave(self.behavior).await?;
            let rows = self.rows.lock().await;
            Ok(rows.iter().filter(|r| r.recipient_id == recipient).cloned().collect())
        }
        async fn get(&self, recipient: &str, id: i64) -> Result<DirectMessageDbModel> {
            let rows = self.rows.lock().await;
            rows.iter()
                .find(|r| r.id == id && r.recipient_id == recipient)
                .cloned()
                .ok_or_else(|| Error::not_found("DirectMessage", id.to_string()))
        }
        async fn mark_read(&self, recipient: &str, ids: &[i64]) -> Result<u64> {
            let mut rows = self.rows.lock().await;
            let mut n = 0;
            for row in rows.iter_mut() {
                if row.recipient_id == recipient && ids.contains(&row.id) && !row.is_read {
                    row.is_read = true;
                    n += 1;
                }
            }
            Ok(n)
        }
        async fn mark_all_read(&self, recipient: &str) -> Result<u64> {
            let ids: Vec<i64> = self.rows.lock().await.iter().map(|r| r.id).collect();
            self.mark_read(recipient, &ids).await
        }
        async fn mark_processed(&self, _recipient: &str, _id: i64) -> Result<u64> {
            Ok(0)
        }
        async fn delete(&self, _recipient: &str, _scope: &DeleteScope) -> Result<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    pub struct FakeBroadcast {
        pub rows: Vec<BroadcastAlertDbModel>,
        pub behavior: Behavior,
    }

    #[async_trait]
    impl BroadcastAlertRepository for FakeBroadcast {
        async fn list(
            &self,
            _recipient: &str,
            _categories: &[String],
            _filter: &SourceFilter,
        ) -> Result<Vec<BroadcastAlertDbModel>> {
            behave(self.behavior).await?;
            // Deliberately unscoped so the aggregator's own visibility check is exercised.
            Ok(self.rows.clone())
        }
        async fn get(&self, _r: &str, _c: &[String], id: i64) -> Result<BroadcastAlertDbModel> {
            Err(Error::not_found("BroadcastAlert", id.to_string()))
        }
        async fn mark_read(&self, _r: &str, _c: &[String], _ids: &[i64]) -> Result<u64> {
            Ok(0)
        }
        async fn mark_all_read(&self, _r: &str, _c: &[String]) -> Result<u64> {
            Ok(0)
        }
        async fn mark_processed(&self, _r: &str, _c: &[String], _id: i64) -> Result<u64> {
            Ok(0)
        }
        async fn delete(&self, _r: &str, _c: &[String], _s: &DeleteScope) -> Result<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    pub struct FakeChat {
        pub rows: Vec<ChatUnreadDbModel>,
        pub behavior: Behavior,
    }

    #[async_trait]
    impl ChatUnreadRepository for FakeChat {
        async fn list_unread(&self, recipient: &str, _limit: i64) -> Result<Vec<ChatUnreadDbModel>> {
            behave(self.behavior).await?;
            Ok(self.rows.iter().filter(|r| r.recipient_id == recipient).cloned().collect())
        }
    }

    #[derive(Default)]
    pub struct FakeFriend {
        pub rows: Vec<FriendRequestDbModel>,
        pub behavior: Behavior,
    }

    #[async_trait]
    impl FriendRequestRepository for FakeFriend {
        async fn list_pending(&self, addressee: &str, _limit: i64) -> Result<Vec<FriendRequestDbModel>> {
            behave(self.behavior).await?;
            Ok(self.rows.iter().filter(|r| r.addressee_id == addressee).cloned().collect())
        }
    }
}
