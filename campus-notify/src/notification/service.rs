//! Notification service implementation.
//!
//! The NotificationService is the server-side facade over the event sources:
//! - Aggregated, visibility-filtered feed reads
//! - Read/processed/delete mutations routed to the owning source
//! - Change signals fanned out to live push sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::aggregator::{Aggregator, AggregatorConfig, EventSources, Feed};
use super::events::{FeedSignal, category_spellings};
use super::visibility::viewer_categories;
use crate::database::repositories::DeleteScope;
use crate::domain::{CompositeKey, EventSource, FeedCounts, FeedKind, FeedQuery, Viewer};
use crate::{Error, Result};

/// Configuration for the notification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationServiceConfig {
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    /// Capacity of the change-signal broadcast channel.
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,
}

fn default_signal_capacity() -> usize {
    256
}

impl Default for NotificationServiceConfig {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            signal_capacity: default_signal_capacity(),
        }
    }
}

/// Target of a delete request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteTarget {
    Keys(Vec<CompositeKey>),
    /// Every mutable envelope the viewer can see.
    All,
}

/// Notification service statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStats {
    pub fetches: u64,
    pub partial_fetches: u64,
    pub failed_fetches: u64,
    pub mutations: u64,
    pub rejected_mutations: u64,
    pub signals: u64,
}

#[derive(Default)]
struct StatCounters {
    fetches: AtomicU64,
    partial_fetches: AtomicU64,
    failed_fetches: AtomicU64,
    mutations: AtomicU64,
    rejected_mutations: AtomicU64,
    signals: AtomicU64,
}

/// Mutable keys split by owning source.
#[derive(Debug, Default)]
struct KeyBatch {
    direct: Vec<i64>,
    broadcast: Vec<i64>,
}

impl KeyBatch {
    fn from_keys(keys: &[CompositeKey]) -> Result<Self> {
        let mut batch = Self::default();
        for key in keys {
            let id = native_id(key)?;
            match key.source() {
                EventSource::DirectMessage => batch.direct.push(id),
                EventSource::BroadcastAlert => batch.broadcast.push(id),
                source => {
                    return Err(Error::ReadOnlySource {
                        event_source: source,
                    });
                }
            }
        }
        batch.direct.sort_unstable();
        batch.direct.dedup();
        batch.broadcast.sort_unstable();
        batch.broadcast.dedup();
        Ok(batch)
    }
}

fn native_id(key: &CompositeKey) -> Result<i64> {
    if !key.source().is_mutable() {
        return Err(Error::ReadOnlySource {
            event_source: key.source(),
        });
    }
    key.id()
        .parse::<i64>()
        .map_err(|_| Error::validation(format!("Malformed id in key {}", key)))
}

/// The notification service.
pub struct NotificationService {
    aggregator: Aggregator,
    sources: EventSources,
    signal_tx: broadcast::Sender<FeedSignal>,
    stats: StatCounters,
}

impl NotificationService {
    pub fn new(sources: EventSources, config: NotificationServiceConfig) -> Self {
        let (signal_tx, _) = broadcast::channel(config.signal_capacity.max(1));
        Self {
            aggregator: Aggregator::new(sources.clone(), config.aggregator),
            sources,
            signal_tx,
            stats: StatCounters::default(),
        }
    }

    pub fn source_timeout(&self) -> Duration {
        self.aggregator.config().source_timeout()
    }

    /// Aggregated feed for `viewer`.
    pub async fn fetch(&self, viewer: &Viewer, query: &FeedQuery) -> Result<Feed> {
        self.record_fetch(self.aggregator.fetch(viewer, query).await)
    }

    /// Feed restricted to the sources delivered under `kind`.
    pub async fn fetch_kind(&self, viewer: &Viewer, kind: FeedKind) -> Result<Feed> {
        self.record_fetch(
            self.aggregator
                .fetch_sources(viewer, &FeedQuery::default(), kind.sources())
                .await,
        )
    }

    pub async fn counts(&self, viewer: &Viewer) -> Result<FeedCounts> {
        Ok(self.fetch(viewer, &FeedQuery::default()).await?.counts)
    }

    fn record_fetch(&self, result: Result<Feed>) -> Result<Feed> {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(feed) if feed.is_partial() => {
                self.stats.partial_fetches.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.failed_fetches.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
        }
        result
    }

    /// Mark envelopes read. Keys of read-only sources reject the whole call.
    pub async fn mark_read(&self, viewer: &Viewer, keys: &[CompositeKey]) -> Result<u64> {
        let batch = self.guard(KeyBatch::from_keys(keys))?;
        let mut affected = 0;
        if !batch.direct.is_empty() {
            affected += self
                .sources
                .direct
                .mark_read(&viewer.identity, &batch.direct)
                .await?;
        }
        if !batch.broadcast.is_empty() {
            affected += self
                .sources
                .broadcast
                .mark_read(&viewer.identity, &self.scope(viewer), &batch.broadcast)
                .await?;
        }
        self.after_mutation(viewer, "mark_read", affected);
        Ok(affected)
    }

    /// Mark every visible direct message and broadcast alert read. Idempotent.
    pub async fn mark_all_read(&self, viewer: &Viewer) -> Result<u64> {
        let direct = self.sources.direct.mark_all_read(&viewer.identity).await?;
        let broadcast = self
            .sources
            .broadcast
            .mark_all_read(&viewer.identity, &self.scope(viewer))
            .await?;
        let affected = direct + broadcast;
        self.after_mutation(viewer, "mark_all_read", affected);
        Ok(affected)
    }

    /// Mark an action-required envelope processed. Also marks it read.
    pub async fn mark_processed(&self, viewer: &Viewer, key: &CompositeKey) -> Result<u64> {
        let id = self.guard(native_id(key))?;
        let scope = self.scope(viewer);

        let (requires_action, category) = match key.source() {
            EventSource::DirectMessage => {
                let row = self.sources.direct.get(&viewer.identity, id).await?;
                (row.requires_action, None)
            }
            _ => {
                let row = self.sources.broadcast.get(&viewer.identity, &scope, id).await?;
                (row.requires_action, row.target_id.is_none().then_some(row.category))
            }
        };
        if !requires_action {
            self.stats.rejected_mutations.fetch_add(1, Ordering::Relaxed);
            return Err(Error::validation(format!("{} does not require action", key)));
        }

        let affected = match key.source() {
            EventSource::DirectMessage => {
                self.sources
                    .direct
                    .mark_processed(&viewer.identity, id)
                    .await?
            }
            _ => {
                self.sources
                    .broadcast
                    .mark_processed(&viewer.identity, &scope, id)
                    .await?
            }
        };
        self.after_mutation(viewer, "mark_processed", affected);
        // Broadcast state is shared per record; other reviewers must converge too.
        if let Some(category) = category {
            self.signal(FeedSignal::for_category(category));
        }
        Ok(affected)
    }

    pub async fn delete(&self, viewer: &Viewer, target: &DeleteTarget) -> Result<u64> {
        let scope = self.scope(viewer);
        let affected = match target {
            DeleteTarget::All => {
                let direct = self
                    .sources
                    .direct
                    .delete(&viewer.identity, &DeleteScope::All)
                    .await?;
                let broadcast = self
                    .sources
                    .broadcast
                    .delete(&viewer.identity, &scope, &DeleteScope::All)
                    .await?;
                direct + broadcast
            }
            DeleteTarget::Keys(keys) => {
                let batch = self.guard(KeyBatch::from_keys(keys))?;
                let mut affected = 0;
                if !batch.direct.is_empty() {
                    affected += self
                        .sources
                        .direct
                        .delete(&viewer.identity, &DeleteScope::Ids(batch.direct))
                        .await?;
                }
                if !batch.broadcast.is_empty() {
                    affected += self
                        .sources
                        .broadcast
                        .delete(&viewer.identity, &scope, &DeleteScope::Ids(batch.broadcast))
                        .await?;
                }
                affected
            }
        };
        self.after_mutation(viewer, "delete", affected);
        Ok(affected)
    }

    /// Publish a change signal. Returns the number of live subscribers.
    pub fn signal(&self, signal: FeedSignal) -> usize {
        self.stats.signals.fetch_add(1, Ordering::Relaxed);
        match self.signal_tx.send(signal) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(signal)) => {
                debug!(?signal, "No live sessions for feed signal");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedSignal> {
        self.signal_tx.subscribe()
    }

    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            fetches: self.stats.fetches.load(Ordering::Relaxed),
            partial_fetches: self.stats.partial_fetches.load(Ordering::Relaxed),
            failed_fetches: self.stats.failed_fetches.load(Ordering::Relaxed),
            mutations: self.stats.mutations.load(Ordering::Relaxed),
            rejected_mutations: self.stats.rejected_mutations.load(Ordering::Relaxed),
            signals: self.stats.signals.load(Ordering::Relaxed),
        }
    }

    fn scope(&self, viewer: &Viewer) -> Vec<String> {
        category_spellings(viewer_categories(viewer))
    }

    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.stats.rejected_mutations.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Rejected notification mutation");
        }
        result
    }

    fn after_mutation(&self, viewer: &Viewer, operation: &str, affected: u64) {
        self.stats.mutations.fetch_add(1, Ordering::Relaxed);
        info!(
            viewer = %viewer.identity,
            operation,
            affected,
            "Notification mutation applied"
        );
        self.signal(FeedSignal::for_identity(
            viewer.identity.clone(),
            FeedKind::Notification,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{BroadcastAlertDbModel, DirectMessageDbModel};
    use crate::database::repositories::{SqlxBroadcastAlertRepository, SqlxDirectMessageRepository};
    use crate::database::{DbPool, init_pool_with_size, run_migrations};
    use crate::domain::Role;

    async fn setup() -> (NotificationService, DbPool) {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let service = NotificationService::new(
            EventSources::sqlite(pool.clone()),
            NotificationServiceConfig::default(),
        );
        (service, pool)
    }

    #[tokio::test]
    async fn test_read_only_sources_are_rejected() {
        let (service, _pool) = setup().await;
        let viewer = Viewer::new("s-1", Role::Student);
        let key = CompositeKey::new(EventSource::ChatUnread, "1");

        let err = service.mark_read(&viewer, &[key]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ReadOnlySource {
                event_source: EventSource::ChatUnread
            }
        ));
        assert_eq!(service.stats().rejected_mutations, 1);
    }

    #[tokio::test]
    async fn test_mark_processed_requires_action() {
        let (service, pool) = setup().await;
        let repo = SqlxDirectMessageRepository::new(pool);
        let id = repo
            .create(&DirectMessageDbModel::new("a-1", "general", "fyi"))
            .await
            .unwrap();
        let viewer = Viewer::new("a-1", Role::Admin);
        let key = CompositeKey::new(EventSource::DirectMessage, id.to_string());

        let err = service.mark_processed(&viewer, &key).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_mutation_emits_signal_for_actor() {
        let (service, pool) = setup().await;
        let repo = SqlxBroadcastAlertRepository::new(pool);
        let mut alert = BroadcastAlertDbModel::broadcast("account_change_request", "approve");
        alert.requires_action = true;
        let id = repo.create(&alert).await.unwrap();

        let mut rx = service.subscribe();
        let viewer = Viewer::new("a-1", Role::Admin);
        let key = CompositeKey::new(EventSource::BroadcastAlert, id.to_string());
        assert_eq!(service.mark_processed(&viewer, &key).await.unwrap(), 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first, FeedSignal::for_identity("a-1", FeedKind::Notification));
        let second = rx.recv().await.unwrap();
        assert_eq!(second, FeedSignal::for_category("account_change_request"));

        let feed = service.fetch(&viewer, &FeedQuery::default()).await.unwrap();
        assert!(feed.envelopes[0].is_processed());
        assert!(feed.envelopes[0].is_read);
    }

    #[tokio::test]
    async fn test_malformed_id_is_validation_error() {
        let (service, _pool) = setup().await;
        let viewer = Viewer::new("a-1", Role::Admin);
        let key = CompositeKey::new(EventSource::DirectMessage, "abc");
        let err = service
            .delete(&viewer, &DeleteTarget::Keys(vec![key]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
