//! Client reconciliation cache.
//!
//! Holds the last reconciled set of visible envelopes for one session,
//! merges every push or poll result by composite key, and applies local
//! mutations optimistically before the server confirms them. Counters are
//! always recomputed from the held set.
//!
//! The cache also owns the session's publish/subscribe surface: producers
//! call typed methods ([`ReconciliationCache::request_refresh`] and friends)
//! and consumers receive [`CacheEvent`]s.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::refresh::{RefreshGate, RefreshReason};
use super::remote::NotificationApi;
use crate::domain::{
    ActionState, CompositeKey, EventSource, FeedCounts, FeedKind, NotificationEnvelope,
    SortDirection, SortKey,
};
use crate::notification::aggregator::sort_envelopes;
use crate::notification::{DeleteTarget, Feed, ServerMessage, UpdateScope};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum time between non-forced refreshes.
    #[serde(default = "default_min_refresh_interval_ms")]
    pub min_refresh_interval_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_min_refresh_interval_ms() -> u64 {
    2_000
}

fn default_event_capacity() -> usize {
    64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval_ms: default_min_refresh_interval_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// What the presentation layer hears about.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// The visible set changed; carries the recomputed counters.
    Changed(FeedCounts),
    /// A refresh passed the gate and should be performed.
    RefreshRequested(RefreshReason),
    /// An optimistic mutation was rolled back.
    MutationFailed { target: String, message: String },
    /// Every source failed on the server.
    AggregationFailed { message: String },
    /// Push reconnects were exhausted; polling is the only delivery path.
    DeliveryUnavailable,
}

/// An inbound envelope set, from either channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteUpdate {
    pub scope: UpdateScope,
    pub kind: FeedKind,
    pub envelopes: Vec<NotificationEnvelope>,
    /// Sources that failed upstream; their cached envelopes are kept.
    pub degraded: Vec<EventSource>,
}

impl RemoteUpdate {
    pub fn snapshot(feed: Feed) -> Self {
        Self {
            scope: UpdateScope::Snapshot,
            kind: FeedKind::Notification,
            degraded: feed.degraded.iter().map(|f| f.source).collect(),
            envelopes: feed.envelopes,
        }
    }

    /// Envelope-carrying frames only; heartbeats and errors yield `None`.
    pub fn from_server(message: ServerMessage) -> Option<Self> {
        let (kind, scope, envelopes, degraded) = match message {
            ServerMessage::Notification {
                scope,
                envelopes,
                degraded,
            } => (FeedKind::Notification, scope, envelopes, degraded),
            ServerMessage::Chat {
                scope,
                envelopes,
                degraded,
            } => (FeedKind::Chat, scope, envelopes, degraded),
            ServerMessage::FriendRequest {
                scope,
                envelopes,
                degraded,
            } => (FeedKind::FriendRequest, scope, envelopes, degraded),
            ServerMessage::Heartbeat { .. } | ServerMessage::Error { .. } => return None,
        };
        Some(Self {
            scope,
            kind,
            envelopes,
            degraded,
        })
    }

    /// Sources whose cached envelopes this update replaces.
    fn replaced_sources(&self) -> BTreeSet<EventSource> {
        let covered: &[EventSource] = match self.scope {
            UpdateScope::Snapshot => &EventSource::ALL,
            UpdateScope::Slice => self.kind.sources(),
        };
        covered
            .iter()
            .copied()
            .filter(|source| !self.degraded.contains(source))
            .collect()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeMap<CompositeKey, NotificationEnvelope>,
    /// Locally deleted keys; blocks stale updates from resurrecting them.
    tombstones: BTreeSet<CompositeKey>,
    /// Keys the server has reported read or processed. A rollback never
    /// undoes these.
    confirmed_read: BTreeSet<CompositeKey>,
    confirmed_processed: BTreeSet<CompositeKey>,
    counts: FeedCounts,
}

impl CacheState {
    fn recount(&mut self) -> FeedCounts {
        self.counts = FeedCounts::from_envelopes(self.entries.values());
        self.counts.clone()
    }
}

/// How to undo one optimistic change.
enum Undo {
    /// Restore read/action flags if the entry is still present.
    Flags(NotificationEnvelope),
    /// Put a deleted entry back.
    Reinsert(NotificationEnvelope),
}

pub struct ReconciliationCache {
    api: Arc<dyn NotificationApi>,
    state: RwLock<CacheState>,
    gate: RefreshGate,
    events: broadcast::Sender<CacheEvent>,
}

impl ReconciliationCache {
    /// An empty cache.
    pub fn new(api: Arc<dyn NotificationApi>, config: &CacheConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            api,
            state: RwLock::new(CacheState::default()),
            gate: RefreshGate::new(Duration::from_millis(config.min_refresh_interval_ms)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Merge an inbound update. Returns whether the visible set changed.
    pub fn apply_remote(&self, update: RemoteUpdate) -> bool {
        let counts = {
            let mut state = self.state.write();
            let replaced = update.replaced_sources();

            let mut next: BTreeMap<CompositeKey, NotificationEnvelope> = state
                .entries
                .iter()
                .filter(|(key, _)| !replaced.contains(&key.source()))
                .map(|(key, envelope)| (key.clone(), envelope.clone()))
                .collect();

            let mut reported = BTreeSet::new();
            for mut envelope in update.envelopes {
                if !replaced.contains(&envelope.source()) {
                    continue;
                }
                reported.insert(envelope.key.clone());
                if state.tombstones.contains(&envelope.key) {
                    continue;
                }
                if envelope.is_read {
                    state.confirmed_read.insert(envelope.key.clone());
                }
                if envelope.action == ActionState::Processed {
                    state.confirmed_processed.insert(envelope.key.clone());
                }
                if let Some(previous) = state.entries.get(&envelope.key) {
                    merge_monotonic(&mut envelope, previous);
                }
                next.insert(envelope.key.clone(), envelope);
            }

            // The server no longer reports these; the delete has settled.
            state
                .tombstones
                .retain(|key| !replaced.contains(&key.source()) || reported.contains(key));
            state.confirmed_read.retain(|key| next.contains_key(key));
            state.confirmed_processed.retain(|key| next.contains_key(key));

            if next == state.entries {
                debug!(kind = %update.kind, "Remote update left the visible set unchanged");
                return false;
            }
            state.entries = next;
            state.recount()
        };

        self.emit(CacheEvent::Changed(counts));
        true
    }

    /// Optimistically mark one envelope read.
    pub async fn mark_read(&self, key: &CompositeKey) -> Result<()> {
        ensure_mutable(key)?;
        let (undo, counts) = {
            let mut state = self.state.write();
            let envelope = state
                .entries
                .get_mut(key)
                .ok_or_else(|| Error::not_found("Notification", key.to_string()))?;
            if envelope.is_read {
                return Ok(());
            }
            let undo = Undo::Flags(envelope.clone());
            envelope.is_read = true;
            (vec![undo], state.recount())
        };
        self.emit(CacheEvent::Changed(counts));

        match self.api.mark_read(std::slice::from_ref(key)).await {
            Ok(_) => {
                self.request_refresh(RefreshReason::Mutation);
                Ok(())
            }
            Err(e) => Err(self.roll_back(undo, key.to_string(), e)),
        }
    }

    /// Optimistically mark every cached mutable envelope read.
    pub async fn mark_all_read(&self) -> Result<()> {
        let (undo, counts) = {
            let mut state = self.state.write();
            let mut undo = Vec::new();
            for envelope in state.entries.values_mut() {
                if envelope.source().is_mutable() && !envelope.is_read {
                    undo.push(Undo::Flags(envelope.clone()));
                    envelope.is_read = true;
                }
            }
            let counts = (!undo.is_empty()).then(|| state.recount());
            (undo, counts)
        };
        if let Some(counts) = counts {
            self.emit(CacheEvent::Changed(counts));
        }

        // Sent even when nothing is cached as unread: the server may hold
        // unread envelopes beyond the fetch window.
        match self.api.mark_all_read().await {
            Ok(_) => {
                self.request_refresh(RefreshReason::Mutation);
                Ok(())
            }
            Err(e) => Err(self.roll_back(undo, "all".to_string(), e)),
        }
    }

    /// Optimistically mark an action-required envelope processed (and read).
    pub async fn mark_processed(&self, key: &CompositeKey) -> Result<()> {
        ensure_mutable(key)?;
        let (undo, counts) = {
            let mut state = self.state.write();
            let envelope = state
                .entries
                .get_mut(key)
                .ok_or_else(|| Error::not_found("Notification", key.to_string()))?;
            match envelope.action {
                ActionState::NotRequired => {
                    return Err(Error::validation(format!("{} does not require action", key)));
                }
                ActionState::Processed => return Ok(()),
                ActionState::Pending => {}
            }
            let undo = Undo::Flags(envelope.clone());
            envelope.action = ActionState::Processed;
            envelope.is_read = true;
            (vec![undo], state.recount())
        };
        self.emit(CacheEvent::Changed(counts));

        match self.api.mark_processed(key).await {
            Ok(_) => {
                self.request_refresh(RefreshReason::Mutation);
                Ok(())
            }
            Err(e) => Err(self.roll_back(undo, key.to_string(), e)),
        }
    }

    /// Optimistically delete one envelope.
    pub async fn delete(&self, key: &CompositeKey) -> Result<()> {
        ensure_mutable(key)?;
        let (undo, counts) = {
            let mut state = self.state.write();
            let envelope = state
                .entries
                .remove(key)
                .ok_or_else(|| Error::not_found("Notification", key.to_string()))?;
            state.tombstones.insert(key.clone());
            (vec![Undo::Reinsert(envelope)], state.recount())
        };
        self.emit(CacheEvent::Changed(counts));

        match self
            .api
            .delete(&DeleteTarget::Keys(vec![key.clone()]))
            .await
        {
            Ok(_) => {
                self.request_refresh(RefreshReason::Mutation);
                Ok(())
            }
            Err(e) => Err(self.roll_back(undo, key.to_string(), e)),
        }
    }

    /// Optimistically delete every cached mutable envelope.
    pub async fn delete_all(&self) -> Result<()> {
        let (undo, counts) = {
            let mut state = self.state.write();
            let keys: Vec<CompositeKey> = state
                .entries
                .keys()
                .filter(|key| key.source().is_mutable())
                .cloned()
                .collect();
            let mut undo = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(envelope) = state.entries.remove(&key) {
                    undo.push(Undo::Reinsert(envelope));
                    state.tombstones.insert(key);
                }
            }
            let counts = (!undo.is_empty()).then(|| state.recount());
            (undo, counts)
        };
        if let Some(counts) = counts {
            self.emit(CacheEvent::Changed(counts));
        }

        match self.api.delete(&DeleteTarget::All).await {
            Ok(_) => {
                self.request_refresh(RefreshReason::Mutation);
                Ok(())
            }
            Err(e) => Err(self.roll_back(undo, "all".to_string(), e)),
        }
    }

    /// Ask for a refresh. Returns whether it passed the coalescing gate.
    pub fn request_refresh(&self, reason: RefreshReason) -> bool {
        if self.gate.try_acquire(reason) {
            self.emit(CacheEvent::RefreshRequested(reason));
            true
        } else {
            debug!(%reason, "Refresh request coalesced");
            false
        }
    }

    pub fn report_aggregation_failure(&self, message: impl Into<String>) {
        self.emit(CacheEvent::AggregationFailed {
            message: message.into(),
        });
    }

    pub fn report_delivery_unavailable(&self) {
        self.emit(CacheEvent::DeliveryUnavailable);
    }

    pub fn counts(&self) -> FeedCounts {
        self.state.read().counts.clone()
    }

    pub fn total_unread(&self) -> usize {
        self.state.read().counts.total_unread
    }

    pub fn unread_in_category(&self, category: &str) -> usize {
        self.state
            .read()
            .counts
            .unread_by_category
            .get(category)
            .copied()
            .unwrap_or(0)
    }

    pub fn get(&self, key: &CompositeKey) -> Option<NotificationEnvelope> {
        self.state.read().entries.get(key).cloned()
    }

    /// Cached envelopes, newest first.
    pub fn envelopes(&self) -> Vec<NotificationEnvelope> {
        let mut envelopes: Vec<_> = self.state.read().entries.values().cloned().collect();
        sort_envelopes(&mut envelopes, SortKey::CreatedAt, SortDirection::Desc);
        envelopes
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Drop everything. Used on logout.
    pub fn clear(&self) {
        let was_empty = {
            let mut state = self.state.write();
            let was_empty = state.entries.is_empty();
            *state = CacheState::default();
            was_empty
        };
        self.gate.reset();
        if !was_empty {
            self.emit(CacheEvent::Changed(FeedCounts::default()));
        }
    }

    fn roll_back(&self, undo: Vec<Undo>, target: String, err: Error) -> Error {
        let counts = {
            let mut state = self.state.write();
            for step in undo {
                match step {
                    Undo::Flags(previous) => {
                        let read_confirmed = state.confirmed_read.contains(&previous.key);
                        let processed_confirmed =
                            state.confirmed_processed.contains(&previous.key);
                        if let Some(current) = state.entries.get_mut(&previous.key) {
                            if !read_confirmed {
                                current.is_read = previous.is_read;
                            }
                            if !processed_confirmed {
                                current.action = previous.action;
                            }
                        }
                    }
                    Undo::Reinsert(previous) => {
                        state.tombstones.remove(&previous.key);
                        state
                            .entries
                            .entry(previous.key.clone())
                            .or_insert(previous);
                    }
                }
            }
            state.recount()
        };

        let message = err.to_string();
        warn!(target = %target, error = %message, "Optimistic mutation rolled back");
        self.emit(CacheEvent::Changed(counts));
        self.emit(CacheEvent::MutationFailed {
            target: target.clone(),
            message: message.clone(),
        });
        Error::MutationRejected { target, message }
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn ensure_mutable(key: &CompositeKey) -> Result<()> {
    if key.source().is_mutable() {
        Ok(())
    } else {
        Err(Error::ReadOnlySource {
            event_source: key.source(),
        })
    }
}

/// Read and processed never regress through a remote merge.
fn merge_monotonic(incoming: &mut NotificationEnvelope, previous: &NotificationEnvelope) {
    incoming.is_read |= previous.is_read;
    if previous.action == ActionState::Processed && incoming.action == ActionState::Pending {
        incoming.action = ActionState::Processed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::remote::fakes::FakeApi;
    use crate::domain::envelope::fixtures::envelope;
    use crate::error::SourceFailure;
    use std::sync::atomic::Ordering;

    fn setup() -> (Arc<FakeApi>, ReconciliationCache) {
        let api = Arc::new(FakeApi::default());
        let cache = ReconciliationCache::new(api.clone(), &CacheConfig::default());
        (api, cache)
    }

    fn snapshot(envelopes: Vec<NotificationEnvelope>) -> RemoteUpdate {
        RemoteUpdate::snapshot(Feed {
            envelopes,
            ..Default::default()
        })
    }

    fn key(source: EventSource, id: &str) -> CompositeKey {
        CompositeKey::new(source, id)
    }

    fn seeded() -> Vec<NotificationEnvelope> {
        vec![
            envelope(EventSource::DirectMessage, "1", "system_error"),
            envelope(EventSource::BroadcastAlert, "1", "system_error"),
            envelope(EventSource::ChatUnread, "1", "chat_message"),
        ]
    }

    #[test]
    fn test_apply_remote_reports_changes_only() {
        let (_, cache) = setup();
        let mut events = cache.subscribe();

        assert!(cache.apply_remote(snapshot(seeded())));
        assert!(!cache.apply_remote(snapshot(seeded())));

        assert!(matches!(events.try_recv(), Ok(CacheEvent::Changed(_))));
        assert!(events.try_recv().is_err());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.total_unread(), 3);
        assert_eq!(cache.unread_in_category("system_error"), 2);
    }

    #[test]
    fn test_same_id_different_source_are_distinct() {
        let (_, cache) = setup();
        cache.apply_remote(snapshot(seeded()));
        assert!(cache.get(&key(EventSource::DirectMessage, "1")).is_some());
        assert!(cache.get(&key(EventSource::BroadcastAlert, "1")).is_some());
    }

    #[test]
    fn test_slice_replaces_only_its_sources() {
        let (_, cache) = setup();
        cache.apply_remote(snapshot(seeded()));

        let slice = RemoteUpdate {
            scope: UpdateScope::Slice,
            kind: FeedKind::Chat,
            envelopes: vec![envelope(EventSource::ChatUnread, "2", "chat_message")],
            degraded: vec![],
        };
        assert!(cache.apply_remote(slice));

        assert!(cache.get(&key(EventSource::ChatUnread, "1")).is_none());
        assert!(cache.get(&key(EventSource::ChatUnread, "2")).is_some());
        assert!(cache.get(&key(EventSource::DirectMessage, "1")).is_some());
    }

    #[test]
    fn test_degraded_source_keeps_cached_envelopes() {
        let (_, cache) = setup();
        cache.apply_remote(snapshot(seeded()));

        let partial = RemoteUpdate::snapshot(Feed {
            envelopes: vec![envelope(EventSource::DirectMessage, "1", "system_error")],
            degraded: vec![SourceFailure {
                source: EventSource::ChatUnread,
                reason: "timeout".to_string(),
            }],
            ..Default::default()
        });
        cache.apply_remote(partial);

        assert!(cache.get(&key(EventSource::ChatUnread, "1")).is_some());
        assert!(cache.get(&key(EventSource::BroadcastAlert, "1")).is_none());
    }

    #[test]
    fn test_read_state_never_regresses_through_merge() {
        let (_, cache) = setup();
        let mut read = envelope(EventSource::DirectMessage, "1", "system_error");
        read.is_read = true;
        cache.apply_remote(snapshot(vec![read]));

        // A stale poll still reports it unread.
        cache.apply_remote(snapshot(vec![envelope(
            EventSource::DirectMessage,
            "1",
            "system_error",
        )]));
        assert!(cache.get(&key(EventSource::DirectMessage, "1")).unwrap().is_read);
        assert_eq!(cache.total_unread(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_is_optimistic_and_confirmed() {
        let (api, cache) = setup();
        cache.apply_remote(snapshot(seeded()));

        cache.mark_read(&key(EventSource::DirectMessage, "1")).await.unwrap();

        assert_eq!(cache.total_unread(), 2);
        assert_eq!(api.calls(), vec!["mark_read direct_message:1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_mark_read_rolls_back() {
        let (api, cache) = setup();
        cache.apply_remote(snapshot(seeded()));
        api.fail_mutations.store(true, Ordering::SeqCst);
        let mut events = cache.subscribe();

        let err = cache
            .mark_read(&key(EventSource::BroadcastAlert, "1"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MutationRejected { ref target, .. } if target == "broadcast_alert:1"));
        assert!(!cache.get(&key(EventSource::BroadcastAlert, "1")).unwrap().is_read);
        assert_eq!(cache.total_unread(), 3);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let CacheEvent::MutationFailed { target, .. } = event {
                assert_eq!(target, "broadcast_alert:1");
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_keeps_read_confirmed_by_server() {
        let (api, cache) = setup();
        cache.apply_remote(snapshot(seeded()));
        api.fail_mutations.store(true, Ordering::SeqCst);
        *api.delay.lock() = Some(Duration::from_secs(1));
        let target = key(EventSource::DirectMessage, "1");

        // Another tab marks it read while this round-trip is in flight.
        let confirm = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut envelopes = seeded();
            envelopes[0].is_read = true;
            cache.apply_remote(snapshot(envelopes));
        };
        let (result, ()) = tokio::join!(cache.mark_read(&target), confirm);

        assert!(matches!(result, Err(Error::MutationRejected { .. })));
        assert!(cache.get(&target).unwrap().is_read);
        assert_eq!(cache.total_unread(), 2);
    }

    #[tokio::test]
    async fn test_read_only_sources_are_rejected_locally() {
        let (api, cache) = setup();
        cache.apply_remote(snapshot(seeded()));

        let err = cache
            .mark_read(&key(EventSource::ChatUnread, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnlySource { .. }));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mark_all_read_twice_is_stable() {
        let (_, cache) = setup();
        cache.apply_remote(snapshot(seeded()));

        cache.mark_all_read().await.unwrap();
        let after_first = cache.counts();
        cache.mark_all_read().await.unwrap();

        assert_eq!(cache.counts(), after_first);
        // Chat unread is owned by the chat subsystem.
        assert_eq!(after_first.total_unread, 1);
        assert_eq!(after_first.system_unread, 0);
    }

    #[tokio::test]
    async fn test_deleted_key_is_not_resurrected_by_stale_update() {
        let (_, cache) = setup();
        cache.apply_remote(snapshot(seeded()));
        let target = key(EventSource::DirectMessage, "1");

        cache.delete(&target).await.unwrap();
        assert!(cache.get(&target).is_none());

        // Fetched before the delete landed.
        cache.apply_remote(snapshot(seeded()));
        assert!(cache.get(&target).is_none());

        // Once a snapshot omits it the delete has settled; a later report is a re-emission.
        let without: Vec<_> = seeded().into_iter().skip(1).collect();
        cache.apply_remote(snapshot(without));
        cache.apply_remote(snapshot(seeded()));
        assert!(cache.get(&target).is_some());
    }

    #[tokio::test]
    async fn test_failed_delete_restores_envelope() {
        let (api, cache) = setup();
        cache.apply_remote(snapshot(seeded()));
        api.fail_mutations.store(true, Ordering::SeqCst);

        assert!(cache.delete_all().await.is_err());
        assert_eq!(cache.len(), 3);
        assert_eq!(api.calls(), vec!["delete all".to_string()]);
    }

    #[tokio::test]
    async fn test_mark_processed_requires_action() {
        let (_, cache) = setup();
        let mut pending = envelope(EventSource::BroadcastAlert, "7", "account_change_request");
        pending.action = ActionState::Pending;
        cache.apply_remote(snapshot(vec![
            pending,
            envelope(EventSource::DirectMessage, "8", "system_error"),
        ]));

        cache
            .mark_processed(&key(EventSource::BroadcastAlert, "7"))
            .await
            .unwrap();
        let processed = cache.get(&key(EventSource::BroadcastAlert, "7")).unwrap();
        assert_eq!(processed.action, ActionState::Processed);
        assert!(processed.is_read);

        let err = cache
            .mark_processed(&key(EventSource::DirectMessage, "8"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_mutations_coalesce_refreshes() {
        let (_, cache) = setup();
        cache.apply_remote(snapshot(seeded()));
        let mut events = cache.subscribe();

        cache.mark_read(&key(EventSource::DirectMessage, "1")).await.unwrap();
        cache.mark_read(&key(EventSource::BroadcastAlert, "1")).await.unwrap();

        let refreshes = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, CacheEvent::RefreshRequested(_)))
            .count();
        assert_eq!(refreshes, 1);
    }

    #[test]
    fn test_clear_empties_cache() {
        let (_, cache) = setup();
        cache.apply_remote(snapshot(seeded()));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.counts(), FeedCounts::default());
    }
}
