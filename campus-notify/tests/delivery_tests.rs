//! Delivery manager behaviour with scripted channels on a paused clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

use campus_notify::client::delivery::{
    ChannelKind, ConnectionStatus, DeliveryChannel, DeliveryConfig, Inbound, PollChannel,
    PollScheduleConfig,
};
use campus_notify::client::{
    CacheEvent, ClientSession, NotificationApi, RemoteUpdate, SessionConfig,
};
use campus_notify::domain::{
    ActionState, BackoffPolicy, CompositeKey, EnvelopePayload, EventSource, FeedCounts, FeedQuery,
    NotificationEnvelope, Severity, TargetScope,
};
use campus_notify::notification::{DeleteTarget, Feed};
use campus_notify::{Error, Result};

fn envelope(source: EventSource, id: &str) -> NotificationEnvelope {
    NotificationEnvelope {
        key: CompositeKey::new(source, id),
        category: "general".to_string(),
        severity: Severity::Normal,
        is_read: false,
        action: ActionState::NotRequired,
        created_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        target: TargetScope::Identity("s-1".to_string()),
        payload: EnvelopePayload::default(),
    }
}

fn feed(envelopes: Vec<NotificationEnvelope>) -> Feed {
    Feed {
        counts: FeedCounts::from_envelopes(&envelopes),
        total: envelopes.len(),
        envelopes,
        degraded: vec![],
    }
}

/// Counts fetches and serves a fixed feed.
#[derive(Default)]
struct CountingApi {
    feed: Mutex<Feed>,
    fetches: AtomicUsize,
}

impl CountingApi {
    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationApi for CountingApi {
    async fn fetch(&self, _query: &FeedQuery) -> Result<Feed> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.feed.lock().clone())
    }

    async fn mark_read(&self, keys: &[CompositeKey]) -> Result<u64> {
        Ok(keys.len() as u64)
    }

    async fn mark_all_read(&self) -> Result<u64> {
        Ok(0)
    }

    async fn mark_processed(&self, _key: &CompositeKey) -> Result<u64> {
        Ok(1)
    }

    async fn delete(&self, _target: &DeleteTarget) -> Result<u64> {
        Ok(1)
    }
}

/// Timer resolution slack.
const TICK: Duration = Duration::from_millis(5);

type InboundTx = mpsc::UnboundedSender<Result<Option<Inbound>>>;

/// What the scripted push channel was asked to do.
#[derive(Default)]
struct PushScript {
    /// Results for successive connects; once drained every connect uses `fallback`.
    connects: Mutex<VecDeque<bool>>,
    fallback: Mutex<bool>,
    attempts: Mutex<Vec<Instant>>,
    snapshot_requests: AtomicUsize,
    heartbeats: AtomicUsize,
}

impl PushScript {
    fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn succeeding() -> Arc<Self> {
        let script = Self::default();
        *script.fallback.lock() = true;
        Arc::new(script)
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

struct ScriptedPush {
    script: Arc<PushScript>,
    echo: InboundTx,
    inbound: mpsc::UnboundedReceiver<Result<Option<Inbound>>>,
}

impl ScriptedPush {
    fn new(script: Arc<PushScript>) -> (Self, InboundTx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let push = Self {
            script,
            echo: tx.clone(),
            inbound: rx,
        };
        (push, tx)
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedPush {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn connect(&mut self) -> Result<()> {
        self.script.attempts.lock().push(Instant::now());
        let ok = {
            let fallback = *self.script.fallback.lock();
            self.script.connects.lock().pop_front().unwrap_or(fallback)
        };
        if ok {
            Ok(())
        } else {
            Err(Error::channel("connection refused"))
        }
    }

    async fn next(&mut self) -> Result<Option<Inbound>> {
        match self.inbound.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn request_snapshot(&mut self) -> Result<()> {
        self.script.snapshot_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.script.heartbeats.fetch_add(1, Ordering::SeqCst);
        // The server answers every heartbeat.
        let _ = self.echo.send(Ok(Some(Inbound::Heartbeat)));
        Ok(())
    }

    async fn disconnect(&mut self) {}
}

fn config(backoff: BackoffPolicy) -> SessionConfig {
    SessionConfig {
        delivery: DeliveryConfig {
            backoff,
            poll: PollScheduleConfig {
                base_interval_ms: 30_000,
                max_interval_ms: 300_000,
                idle_threshold_ms: 600_000,
                idle_multiplier: 2.0,
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

fn start(
    config: SessionConfig,
    api: Arc<CountingApi>,
    script: Arc<PushScript>,
) -> (ClientSession, InboundTx) {
    let (push, tx) = ScriptedPush::new(script);
    let poll = PollChannel::new(api.clone());
    let session = ClientSession::start(config, api, Box::new(push), Box::new(poll));
    (session, tx)
}

async fn next_event_matching(
    events: &mut tokio::sync::broadcast::Receiver<CacheEvent>,
    wanted: impl Fn(&CacheEvent) -> bool,
) -> Option<CacheEvent> {
    loop {
        match tokio::time::timeout(Duration::from_secs(600), events.recv()).await {
            Ok(Ok(event)) if wanted(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            _ => return None,
        }
    }
}

mod fallback_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_becoming_visible_fetches_immediately() {
        let api = Arc::new(CountingApi::default());
        let backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(4))
            .with_max_attempts(0);
        let (session, _tx) = start(config(backoff), api.clone(), PushScript::failing());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(api.fetches(), 1, "push down, so polling starts at once");
        assert_eq!(session.status(), ConnectionStatus::Polling);

        session.set_visible(false);
        sleep(Duration::from_secs(300)).await;
        assert_eq!(api.fetches(), 1, "hidden surface does not poll");

        // The next regular poll would be 30s away; visibility does not wait.
        session.set_visible(true);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(api.fetches(), 2);

        session.logout().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_base_interval_while_push_is_down() {
        let api = Arc::new(CountingApi::default());
        let (session, _tx) = start(
            config(BackoffPolicy::default().with_max_attempts(0)),
            api.clone(),
            PushScript::failing(),
        );

        sleep(Duration::from_millis(100)).await;
        assert_eq!(api.fetches(), 1);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(api.fetches(), 2);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(api.fetches(), 3);

        session.logout().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_results_reach_the_cache() {
        let api = Arc::new(CountingApi::default());
        *api.feed.lock() = feed(vec![
            envelope(EventSource::DirectMessage, "1"),
            envelope(EventSource::ChatUnread, "1"),
        ]);
        let (session, _tx) = start(
            config(BackoffPolicy::default()),
            api.clone(),
            PushScript::failing(),
        );

        sleep(Duration::from_millis(100)).await;
        assert_eq!(session.cache().len(), 2);
        assert_eq!(session.cache().total_unread(), 2);

        session.logout().await;
    }
}

mod push_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_connected_push_suppresses_polling() {
        let api = Arc::new(CountingApi::default());
        let script = PushScript::succeeding();
        let (session, _tx) = start(config(BackoffPolicy::default()), api.clone(), script.clone());

        // A poll may race the first connect; nothing polls once push is up.
        sleep(Duration::from_millis(10)).await;
        assert_eq!(session.status(), ConnectionStatus::Push);
        let baseline = api.fetches();
        assert!(baseline <= 1);

        sleep(Duration::from_secs(600)).await;

        assert_eq!(session.status(), ConnectionStatus::Push);
        assert_eq!(api.fetches(), baseline);
        assert_eq!(script.attempts().len(), 1);
        assert_eq!(script.snapshot_requests.load(Ordering::SeqCst), 1);
        // One heartbeat every 15s.
        assert!(script.heartbeats.load(Ordering::SeqCst) >= 39);

        session.logout().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushed_update_is_applied() {
        let api = Arc::new(CountingApi::default());
        let (session, tx) = start(
            config(BackoffPolicy::default()),
            api,
            PushScript::succeeding(),
        );
        let mut events = session.subscribe();
        sleep(Duration::from_millis(10)).await;

        tx.send(Ok(Some(Inbound::Update(RemoteUpdate::snapshot(feed(vec![
            envelope(EventSource::DirectMessage, "7"),
        ]))))))
        .unwrap();

        let event = next_event_matching(&mut events, |e| matches!(e, CacheEvent::Changed(_))).await;
        match event {
            Some(CacheEvent::Changed(counts)) => assert_eq!(counts.total_unread, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(
            session
                .cache()
                .get(&CompositeKey::new(EventSource::DirectMessage, "7"))
                .is_some()
        );

        session.logout().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_aggregation_failure_is_surfaced() {
        let api = Arc::new(CountingApi::default());
        let (session, tx) = start(
            config(BackoffPolicy::default()),
            api,
            PushScript::succeeding(),
        );
        let mut events = session.subscribe();
        sleep(Duration::from_millis(10)).await;

        tx.send(Ok(Some(Inbound::ServerError {
            code: "AGGREGATION_FAILED".to_string(),
            message: "no source reachable".to_string(),
        })))
        .unwrap();

        let event = next_event_matching(&mut events, |e| {
            matches!(e, CacheEvent::AggregationFailed { .. })
        })
        .await;
        assert!(event.is_some());

        session.logout().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_push_falls_back_to_polling() {
        let api = Arc::new(CountingApi::default());
        let script = PushScript::failing();
        *script.connects.lock() = VecDeque::from([true]);
        let (push, _tx) = ScriptedPush::new(script.clone());
        // Swallow heartbeats so the server looks silent.
        let silent = SilentPush(push);
        let poll = PollChannel::new(api.clone());
        let session = ClientSession::start(
            config(BackoffPolicy::default().with_max_attempts(0)),
            api.clone(),
            Box::new(silent),
            Box::new(poll),
        );

        sleep(Duration::from_secs(10)).await;
        assert_eq!(session.status(), ConnectionStatus::Push);
        let baseline = api.fetches();

        // 45s heartbeat timeout since connect.
        sleep(Duration::from_secs(40)).await;
        assert_eq!(session.status(), ConnectionStatus::Polling);
        assert!(api.fetches() > baseline);

        session.logout().await;
    }

    /// Connect never resolves, as with a blackholed server.
    struct HangingPush {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeliveryChannel for HangingPush {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Push
        }

        async fn connect(&mut self) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn next(&mut self) -> Result<Option<Inbound>> {
            std::future::pending().await
        }

        async fn request_snapshot(&mut self) -> Result<()> {
            Err(Error::channel("not connected"))
        }

        async fn heartbeat(&mut self) -> Result<()> {
            Err(Error::channel("not connected"))
        }

        async fn disconnect(&mut self) {}
    }

    fn start_hanging(api: Arc<CountingApi>, attempts: Arc<AtomicUsize>) -> ClientSession {
        let backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(1))
            .with_max_attempts(0);
        ClientSession::start(
            config(backoff),
            api.clone(),
            Box::new(HangingPush { attempts }),
            Box::new(PollChannel::new(api)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_connect_does_not_block_polling() {
        let api = Arc::new(CountingApi::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let session = start_hanging(api.clone(), attempts.clone());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(api.fetches(), 1, "polling covers the connect attempt");
        assert_eq!(session.status(), ConnectionStatus::Polling);

        session.set_visible(false);
        sleep(Duration::from_millis(100)).await;
        session.set_visible(true);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(api.fetches(), 2, "becoming visible fetches during a connect");

        // The 10s connect timeout fires and the next attempt follows the backoff.
        sleep(Duration::from_secs(12)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let started = Instant::now();
        session.logout().await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_connect_is_prompt() {
        let api = Arc::new(CountingApi::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let session = start_hanging(api.clone(), attempts);
        let mut status = session.connection_status();
        sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        session.logout().await;
        assert!(started.elapsed() < Duration::from_millis(100));
        status.changed().await.ok();
        assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
    }

    struct SilentPush(ScriptedPush);

    #[async_trait]
    impl DeliveryChannel for SilentPush {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Push
        }

        async fn connect(&mut self) -> Result<()> {
            self.0.connect().await
        }

        async fn next(&mut self) -> Result<Option<Inbound>> {
            std::future::pending().await
        }

        async fn request_snapshot(&mut self) -> Result<()> {
            self.0.request_snapshot().await
        }

        async fn heartbeat(&mut self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) {}
    }
}

mod backoff_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delays_grow_within_bounds_then_give_up() {
        let api = Arc::new(CountingApi::default());
        let script = PushScript::failing();
        let backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(4))
            .with_max_attempts(5);
        let (session, _tx) = start(config(backoff), api, script.clone());
        let mut events = session.subscribe();

        let event =
            next_event_matching(&mut events, |e| matches!(e, CacheEvent::DeliveryUnavailable))
                .await;
        assert!(event.is_some());

        // One initial attempt plus five retries.
        let attempts = script.attempts();
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] >= pair[0], "delays must not shrink: {:?}", gaps);
        }
        assert!(gaps.iter().all(|gap| *gap <= Duration::from_secs(4) + TICK));
        assert!(gaps[0] >= Duration::from_secs(1) && gaps[0] <= Duration::from_secs(1) + TICK);

        // Polling remains the delivery path.
        sleep(Duration::from_secs(60)).await;
        assert_eq!(script.attempts().len(), 6);
        assert_eq!(session.status(), ConnectionStatus::Polling);

        session.logout().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_successful_connect() {
        let api = Arc::new(CountingApi::default());
        let script = PushScript::succeeding();
        *script.connects.lock() = VecDeque::from([false, false, true]);
        let backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30))
            .with_max_attempts(0);
        let (session, tx) = start(config(backoff), api, script.clone());

        // Attempts at 0s, 1s and 3s; the third succeeds.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(script.attempts().len(), 3);
        assert_eq!(session.status(), ConnectionStatus::Push);

        let closed_at = Instant::now();
        tx.send(Ok(None)).unwrap();
        sleep(Duration::from_secs(2)).await;

        let attempts = script.attempts();
        assert_eq!(attempts.len(), 4);
        let delay = attempts[3] - closed_at;
        assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(1) + TICK);

        session.logout().await;
    }
}

mod session_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_cache_and_disconnects() {
        let api = Arc::new(CountingApi::default());
        *api.feed.lock() = feed(vec![envelope(EventSource::DirectMessage, "1")]);
        let (session, _tx) = start(
            config(BackoffPolicy::default()),
            api.clone(),
            PushScript::failing(),
        );
        let mut status = session.connection_status();
        let cache = session.cache().clone();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 1);

        session.logout().await;
        assert!(cache.is_empty());
        assert_eq!(cache.total_unread(), 0);
        status.changed().await.ok();
        assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);

        // Nothing polls after logout.
        let fetches = api.fetches();
        sleep(Duration::from_secs(300)).await;
        assert_eq!(api.fetches(), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_refresh_while_polling_fetches_now() {
        let api = Arc::new(CountingApi::default());
        let (session, _tx) = start(
            config(BackoffPolicy::default().with_max_attempts(0)),
            api.clone(),
            PushScript::failing(),
        );
        sleep(Duration::from_millis(100)).await;
        assert_eq!(api.fetches(), 1);

        assert!(session.refresh(campus_notify::client::RefreshReason::UserAction));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(api.fetches(), 2);

        session.logout().await;
    }
}
