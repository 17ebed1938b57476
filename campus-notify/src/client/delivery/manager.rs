//! Delivery channel manager.
//!
//! Owns the push and poll channels, keeps at most one of them active, and
//! feeds everything they deliver into the [`ReconciliationCache`].
//!
//! - Push connected: polling is fully suppressed and any in-flight poll is
//!   cancelled. A snapshot is requested right after every connect.
//! - Push down or still connecting: polling takes over at once and
//!   reconnects follow the backoff policy. Connects run on their own task so
//!   the loop keeps serving signals, polls and cancellation meanwhile. When attempts run out, polling stays the only path and
//!   the cache is told delivery is degraded.
//! - Surface hidden: polling pauses. Becoming visible fetches immediately.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::backoff::ReconnectBackoff;
use super::poll::{AdaptivePollSchedule, PollScheduleConfig};
use super::{
    AGGREGATION_FAILED, ChannelState, ConnectionStatus, DeliveryChannel, FETCH_FAILED, Inbound,
};
use crate::client::cache::{CacheEvent, ReconciliationCache};
use crate::client::refresh::RefreshReason;
use crate::domain::BackoffPolicy;
use crate::{Error, Result};

/// Delivery timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Interval between client heartbeats on the push channel.
    pub heartbeat_interval_ms: u64,
    /// Push silence after which the connection is considered lost.
    pub heartbeat_timeout_ms: u64,
    /// Upper bound for a single connect attempt.
    pub connect_timeout_ms: u64,
    pub backoff: BackoffPolicy,
    pub poll: PollScheduleConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            connect_timeout_ms: 10_000,
            backoff: BackoffPolicy::default(),
            poll: PollScheduleConfig::default(),
        }
    }
}

impl DeliveryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.max(self.heartbeat_interval_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// A connect attempt hands the channel back together with its outcome.
type ConnectTask = JoinHandle<(Box<dyn DeliveryChannel>, Result<()>)>;

/// Signals from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    VisibilityChanged(bool),
    Activity,
}

/// Handle to a running [`DeliveryManager`].
pub struct DeliveryHandle {
    signals: mpsc::UnboundedSender<SessionSignal>,
    status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DeliveryHandle {
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn set_visible(&self, visible: bool) {
        let _ = self.signals.send(SessionSignal::VisibilityChanged(visible));
    }

    pub fn record_activity(&self) {
        let _ = self.signals.send(SessionSignal::Activity);
    }

    /// Stop the manager and wait for both channels to close.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Delivery manager task failed");
        }
    }
}

pub struct DeliveryManager {
    config: DeliveryConfig,
    cache: Arc<ReconciliationCache>,
    /// `None` while a connect attempt owns the channel.
    push: Option<Box<dyn DeliveryChannel>>,
    poll: Box<dyn DeliveryChannel>,
    status: watch::Sender<ConnectionStatus>,

    push_state: ChannelState,
    connecting: Option<ConnectTask>,
    backoff: ReconnectBackoff,
    gave_up: bool,
    reconnect_at: Option<Instant>,
    schedule: AdaptivePollSchedule,
    next_poll_at: Option<Instant>,
    poll_pending: bool,
    next_heartbeat_at: Instant,
    last_inbound: Instant,
}

impl DeliveryManager {
    pub fn new(
        config: DeliveryConfig,
        cache: Arc<ReconciliationCache>,
        push: Box<dyn DeliveryChannel>,
        poll: Box<dyn DeliveryChannel>,
    ) -> (Self, watch::Receiver<ConnectionStatus>) {
        let (status, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let now = Instant::now();
        let manager = Self {
            backoff: ReconnectBackoff::new(config.backoff.clone()),
            schedule: AdaptivePollSchedule::new(config.poll.clone()),
            next_heartbeat_at: now + config.heartbeat_interval(),
            config,
            cache,
            push: Some(push),
            poll,
            status,
            push_state: ChannelState::Disconnected,
            connecting: None,
            gave_up: false,
            reconnect_at: None,
            next_poll_at: None,
            poll_pending: false,
            last_inbound: now,
        };
        (manager, status_rx)
    }

    /// Spawn the manager loop.
    pub fn spawn(
        config: DeliveryConfig,
        cache: Arc<ReconciliationCache>,
        push: Box<dyn DeliveryChannel>,
        poll: Box<dyn DeliveryChannel>,
    ) -> DeliveryHandle {
        let (manager, status) = Self::new(config, cache, push, poll);
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(manager.run(signal_rx, cancel.clone()));
        DeliveryHandle {
            signals,
            status,
            cancel,
            task,
        }
    }

    /// Run until cancelled or every signal sender is gone.
    pub async fn run(
        mut self,
        mut signal_rx: mpsc::UnboundedReceiver<SessionSignal>,
        cancel_token: CancellationToken,
    ) {
        let mut cache_events = self.cache.subscribe();
        self.start_connect();

        loop {
            let push_connected = self.push_state == ChannelState::Connected;
            let connecting = self.connecting.is_some();
            let reconnect_at = self.reconnect_at;
            let poll_at = if push_connected {
                None
            } else {
                self.next_poll_at
            };
            let heartbeat_at = self.next_heartbeat_at;
            let silence_at = self.last_inbound + self.config.heartbeat_timeout();

            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,

                signal = signal_rx.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },

                joined = join_connect(self.connecting.as_mut()), if connecting => {
                    self.connecting = None;
                    self.finish_connect(joined).await;
                }

                inbound = next_inbound(self.push.as_mut()), if push_connected => {
                    self.handle_push_inbound(inbound).await;
                }

                inbound = self.poll.next(), if !push_connected => {
                    self.handle_poll_inbound(inbound);
                }

                event = cache_events.recv() => match event {
                    Ok(CacheEvent::RefreshRequested(reason)) => self.refresh(reason).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Cache events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.start_connect();
                }

                _ = sleep_until(poll_at.unwrap_or_else(Instant::now)), if poll_at.is_some() => {
                    self.poll_now().await;
                }

                _ = sleep_until(silence_at), if push_connected => {
                    warn!(
                        timeout_ms = self.config.heartbeat_timeout_ms,
                        "Push channel silent past heartbeat timeout"
                    );
                    self.handle_push_lost().await;
                }

                _ = sleep_until(heartbeat_at), if push_connected => {
                    self.next_heartbeat_at = Instant::now() + self.config.heartbeat_interval();
                    if let Err(e) = self.send_heartbeat().await {
                        debug!(error = %e, "Heartbeat send failed");
                        self.handle_push_lost().await;
                    }
                }
            }
        }

        if let Some(task) = self.connecting.take() {
            debug!("Abandoning in-flight push connect");
            task.abort();
        }
        if let Some(push) = self.push.as_mut() {
            push.disconnect().await;
        }
        self.poll.disconnect().await;
        self.set_status(ConnectionStatus::Disconnected);
        debug!("Delivery manager stopped");
    }

    async fn handle_signal(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::VisibilityChanged(true) => {
                if self.schedule.set_visible(true) {
                    debug!("Surface visible");
                    self.refresh(RefreshReason::BecameVisible).await;
                }
            }
            SessionSignal::VisibilityChanged(false) => {
                if self.schedule.is_visible() {
                    debug!("Surface hidden, polling paused");
                }
                self.schedule.set_visible(false);
                self.next_poll_at = None;
            }
            SessionSignal::Activity => {
                self.schedule.record_activity();
                let due = Instant::now() + self.schedule.base_interval();
                if let Some(at) = self.next_poll_at
                    && at > due
                {
                    self.next_poll_at = Some(due);
                }
            }
        }
    }

    /// Hand the push channel to a connect task; the loop joins it later.
    fn start_connect(&mut self) {
        self.reconnect_at = None;
        if self.connecting.is_some() {
            return;
        }
        let Some(mut push) = self.push.take() else {
            self.fall_back_to_polling();
            return;
        };

        self.push_state = ChannelState::Connecting;
        debug!(attempt = self.backoff.attempts() + 1, "Connecting push channel");

        let connect_timeout = self.config.connect_timeout();
        self.connecting = Some(tokio::spawn(async move {
            let result = match timeout(connect_timeout, push.connect()).await {
                Ok(result) => result,
                Err(_) => Err(Error::channel("push connect timed out")),
            };
            (push, result)
        }));

        // Not connected yet, so polling covers the gap.
        self.fall_back_to_polling();
    }

    async fn finish_connect(
        &mut self,
        joined: std::result::Result<(Box<dyn DeliveryChannel>, Result<()>), JoinError>,
    ) {
        match joined {
            Ok((push, Ok(()))) => {
                self.push = Some(push);
                self.on_push_connected().await;
            }
            Ok((push, Err(e))) => {
                warn!(error = %e, attempt = self.backoff.attempts() + 1, "Push connect failed");
                self.push = Some(push);
                self.push_state = ChannelState::Disconnected;
                self.schedule_reconnect();
                self.fall_back_to_polling();
            }
            Err(e) => {
                // The channel went down with the task; polling is all that is left.
                warn!(error = %e, "Push connect task failed, polling only");
                self.push_state = ChannelState::Disconnected;
                if !self.gave_up {
                    self.gave_up = true;
                    self.cache.report_delivery_unavailable();
                }
                self.fall_back_to_polling();
            }
        }
    }

    fn connected_push(&mut self) -> Result<&mut Box<dyn DeliveryChannel>> {
        self.push
            .as_mut()
            .ok_or_else(|| Error::channel("push channel is connecting"))
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        self.connected_push()?.heartbeat().await
    }

    async fn request_push_snapshot(&mut self) -> Result<()> {
        self.connected_push()?.request_snapshot().await
    }

    async fn on_push_connected(&mut self) {
        info!("Push channel connected");
        self.push_state = ChannelState::Connected;
        self.backoff.reset();
        self.gave_up = false;

        // Results of a poll started while disconnected are stale now.
        self.poll.disconnect().await;
        self.next_poll_at = None;
        self.poll_pending = false;

        let now = Instant::now();
        self.last_inbound = now;
        self.next_heartbeat_at = now + self.config.heartbeat_interval();
        self.set_status(ConnectionStatus::Push);

        if let Err(e) = self.request_push_snapshot().await {
            debug!(error = %e, "Snapshot request after connect failed");
            self.handle_push_lost().await;
        }
    }

    async fn handle_push_lost(&mut self) {
        if self.push_state == ChannelState::Connected {
            info!("Push channel lost, falling back to polling");
        }
        if let Some(push) = self.push.as_mut() {
            push.disconnect().await;
        }
        self.push_state = ChannelState::Disconnected;
        self.schedule_reconnect();
        self.fall_back_to_polling();
    }

    fn schedule_reconnect(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    attempts = self.backoff.attempts(),
                    "Scheduling push reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                self.reconnect_at = None;
                if !self.gave_up {
                    warn!(
                        attempts = self.backoff.attempts(),
                        "Push reconnect attempts exhausted, polling only"
                    );
                    self.gave_up = true;
                    self.cache.report_delivery_unavailable();
                }
            }
        }
    }

    /// Start polling at once unless a poll is already scheduled or running.
    fn fall_back_to_polling(&mut self) {
        if *self.status.borrow() == ConnectionStatus::Push {
            self.set_status(ConnectionStatus::Polling);
        }
        if !self.poll_pending && self.next_poll_at.is_none() && self.schedule.is_visible() {
            self.next_poll_at = Some(Instant::now());
        }
    }

    async fn poll_now(&mut self) {
        self.next_poll_at = None;
        if !self.schedule.is_visible() {
            return;
        }
        match self.poll.request_snapshot().await {
            Ok(()) => self.poll_pending = true,
            Err(e) => {
                warn!(error = %e, "Poll request failed");
                self.schedule_next_poll();
            }
        }
    }

    fn schedule_next_poll(&mut self) {
        self.next_poll_at = self
            .schedule
            .next_interval()
            .map(|interval| Instant::now() + interval);
    }

    async fn refresh(&mut self, reason: RefreshReason) {
        if self.push_state == ChannelState::Connected {
            debug!(%reason, "Requesting snapshot over push");
            if let Err(e) = self.request_push_snapshot().await {
                debug!(error = %e, "Snapshot request failed");
                self.handle_push_lost().await;
            }
        } else if self.schedule.is_visible() {
            debug!(%reason, "Polling now");
            self.poll_now().await;
        } else {
            debug!(%reason, "Surface hidden, refresh deferred");
        }
    }

    async fn handle_push_inbound(&mut self, inbound: Result<Option<Inbound>>) {
        match inbound {
            Ok(Some(inbound)) => {
                self.last_inbound = Instant::now();
                self.deliver(inbound);
            }
            Ok(None) => {
                debug!("Push channel closed");
                self.handle_push_lost().await;
            }
            Err(e) => {
                debug!(error = %e, "Push channel failed");
                self.handle_push_lost().await;
            }
        }
    }

    fn handle_poll_inbound(&mut self, inbound: Result<Option<Inbound>>) {
        self.poll_pending = false;
        match inbound {
            Ok(Some(Inbound::ServerError { code, message })) if code == FETCH_FAILED => {
                warn!(message = %message, "Poll failed");
                self.set_status(ConnectionStatus::Disconnected);
            }
            Ok(Some(inbound)) => {
                self.set_status(ConnectionStatus::Polling);
                self.deliver(inbound);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Poll failed");
                self.set_status(ConnectionStatus::Disconnected);
            }
        }
        self.schedule_next_poll();
    }

    fn deliver(&self, inbound: Inbound) {
        match inbound {
            Inbound::Update(update) => {
                self.cache.apply_remote(update);
            }
            Inbound::Heartbeat => trace!("Heartbeat"),
            Inbound::ServerError { code, message } if code == AGGREGATION_FAILED => {
                warn!(message = %message, "Server reports every source failed");
                self.cache.report_aggregation_failure(message);
            }
            Inbound::ServerError { code, message } => {
                warn!(code = %code, message = %message, "Server error on delivery channel");
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!(from = %current, to = %status, "Connection status changed");
                *current = status;
                true
            }
        });
    }
}

impl Drop for DeliveryManager {
    fn drop(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
    }
}

async fn join_connect(
    task: Option<&mut ConnectTask>,
) -> std::result::Result<(Box<dyn DeliveryChannel>, Result<()>), JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn next_inbound(push: Option<&mut Box<dyn DeliveryChannel>>) -> Result<Option<Inbound>> {
    match push {
        Some(push) => push.next().await,
        None => std::future::pending().await,
    }
}
