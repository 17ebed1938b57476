//! Polling fallback channel and its adaptive schedule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{AGGREGATION_FAILED, ChannelKind, DeliveryChannel, FETCH_FAILED, Inbound};
use crate::client::cache::RemoteUpdate;
use crate::client::remote::NotificationApi;
use crate::domain::FeedQuery;
use crate::notification::Feed;
use crate::{Error, Result};

/// Delivers full snapshots by calling the aggregator endpoint.
///
/// At most one fetch is in flight. A new request aborts the previous one
/// rather than stacking behind it, and each fetch carries a generation so
/// superseded results are never surfaced.
pub struct PollChannel {
    api: Arc<dyn NotificationApi>,
    query: FeedQuery,
    generation: u64,
    in_flight: Option<(u64, JoinHandle<Result<Feed>>)>,
}

impl PollChannel {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        Self::with_query(api, FeedQuery::default())
    }

    pub fn with_query(api: Arc<dyn NotificationApi>, query: FeedQuery) -> Self {
        Self {
            api,
            query,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    fn cancel_in_flight(&mut self) {
        if let Some((generation, handle)) = self.in_flight.take() {
            debug!(generation, "Cancelling in-flight poll");
            handle.abort();
        }
    }
}

#[async_trait]
impl DeliveryChannel for PollChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Poll
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<Inbound>> {
        let Some((generation, handle)) = self.in_flight.as_mut() else {
            return std::future::pending().await;
        };
        let generation = *generation;
        let joined = handle.await;
        self.in_flight = None;

        let inbound = match joined {
            Ok(Ok(feed)) => {
                debug!(generation, total = feed.total, "Poll completed");
                Inbound::Update(RemoteUpdate::snapshot(feed))
            }
            Ok(Err(e @ Error::AggregationFailed { .. })) => Inbound::ServerError {
                code: AGGREGATION_FAILED.to_string(),
                message: e.to_string(),
            },
            Ok(Err(e)) => Inbound::ServerError {
                code: FETCH_FAILED.to_string(),
                message: e.to_string(),
            },
            Err(e) => {
                warn!(generation, error = %e, "Poll task failed");
                Inbound::ServerError {
                    code: FETCH_FAILED.to_string(),
                    message: e.to_string(),
                }
            }
        };
        Ok(Some(inbound))
    }

    async fn request_snapshot(&mut self) -> Result<()> {
        self.cancel_in_flight();
        self.generation += 1;

        let api = self.api.clone();
        let query = self.query.clone();
        let handle = tokio::spawn(async move { api.fetch(&query).await });
        self.in_flight = Some((self.generation, handle));
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.cancel_in_flight();
    }
}

impl Drop for PollChannel {
    fn drop(&mut self) {
        self.cancel_in_flight();
    }
}

/// Polling cadence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollScheduleConfig {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Time without user activity after which the interval starts growing.
    pub idle_threshold_ms: u64,
    pub idle_multiplier: f64,
}

impl Default for PollScheduleConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 30_000,
            max_interval_ms: 300_000,
            idle_threshold_ms: 120_000,
            idle_multiplier: 2.0,
        }
    }
}

impl PollScheduleConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms.max(self.base_interval_ms))
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }
}

/// Decides when the next poll is due.
///
/// Paused entirely while the surface is hidden. While the user is idle
/// the interval grows by `idle_multiplier` per poll up to the cap; any
/// activity drops it back to the base interval.
#[derive(Debug, Clone)]
pub struct AdaptivePollSchedule {
    config: PollScheduleConfig,
    visible: bool,
    last_activity: Instant,
    interval: Duration,
}

impl AdaptivePollSchedule {
    pub fn new(config: PollScheduleConfig) -> Self {
        let interval = config.base_interval();
        Self {
            config,
            visible: true,
            last_activity: Instant::now(),
            interval,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Returns `true` on a hidden to visible transition.
    pub fn set_visible(&mut self, visible: bool) -> bool {
        let became_visible = visible && !self.visible;
        self.visible = visible;
        if became_visible {
            self.record_activity();
        }
        became_visible
    }

    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.interval = self.config.base_interval();
    }

    pub fn is_idle(&self) -> bool {
        self.last_activity.elapsed() >= self.config.idle_threshold()
    }

    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    pub fn base_interval(&self) -> Duration {
        self.config.base_interval()
    }

    /// Interval until the next poll, or `None` while paused.
    pub fn next_interval(&mut self) -> Option<Duration> {
        if !self.visible {
            return None;
        }
        if self.is_idle() {
            let grown = self
                .interval
                .mul_f64(self.config.idle_multiplier.max(1.0))
                .min(self.config.max_interval());
            self.interval = grown;
        } else {
            self.interval = self.config.base_interval();
        }
        Some(self.interval)
    }
}
