//! Client session: one cache plus the delivery manager that feeds it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::info;

use super::cache::{CacheConfig, CacheEvent, ReconciliationCache};
use super::delivery::{
    ConnectionStatus, DeliveryChannel, DeliveryConfig, DeliveryHandle, DeliveryManager,
    PollChannel, PushChannel,
};
use super::refresh::RefreshReason;
use super::remote::{HttpNotificationApi, NotificationApi};
use crate::Result;
use crate::utils::http_client::HttpClientConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cache: CacheConfig,
    pub delivery: DeliveryConfig,
    pub http: HttpClientConfig,
}

/// What a presentation layer holds for one logged-in user.
pub struct ClientSession {
    cache: Arc<ReconciliationCache>,
    delivery: DeliveryHandle,
}

impl ClientSession {
    /// Start a session over arbitrary channels.
    pub fn start(
        config: SessionConfig,
        api: Arc<dyn NotificationApi>,
        push: Box<dyn DeliveryChannel>,
        poll: Box<dyn DeliveryChannel>,
    ) -> Self {
        let cache = Arc::new(ReconciliationCache::new(api, &config.cache));
        let delivery = DeliveryManager::spawn(config.delivery, cache.clone(), push, poll);
        Self { cache, delivery }
    }

    /// Start a session against a notification server.
    pub fn connect(server_url: &str, token: &str, config: SessionConfig) -> Result<Self> {
        let api = HttpNotificationApi::new(server_url, token, &config.http)?;
        let push = PushChannel::for_api(&api)?;
        let api: Arc<dyn NotificationApi> = Arc::new(api);
        let poll = PollChannel::new(api.clone());
        info!(server = %server_url, "Starting notification session");
        Ok(Self::start(config, api, Box::new(push), Box::new(poll)))
    }

    pub fn cache(&self) -> &Arc<ReconciliationCache> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.delivery.status()
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.delivery.watch_status()
    }

    pub fn set_visible(&self, visible: bool) {
        self.delivery.set_visible(visible);
    }

    pub fn record_activity(&self) {
        self.delivery.record_activity();
    }

    /// Ask for a refresh; returns whether it passed the coalescing gate.
    pub fn refresh(&self, reason: RefreshReason) -> bool {
        self.cache.request_refresh(reason)
    }

    /// Stop delivery and drop every cached envelope.
    pub async fn logout(self) {
        self.delivery.shutdown().await;
        self.cache.clear();
        info!("Notification session closed");
    }
}
