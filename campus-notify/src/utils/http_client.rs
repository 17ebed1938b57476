use std::{sync::OnceLock, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Settings for the HTTP client used by the remote notification API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_idle() -> usize {
    4
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

fn user_agent() -> String {
    format!("campus-notify/{}", env!("CARGO_PKG_VERSION"))
}

/// Build a `reqwest::Client` for talking to the notification server.
pub fn build_client(config: &HttpClientConfig) -> reqwest::Client {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder().user_agent(user_agent());

    if config.request_timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.request_timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }
    if config.pool_max_idle_per_host > 0 {
        builder = builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(error = %error, "Failed to build configured HTTP client; falling back to reqwest defaults");
        reqwest::Client::new()
    })
}
