//! Environment-driven server configuration.
//!
//! `.env` is loaded by the binary before this runs; every field falls back to
//! a default when its variable is missing or unparsable.

use crate::api::ApiServerConfig;
use crate::notification::NotificationServiceConfig;

/// Default SQLite location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:campus-notify.db?mode=rwc";

/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub api: ApiServerConfig,
    pub notifications: NotificationServiceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            api: ApiServerConfig::default(),
            notifications: NotificationServiceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Supported env vars:
    /// - `DATABASE_URL`
    /// - `LOG_DIR`
    /// - `API_BIND_ADDRESS`, `API_PORT`, `NOTIFY_WS_HEARTBEAT_SECS`
    /// - `NOTIFY_SOURCE_TIMEOUT_MS`, `NOTIFY_FETCH_WINDOW`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
            .with_api(ApiServerConfig::from_env_or_default())
    }

    fn with_api(mut self, api: ApiServerConfig) -> Self {
        self.api = api;
        self
    }

    /// Build from an arbitrary variable lookup. The API section is left at
    /// its defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL")
            && !url.trim().is_empty()
        {
            config.database_url = url;
        }

        if let Some(dir) = lookup("LOG_DIR")
            && !dir.trim().is_empty()
        {
            config.log_dir = dir;
        }

        if let Some(timeout) = lookup("NOTIFY_SOURCE_TIMEOUT_MS")
            && let Ok(parsed) = timeout.parse::<u64>()
            && parsed > 0
        {
            config.notifications.aggregator.source_timeout_ms = parsed;
        }

        if let Some(window) = lookup("NOTIFY_FETCH_WINDOW")
            && let Ok(parsed) = window.parse::<i64>()
            && parsed > 0
        {
            config.notifications.aggregator.fetch_window = parsed;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.log_dir, DEFAULT_LOG_DIR);
        assert_eq!(config.notifications.aggregator.source_timeout_ms, 3000);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("NOTIFY_SOURCE_TIMEOUT_MS", "750"),
            ("NOTIFY_FETCH_WINDOW", "not-a-number"),
        ]));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.notifications.aggregator.source_timeout_ms, 750);
        assert_eq!(config.notifications.aggregator.fetch_window, 500);
    }
}
