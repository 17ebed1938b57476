//! Backoff policy value object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff for reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Attempts before giving up. `0` retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Whether to add up to 25% jitter. The jittered delay never exceeds the cap.
    #[serde(default)]
    pub use_jitter: bool,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    10
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_delay_ms: base.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max = self.max_delay_ms.max(self.base_delay_ms);
        let exponent = attempt.min(63) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let delay_ms = if raw.is_finite() {
            raw.min(max as f64) as u64
        } else {
            max
        };

        if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            Duration::from_millis((delay_ms + jitter).min(max))
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    /// Whether attempt number `attempt` (0-indexed) may still run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            use_jitter: false,
        }
    }
}
