//! Refresh coalescing.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Why a refresh was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefreshReason {
    /// A local mutation was confirmed.
    Mutation,
    /// Another subsystem reported a change.
    Signal,
    /// The user explicitly asked.
    UserAction,
    /// The push channel (re)connected.
    Reconnected,
    /// The client surface became visible after being hidden.
    BecameVisible,
}

impl RefreshReason {
    /// Forced refreshes bypass the minimum interval.
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            Self::UserAction | Self::Reconnected | Self::BecameVisible
        )
    }
}

/// Enforces a minimum interval between refreshes.
///
/// A non-forced request arriving before the interval elapses is dropped,
/// not queued.
#[derive(Debug)]
pub struct RefreshGate {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RefreshGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Returns whether the refresh may proceed, recording it if so.
    pub fn try_acquire(&self, reason: RefreshReason) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();

        let allowed = reason.is_forced()
            || last.is_none_or(|at| now.duration_since(at) >= self.min_interval);
        if allowed {
            *last = Some(now);
        }
        allowed
    }

    pub fn reset(&self) {
        *self.last.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_early_requests_are_dropped() {
        let gate = RefreshGate::new(Duration::from_secs(2));

        assert!(gate.try_acquire(RefreshReason::Mutation));
        assert!(!gate.try_acquire(RefreshReason::Signal));

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(!gate.try_acquire(RefreshReason::Mutation));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(gate.try_acquire(RefreshReason::Mutation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_reasons_bypass_interval() {
        let gate = RefreshGate::new(Duration::from_secs(60));
        assert!(gate.try_acquire(RefreshReason::Mutation));

        for reason in [
            RefreshReason::UserAction,
            RefreshReason::Reconnected,
            RefreshReason::BecameVisible,
        ] {
            assert!(gate.try_acquire(reason), "{} should be forced", reason);
        }

        // A forced refresh restarts the interval for ordinary requests.
        assert!(!gate.try_acquire(RefreshReason::Signal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_allows_next_request() {
        let gate = RefreshGate::new(Duration::from_secs(60));
        assert!(gate.try_acquire(RefreshReason::Signal));
        gate.reset();
        assert!(gate.try_acquire(RefreshReason::Signal));
    }
}
