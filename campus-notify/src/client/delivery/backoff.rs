//! Reconnect backoff state.

use std::time::Duration;

use crate::domain::BackoffPolicy;

/// Counts consecutive failed connects against a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.should_retry(self.attempts) {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Back to the base delay after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        !self.policy.should_retry(self.attempts)
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(8)).with_max_attempts(8)
    }

    #[test]
    fn test_delays_grow_to_cap_then_exhaust() {
        let mut backoff = ReconnectBackoff::new(policy());
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();

        assert_eq!(delays.len(), 8);
        assert_eq!(delays[0], Duration::from_millis(500));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(8)));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(8));
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = ReconnectBackoff::new(policy());
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_unbounded_attempts() {
        let mut backoff = ReconnectBackoff::new(policy().with_max_attempts(0));
        for _ in 0..100 {
            assert!(backoff.next_delay().is_some());
        }
    }
}
