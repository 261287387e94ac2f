//! Retry budgets and backoff schedules.

use std::time::Duration;

use warden_contracts::config::MAX_INTERACTIVE_ATTEMPTS;

/// How many attempts a caller gets and how long it waits between them.
///
/// Delays double from `base_delay` and are capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `None` retries transient failures
    /// until the caller cancels.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Fast path for callers a user is waiting on: at most three attempts,
    /// short delays.
    pub fn interactive(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.clamp(1, MAX_INTERACTIVE_ATTEMPTS)),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        }
    }

    /// Background workers: 30s, 60s, 120s, ... capped at 300s.
    pub fn background() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay before the attempt that follows attempt number `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interactive(MAX_INTERACTIVE_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_schedule_doubles_and_caps() {
        let policy = RetryPolicy::background();
        let delays: Vec<u64> = (1..=6).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 300, 300]);
        assert!(policy.allows_retry_after(1000));
    }

    #[test]
    fn interactive_never_exceeds_three_attempts() {
        let policy = RetryPolicy::interactive(10);
        assert_eq!(policy.max_attempts, Some(3));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));

        let single = RetryPolicy::interactive(0);
        assert!(!single.allows_retry_after(1));
    }
}
