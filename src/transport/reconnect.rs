//! Reconnection backoff.

use crate::defaults;
use std::time::Duration;

/// Linear backoff: attempt `n` waits `min(base * n, max_delay)`, at most
/// `max_attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(defaults::RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RECONNECT_MAX_DELAY_MS),
            max_attempts: defaults::RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.max_delay)
    }

    /// Count one more attempt and return its delay, or None once the cap is
    /// reached.
    pub fn next(&self, attempts: &mut u32) -> Option<Duration> {
        if *attempts >= self.max_attempts {
            return None;
        }
        *attempts += 1;
        Some(self.delay(*attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_linearly_then_caps() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 100,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(7), Duration::from_millis(7000));
        assert_eq!(policy.delay(30), Duration::from_millis(30_000));
        assert_eq!(policy.delay(45), Duration::from_millis(30_000));
    }

    #[test]
    fn default_policy_gives_up_after_ten_attempts() {
        let policy = ReconnectPolicy::default();
        let mut attempts = 0;
        let delays: Vec<Duration> = std::iter::from_fn(|| policy.next(&mut attempts)).collect();

        assert_eq!(delays.len(), 10);
        for (n, delay) in delays.iter().enumerate() {
            let expected = (1000 * (n as u64 + 1)).min(30_000);
            assert_eq!(*delay, Duration::from_millis(expected));
        }
        assert_eq!(policy.next(&mut attempts), None);
        assert_eq!(attempts, 10);
    }

    #[test]
    fn reset_counter_starts_over() {
        let policy = ReconnectPolicy::default();
        let mut attempts = 0;
        policy.next(&mut attempts);
        policy.next(&mut attempts);
        attempts = 0;
        assert_eq!(policy.next(&mut attempts), Some(Duration::from_secs(1)));
    }
}
