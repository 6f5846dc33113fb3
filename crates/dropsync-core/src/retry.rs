//! Retry policy for outbound session establishment.
//!
//! The default is the replication link's fail-forever policy: a fixed
//! 5 second pause between attempts and no attempt limit. Tests inject a
//! near-zero interval instead of waiting real time.

use std::time::Duration;

/// How long to wait between dial attempts, and when to give up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after every failed attempt
    pub interval: Duration,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Constant interval, unlimited attempts.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Same policy, but giving up after `attempts` failed attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay to wait after a failed attempt. Constant across attempts.
    pub fn delay(&self) -> Duration {
        self.interval
    }

    /// Whether `attempts` failed attempts exhaust this policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map(|max| attempts >= max).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_five_seconds() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay(), Duration::from_secs(5));
        assert_eq!(policy.max_attempts, None);
        assert!(!policy.exhausted(u32::MAX));
    }

    #[test]
    fn test_max_attempts() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1)).with_max_attempts(3);

        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
        assert!(policy.exhausted(4));
    }
}
