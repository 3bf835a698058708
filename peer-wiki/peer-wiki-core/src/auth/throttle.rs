//! Brute-force lockout for login attempts, keyed by client address.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::config::LockoutConfig;
use crate::error::{Result, WikiError};

#[derive(Clone, Copy, Debug)]
struct Attempts {
    failures: u32,
    last_failure: Instant,
    blocked_until: Option<Instant>,
}

impl Attempts {
    fn stale(&self, now: Instant, lifetime: Duration) -> bool {
        let blocked = self.blocked_until.is_some_and(|until| until > now);
        !blocked && now.saturating_duration_since(self.last_failure) > lifetime
    }
}

pub struct LoginThrottle {
    config: LockoutConfig,
    state: Mutex<HashMap<String, Attempts>>,
}

impl LoginThrottle {
    pub fn new(config: LockoutConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Fail fast while `key` is locked out. Rejected attempts are not counted.
    pub fn check(&self, key: &str) -> Result<()> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<()> {
        let state = self.state.lock();
        match state.get(key).and_then(|a| a.blocked_until) {
            Some(until) if until > now => Err(WikiError::TooManyAttempts {
                retry_after: until - now,
            }),
            _ => Ok(()),
        }
    }

    pub fn failure(&self, key: &str) {
        self.failure_at(key, Instant::now());
    }

    fn failure_at(&self, key: &str, now: Instant) {
        let lifetime = self.config.lifetime;
        let mut state = self.state.lock();
        state.retain(|_, a| !a.stale(now, lifetime));
        let attempts = state.entry(key.to_string()).or_insert(Attempts {
            failures: 0,
            last_failure: now,
            blocked_until: None,
        });
        attempts.failures += 1;
        attempts.last_failure = now;
        if let Some(wait) = self.wait_after(attempts.failures) {
            warn!(key, failures = attempts.failures, wait_secs = wait.as_secs(), "login locked out");
            attempts.blocked_until = Some(now + wait);
        }
    }

    pub fn success(&self, key: &str) {
        self.state.lock().remove(key);
    }

    /// Lockout after the `failures`-th failure, doubling from `min_wait`.
    fn wait_after(&self, failures: u32) -> Option<Duration> {
        let over = failures.checked_sub(self.config.free_retries)?;
        if over == 0 {
            return None;
        }
        let factor = 1u32.checked_shl(over - 1).unwrap_or(u32::MAX);
        Some(
            self.config
                .min_wait
                .checked_mul(factor)
                .unwrap_or(self.config.max_wait)
                .min(self.config.max_wait),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence() {
        let throttle = LoginThrottle::new(LockoutConfig::default());
        let waits: Vec<Option<u64>> = (1..=10)
            .map(|n| throttle.wait_after(n).map(|d| d.as_secs()))
            .collect();
        assert_eq!(
            waits,
            vec![
                None,
                None,
                None,
                None,
                None,
                Some(60),
                Some(120),
                Some(240),
                Some(300),
                Some(300)
            ]
        );
        assert_eq!(throttle.wait_after(200), Some(Duration::from_secs(300)));
    }

    #[test]
    fn lockout_and_reset() {
        let throttle = LoginThrottle::new(LockoutConfig::default());
        let now = Instant::now();
        for _ in 0..5 {
            throttle.failure_at("1.2.3.4", now);
            assert!(throttle.check_at("1.2.3.4", now).is_ok());
        }
        throttle.failure_at("1.2.3.4", now);
        match throttle.check_at("1.2.3.4", now) {
            Err(WikiError::TooManyAttempts { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(60))
            }
            other => panic!("expected lockout, got {other:?}"),
        }
        assert!(throttle.check_at("1.2.3.4", now + Duration::from_secs(61)).is_ok());
        assert!(throttle.check_at("5.6.7.8", now).is_ok());

        throttle.success("1.2.3.4");
        assert!(throttle.check_at("1.2.3.4", now).is_ok());
    }

    #[test]
    fn failures_are_forgotten_after_lifetime() {
        let throttle = LoginThrottle::new(LockoutConfig::default());
        let start = Instant::now();
        for _ in 0..5 {
            throttle.failure_at("1.2.3.4", start);
        }
        throttle.failure_at("9.9.9.9", start);

        let later = start + Duration::from_secs(30 * 24 * 60 * 60);
        throttle.failure_at("1.2.3.4", later);
        assert!(throttle.check_at("1.2.3.4", later).is_ok());
        assert_eq!(throttle.state.lock().len(), 1);
        assert_eq!(throttle.state.lock()["1.2.3.4"].failures, 1);
    }
}
