// src/core/scanner/retry.rs

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;

/// Status codes reported by the path prober when the caller gives none.
pub const DEFAULT_ACCEPTED_STATUSES: [u16; 6] = [200, 204, 301, 302, 401, 403];

/// A `[min, max]` window random delays are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub min: Duration,
    pub max: Duration,
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(200))
    }
}

impl Jitter {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draws a delay uniformly from the window.
    pub fn sample(&self) -> Duration {
        self.sample_scaled(1.0)
    }

    /// Draws from the window scaled by `factor`.
    pub fn sample_scaled(&self, factor: f64) -> Duration {
        let lo = self.min.as_secs_f64() * factor;
        let hi = self.max.as_secs_f64() * factor;
        if hi <= 0.0 {
            return Duration::ZERO;
        }
        if hi <= lo {
            return Duration::from_secs_f64(lo);
        }
        Duration::from_secs_f64(rand::rng().random_range(lo..=hi))
    }
}

/// How a single HTTP status should be treated by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// In the accepted set: record a finding.
    Accepted,
    /// 429 or a server error: worth another attempt.
    Retryable,
    /// Anything else: drop silently.
    Rejected,
}

/// Classifies `status` against the accepted set. Accepted wins over retryable,
/// so a caller that explicitly accepts 500 gets a finding for it.
pub fn classify_status(status: u16, accepted: &HashSet<u16>) -> StatusClass {
    if accepted.contains(&status) {
        StatusClass::Accepted
    } else if status == 429 || status >= 500 {
        StatusClass::Retryable
    } else {
        StatusClass::Rejected
    }
}

/// True when a `HEAD` answer means the server wants a `GET` instead.
pub fn head_unsupported(status: u16) -> bool {
    matches!(status, 405 | 501)
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    jitter: Jitter,
}

impl RetryPolicy {
    /// `retries` is the total attempt budget; anything below 1 still gets one attempt.
    pub fn new(retries: u32) -> Self {
        Self {
            max_attempts: retries.max(1),
            base: Duration::from_millis(250),
            cap: Duration::from_secs(2),
            jitter: Jitter::default(),
        }
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.base = base;
        self.cap = cap.max(base);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`: `min(cap, base * 2^(attempt-1))` plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff(attempt) + self.jitter.sample()
    }

    fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> HashSet<u16> {
        DEFAULT_ACCEPTED_STATUSES.into_iter().collect()
    }

    #[test]
    fn statuses_are_classified() {
        let accepted = defaults();
        assert_eq!(classify_status(200, &accepted), StatusClass::Accepted);
        assert_eq!(classify_status(403, &accepted), StatusClass::Accepted);
        assert_eq!(classify_status(404, &accepted), StatusClass::Rejected);
        assert_eq!(classify_status(429, &accepted), StatusClass::Retryable);
        assert_eq!(classify_status(503, &accepted), StatusClass::Retryable);

        let only_500: HashSet<u16> = [500].into_iter().collect();
        assert_eq!(classify_status(500, &only_500), StatusClass::Accepted);
    }

    #[test]
    fn head_fallback_statuses() {
        assert!(head_unsupported(405));
        assert!(head_unsupported(501));
        assert!(!head_unsupported(500));
    }

    #[test]
    fn attempt_budget_is_at_least_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(10).with_jitter(Jitter::none());
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(4), Duration::from_secs(2));
        assert_eq!(policy.backoff(9), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_in_window() {
        let jitter = Jitter::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..100 {
            let d = jitter.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(Jitter::none().sample(), Duration::ZERO);
    }
}
