// src/core/scanner/rate_limiter.rs

use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::HashMapStateStore;
use governor::{Quota, RateLimiter};
use tracing::debug;
use url::Url;

use crate::core::scanner::retry::Jitter;

type KeyedLimiter =
    RateLimiter<String, HashMapStateStore<String>, TokioClock, NoOpMiddleware<std::time::Instant>>;

/// Governor clock reading tokio's time source, so pacing follows a paused
/// test clock the same way the rest of the runtime does.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Per-host request pacing, independent of the run's concurrency bound.
///
/// One keyed GCRA limiter with a burst of one: each `host[:port]` gets at
/// most one request per interval, while other hosts proceed untouched.
pub struct HostPacer {
    limiter: Option<KeyedLimiter>,
    jitter: Jitter,
}

impl std::fmt::Debug for HostPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPacer")
            .field("enabled", &self.is_enabled())
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl HostPacer {
    /// A pacer capped at `qps` requests per second per host. `None`, a
    /// non-positive rate, or a rate whose interval rounds to zero disables
    /// pacing.
    pub fn new(qps: Option<f64>, jitter: Jitter) -> Self {
        let limiter = qps
            .filter(|q| q.is_finite() && *q > 0.0)
            .and_then(|q| Duration::try_from_secs_f64(1.0 / q).ok())
            .and_then(Quota::with_period)
            .map(|quota| RateLimiter::new(quota, HashMapStateStore::default(), TokioClock));
        Self { limiter, jitter }
    }

    pub fn unlimited() -> Self {
        Self::new(None, Jitter::none())
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Waits until `url`'s host may receive another request.
    pub async fn wait(&self, url: &Url) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let host = host_key(url);
        while let Err(not_until) = limiter.check_key(&host) {
            let delay = not_until.wait_time_from(TokioClock.now());
            debug!(host = %host, delay_ms = delay.as_millis() as u64, "Pacing request.");
            tokio::time::sleep(delay).await;
        }
        // Half-width jitter keeps hosts from settling into lockstep.
        let extra = self.jitter.sample_scaled(0.5);
        if !extra.is_zero() {
            tokio::time::sleep(extra).await;
        }
    }
}

/// Lowercased `host[:port]` used as the pacing key.
pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}
