// src/core/progress.rs

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

/// Progress callback handed to drivers. Receives a percentage in `0..=100`.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// A callback that ignores every tick, for standalone driver runs.
pub fn ignore_progress(_: u8) {}

/// Percentage of `done` out of `total`, clamped to 100.
pub fn percent(done: usize, total: usize) -> u8 {
    let total = total.max(1);
    (done.saturating_mul(100) / total).min(100) as u8
}

/// Thins out progress ticks before they reach persistence.
///
/// A tick is forwarded only when it is at least `step` points above the last
/// forwarded value, or when it is 100. Forwarded values never decrease.
/// Ticks go into a bounded queue drained by a single writer, so a job never
/// has more than one concurrent progress update in flight.
#[derive(Debug)]
pub struct ProgressSink {
    step: u8,
    last: Mutex<Option<u8>>,
    tx: mpsc::Sender<u8>,
}

impl ProgressSink {
    /// Creates a sink and the receiving end its writer task drains.
    pub fn channel(step: u8, capacity: usize) -> (Self, mpsc::Receiver<u8>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            step: step.clamp(1, 100),
            last: Mutex::new(None),
            tx,
        };
        (sink, rx)
    }

    /// Offers a tick; returns whether it was forwarded.
    pub fn report(&self, pct: u8) -> bool {
        let pct = pct.min(100);
        let Ok(mut last) = self.last.lock() else {
            return false;
        };
        let due = match *last {
            None => true,
            Some(prev) if pct <= prev => false,
            Some(_) if pct == 100 => true,
            Some(prev) => pct - prev >= self.step,
        };
        if !due {
            return false;
        }
        match self.tx.try_send(pct) {
            Ok(()) => {
                *last = Some(pct);
                true
            }
            Err(e) => {
                // The writer finalizes progress itself, so a dropped tick is harmless.
                debug!(pct, error = %e, "Progress tick dropped.");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(5, 3), 100);
    }

    #[tokio::test]
    async fn sink_forwards_coarse_monotonic_ticks() {
        let (sink, mut rx) = ProgressSink::channel(5, 64);
        for pct in [0, 1, 4, 5, 7, 12, 11, 99, 100, 100] {
            sink.report(pct);
        }
        drop(sink);

        let mut seen = Vec::new();
        while let Some(pct) = rx.recv().await {
            seen.push(pct);
        }
        assert_eq!(seen, vec![0, 5, 12, 99, 100]);
    }

    #[tokio::test]
    async fn sink_always_lets_the_final_tick_through() {
        let (sink, mut rx) = ProgressSink::channel(50, 8);
        assert!(sink.report(10));
        assert!(!sink.report(40));
        assert!(sink.report(100));
        drop(sink);
        assert_eq!(rx.recv().await, Some(10));
        assert_eq!(rx.recv().await, Some(100));
        assert_eq!(rx.recv().await, None);
    }
}
