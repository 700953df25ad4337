// src/core/control.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How often a paused run re-checks its flags.
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(200);

/// The cancel/pause signal pair governing one run.
///
/// Clones share the same signals. Cancellation is level-triggered and never
/// cleared; pausing can be toggled any number of times.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    poll: Duration,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_PAUSE_POLL)
    }

    pub fn with_poll_interval(poll: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            poll,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Admission checkpoint run before each unit of work.
    ///
    /// Blocks while the run is paused, polling at the configured interval, and
    /// returns `false` if the run was cancelled before or during the wait.
    pub async fn admit(&self) -> bool {
        while self.is_paused() && !self.is_cancelled() {
            tokio::time::sleep(self.poll).await;
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admit_passes_through_when_idle() {
        let control = ControlHandle::new();
        assert!(control.admit().await);
    }

    #[tokio::test]
    async fn cancellation_is_sticky() {
        let control = ControlHandle::new();
        control.cancel();
        control.resume();
        assert!(control.is_cancelled());
        assert!(!control.admit().await);
    }

    #[tokio::test(start_paused = true)]
    async fn admit_waits_out_a_pause() {
        let control = ControlHandle::new();
        control.pause();

        let resumer = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            resumer.resume();
        });

        let started = tokio::time::Instant::now();
        assert!(control.admit().await);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_releases_a_paused_run() {
        let control = ControlHandle::new();
        control.pause();

        let canceller = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        assert!(!control.admit().await);
        assert!(control.is_paused());
    }
}
