// src/core/scanner/mod.rs

// Shared fan-out harness plus the three scan drivers built on it.
pub mod crawler;
pub mod path_scanner;
pub mod port_scanner;
pub mod rate_limiter;
pub mod retry;
pub mod sources;
pub mod subdomain_scanner;
pub mod wildcard;

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::core::control::ControlHandle;
use crate::core::error::{ScanError, ScanResult};
use crate::core::progress::{ProgressFn, percent};

pub use path_scanner::PathScanner;
pub use port_scanner::PortScanner;
pub use subdomain_scanner::SubdomainScanner;

/// Per-target probe logic a driver plugs into [`fan_out`].
#[async_trait]
pub trait Probe: Send + Sync {
    type Target: Send + Sync;
    type Finding: Send;

    /// Probes one target. `None` means "nothing worth reporting"; failures
    /// are absorbed here and never abort the run.
    async fn probe(&self, target: &Self::Target, control: &ControlHandle) -> Option<Self::Finding>;

    /// Adds a positive result to the accumulated findings.
    fn absorb(&self, findings: &mut Vec<Self::Finding>, found: Self::Finding) {
        findings.push(found);
    }
}

/// De-duplicates an enumeration while keeping first-seen order.
pub fn dedup_targets<T: Eq + Hash + Clone>(targets: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

/// Converts a seconds value from job parameters, rejecting anything that is
/// not positive or does not fit a [`Duration`].
pub fn positive_seconds(value: f64, what: &str) -> ScanResult<Duration> {
    if value > 0.0 {
        if let Ok(duration) = Duration::try_from_secs_f64(value) {
            return Ok(duration);
        }
    }
    Err(ScanError::InvalidParams(format!(
        "{what} must be a positive number of seconds, got {value}"
    )))
}

/// Runs `prober` over every target with at most `concurrency` probes in flight.
///
/// Each target passes an admission checkpoint first: cancelled runs skip it,
/// paused runs wait. Skipped targets still count toward completion, so
/// progress always reaches 100. Findings are collected in completion order.
///
/// # Arguments
/// * `prober` - The driver-specific probe.
/// * `targets` - The full, already de-duplicated enumeration.
/// * `concurrency` - Size of the admission gate; clamped to at least 1.
/// * `control` - Cancel/pause signals of the run.
/// * `progress` - Receives `completed * 100 / total` after every target and a final 100.
///
/// # Returns
/// The accumulated findings, or an error if the admission gate itself failed.
pub async fn fan_out<P: Probe>(
    prober: &P,
    targets: Vec<P::Target>,
    concurrency: usize,
    control: &ControlHandle,
    progress: ProgressFn<'_>,
) -> ScanResult<Vec<P::Finding>> {
    let total = targets.len();
    let gate = Arc::new(Semaphore::new(concurrency.max(1)));
    debug!(total, concurrency, "Fanning out probes.");

    let mut in_flight: FuturesUnordered<_> = targets
        .into_iter()
        .map(|target| {
            let gate = Arc::clone(&gate);
            async move {
                if control.is_cancelled() {
                    return Ok(None);
                }
                let Ok(_permit) = gate.acquire_owned().await else {
                    return Err(ScanError::GateClosed(total));
                };
                if !control.admit().await {
                    return Ok(None);
                }
                Ok(prober.probe(&target, control).await)
            }
        })
        .collect();

    let mut findings = Vec::new();
    let mut completed = 0usize;
    while let Some(outcome) = in_flight.next().await {
        if let Some(found) = outcome? {
            prober.absorb(&mut findings, found);
        }
        completed += 1;
        progress(percent(completed, total));
    }

    progress(100);
    Ok(findings)
}
