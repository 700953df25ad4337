// src/app.rs

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::core::control::ControlHandle;
use crate::core::error::{ScanError, ScanResult, StoreError};
use crate::core::jobs::JobController;
use crate::core::models::{Finding, FindingRecord, JobId, JobRecord, JobState, ScanParams};
use crate::core::progress::{ProgressFn, ProgressSink};
use crate::core::scanner::{PathScanner, PortScanner, SubdomainScanner};
use crate::core::store::JobStore;

/// Queue depth between a run's progress callback and its single writer.
const PROGRESS_QUEUE: usize = 32;

/// The three drivers a job can dispatch to.
#[derive(Debug, Clone, Default)]
pub struct Drivers {
    pub subdomains: SubdomainScanner,
    pub ports: PortScanner,
    pub paths: PathScanner,
}

impl Drivers {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            subdomains: SubdomainScanner::new(settings.candidate_sources())
                .with_user_agent(settings.engine.user_agent.clone()),
            ports: PortScanner::new(settings.port_scan_config()),
            paths: PathScanner::new(settings.path_scan_config()),
        }
    }

    /// Runs the driver matching `params` and wraps its output as findings.
    pub async fn run(
        &self,
        params: &ScanParams,
        control: &ControlHandle,
        progress: ProgressFn<'_>,
    ) -> ScanResult<Vec<Finding>> {
        Ok(match params {
            ScanParams::Subdomains(p) => into_findings(self.subdomains.run(p, control, progress).await?),
            ScanParams::Ports(p) => into_findings(self.ports.run(p, control, progress).await?),
            ScanParams::Paths(p) => into_findings(self.paths.run(p, control, progress).await?),
        })
    }
}

fn into_findings<T: Into<Finding>>(found: Vec<T>) -> Vec<Finding> {
    found.into_iter().map(Into::into).collect()
}

/// Service façade: job records in a store, runs in a controller.
#[derive(Debug)]
pub struct ReconApp<S: JobStore> {
    store: Arc<S>,
    controller: JobController,
    drivers: Arc<Drivers>,
    progress_step: u8,
}

impl<S: JobStore> ReconApp<S> {
    pub fn new(store: S, settings: &Settings) -> Self {
        Self {
            store: Arc::new(store),
            controller: JobController::new(settings.pause_poll()),
            drivers: Arc::new(Drivers::from_settings(settings)),
            progress_step: settings.engine.progress_step,
        }
    }

    pub fn with_drivers(mut self, drivers: Drivers) -> Self {
        self.drivers = Arc::new(drivers);
        self
    }

    /// Records a `queued` job and starts its run in the background.
    pub async fn submit(&self, params: ScanParams) -> Result<JobRecord, StoreError> {
        let job = self.store.create_job(params.clone()).await?;
        info!(job_id = job.id, kind = %job.kind, "Job submitted.");
        self.start(job.id, params);
        Ok(job)
    }

    /// Starts a run for an existing job. Ignored while one is already active.
    pub fn start(&self, job_id: JobId, params: ScanParams) -> bool {
        let store = Arc::clone(&self.store);
        let drivers = Arc::clone(&self.drivers);
        let step = self.progress_step;
        self.controller
            .start(job_id, move |control| execute_job(store, drivers, job_id, params, control, step))
    }

    pub async fn pause(&self, job_id: JobId) -> Result<(), StoreError> {
        self.controller.pause(job_id);
        self.relabel(job_id, JobState::Running, JobState::Paused).await
    }

    pub async fn resume(&self, job_id: JobId) -> Result<(), StoreError> {
        self.controller.resume(job_id);
        self.relabel(job_id, JobState::Paused, JobState::Running).await
    }

    pub fn cancel(&self, job_id: JobId) {
        self.controller.cancel(job_id);
    }

    /// Cancels any active run and removes the job with its findings.
    pub async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        self.controller.cancel(job_id);
        self.store.delete_job(job_id).await
    }

    pub async fn job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.store.get_job(job_id).await
    }

    pub async fn findings(&self, job_id: JobId) -> Result<Vec<FindingRecord>, StoreError> {
        self.store.list_findings(job_id).await
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.controller.is_running(job_id)
    }

    /// Resolves once the job's run has finished and its outcome is persisted.
    pub async fn wait(&self, job_id: JobId) {
        self.controller.wait(job_id).await;
    }

    /// The paused label is display-only, so it is only swapped while a run is active.
    async fn relabel(&self, job_id: JobId, from: JobState, to: JobState) -> Result<(), StoreError> {
        if !self.controller.is_running(job_id) {
            return Ok(());
        }
        match self.store.get_job(job_id).await? {
            Some(job) if job.state == from => self.store.update_state(job_id, to).await,
            _ => Ok(()),
        }
    }
}

/// The body of one job run. Owns the job's state transitions.
async fn execute_job<S: JobStore>(
    store: Arc<S>,
    drivers: Arc<Drivers>,
    job_id: JobId,
    params: ScanParams,
    control: ControlHandle,
    progress_step: u8,
) {
    if let Err(e) = store.update_state(job_id, JobState::Running).await {
        warn!(job_id, error = %e, "Could not mark job as running.");
    }

    let (sink, mut ticks) = ProgressSink::channel(progress_step, PROGRESS_QUEUE);
    let writer_store = Arc::clone(&store);
    let writer = tokio::spawn(async move {
        while let Some(pct) = ticks.recv().await {
            if let Err(e) = writer_store.update_progress(job_id, pct).await {
                warn!(job_id, pct, error = %e, "Progress update failed.");
            }
        }
    });

    let outcome = {
        let progress = |pct: u8| {
            sink.report(pct);
        };
        AssertUnwindSafe(drivers.run(&params, &control, &progress))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ScanError::Panicked(panic_message(&*panic))))
    };
    drop(sink);
    if let Err(e) = writer.await {
        warn!(job_id, error = %e, "Progress writer ended abnormally.");
    }

    match outcome {
        Ok(findings) => {
            let found = findings.len();
            let kind = params.kind().finding_kind();
            if let Err(e) = store.append_findings(job_id, kind, findings).await {
                error!(job_id, error = %e, "Could not persist findings.");
                let _ = store.update_state(job_id, JobState::Failed).await;
                return;
            }
            let state = if control.is_cancelled() {
                JobState::Cancelled
            } else {
                JobState::Completed
            };
            let persisted = match store.update_progress(job_id, 100).await {
                Ok(()) => store.update_state(job_id, state).await,
                Err(e) => Err(e),
            };
            if let Err(e) = persisted {
                warn!(job_id, error = %e, "Could not record job outcome.");
            }
            info!(job_id, state = %state, found, "Job finished.");
        }
        Err(e) => {
            error!(job_id, error = %e, "Scan failed.");
            if let Err(e) = store.update_state(job_id, JobState::Failed).await {
                warn!(job_id, error = %e, "Could not mark job as failed.");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
