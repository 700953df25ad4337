// src/core/jobs.rs

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::control::{ControlHandle, DEFAULT_PAUSE_POLL};
use crate::core::models::JobId;

struct RunEntry {
    control: ControlHandle,
    task: JoinHandle<()>,
    done: watch::Receiver<bool>,
}

impl RunEntry {
    fn is_finished(&self) -> bool {
        self.task.is_finished() || *self.done.borrow()
    }
}

/// Registry of in-flight runs, one per job id.
///
/// The controller owns only control handles; job records live in the store.
/// It is created once per process and shared by reference with every entry
/// point.
pub struct JobController {
    runs: Mutex<HashMap<JobId, RunEntry>>,
    pause_poll: Duration,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.runs.lock().map(|runs| runs.len()).unwrap_or_default();
        f.debug_struct("JobController")
            .field("registered", &active)
            .field("pause_poll", &self.pause_poll)
            .finish()
    }
}

impl Default for JobController {
    fn default() -> Self {
        Self::new(DEFAULT_PAUSE_POLL)
    }
}

impl JobController {
    pub fn new(pause_poll: Duration) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            pause_poll,
        }
    }

    /// Spawns `body` for `job_id` unless a run for it is still active.
    ///
    /// The check and the registration happen under one lock, so concurrent
    /// callers for the same id start at most one run. Returns `true` when a
    /// new run was spawned.
    pub fn start<F, Fut>(&self, job_id: JobId, body: F) -> bool
    where
        F: FnOnce(ControlHandle) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut runs) = self.runs.lock() else {
            warn!(job_id, "Run registry lock poisoned, refusing to start job.");
            return false;
        };
        runs.retain(|_, entry| !entry.is_finished());

        if runs.contains_key(&job_id) {
            debug!(job_id, "Job already running, ignoring start request.");
            return false;
        }

        let control = ControlHandle::with_poll_interval(self.pause_poll);
        let (done_tx, done_rx) = watch::channel(false);
        let run = body(control.clone());
        let task = tokio::spawn(async move {
            run.await;
            let _ = done_tx.send(true);
        });

        info!(job_id, "Job run registered.");
        runs.insert(
            job_id,
            RunEntry {
                control,
                task,
                done: done_rx,
            },
        );
        true
    }

    pub fn pause(&self, job_id: JobId) {
        if let Some(control) = self.control(job_id) {
            debug!(job_id, "Pausing job.");
            control.pause();
        }
    }

    pub fn resume(&self, job_id: JobId) {
        if let Some(control) = self.control(job_id) {
            debug!(job_id, "Resuming job.");
            control.resume();
        }
    }

    pub fn cancel(&self, job_id: JobId) {
        if let Some(control) = self.control(job_id) {
            info!(job_id, "Cancelling job.");
            control.cancel();
        }
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.runs
            .lock()
            .map(|runs| runs.get(&job_id).is_some_and(|entry| !entry.is_finished()))
            .unwrap_or(false)
    }

    /// Resolves once the registered run for `job_id` has finished.
    /// Returns immediately if nothing is registered.
    pub async fn wait(&self, job_id: JobId) {
        let done = self
            .runs
            .lock()
            .ok()
            .and_then(|runs| runs.get(&job_id).map(|entry| entry.done.clone()));
        if let Some(mut done) = done {
            // An error means the task dropped its sender, i.e. it is gone too.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Drops the handles of runs that have finished.
    pub fn prune(&self) -> usize {
        let Ok(mut runs) = self.runs.lock() else {
            return 0;
        };
        let before = runs.len();
        runs.retain(|_, entry| !entry.is_finished());
        before - runs.len()
    }

    fn control(&self, job_id: JobId) -> Option<ControlHandle> {
        self.runs
            .lock()
            .ok()
            .and_then(|runs| runs.get(&job_id).map(|entry| entry.control.clone()))
    }
}
