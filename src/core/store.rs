// src/core/store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::error::StoreError;
use crate::core::models::{
    Finding, FindingKind, FindingRecord, JobId, JobRecord, JobState, ScanParams,
};

/// Persistence boundary for jobs and their findings.
///
/// Updates against a job that no longer exists are silent no-ops: a job can
/// be deleted while its run is still unwinding.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn create_job(&self, params: ScanParams) -> Result<JobRecord, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    async fn update_state(&self, id: JobId, state: JobState) -> Result<(), StoreError>;

    async fn update_progress(&self, id: JobId, progress: u8) -> Result<(), StoreError>;

    /// Appends findings tagged with `kind`; returns how many were stored.
    async fn append_findings(
        &self,
        id: JobId,
        kind: FindingKind,
        findings: Vec<Finding>,
    ) -> Result<usize, StoreError>;

    async fn list_findings(&self, id: JobId) -> Result<Vec<FindingRecord>, StoreError>;

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    next_job: JobId,
    next_finding: u64,
    jobs: HashMap<JobId, JobRecord>,
    findings: HashMap<JobId, Vec<FindingRecord>>,
}

/// In-process store used by the CLI and the tests.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: RwLock<Tables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Rows a path job should never persist: a finding without a URL is useless.
fn is_storable(finding: &Finding) -> bool {
    match finding {
        Finding::Path(path) => !path.url.trim().is_empty(),
        _ => true,
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, params: ScanParams) -> Result<JobRecord, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_job += 1;
        let now = Utc::now();
        let record = JobRecord {
            id: tables.next_job,
            kind: params.kind(),
            params,
            state: JobState::Queued,
            progress: 0,
            created_at: now,
            updated_at: now,
        };
        tables.jobs.insert(record.id, record.clone());
        debug!(job_id = record.id, kind = %record.kind, "Job record created.");
        Ok(record)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn update_state(&self, id: JobId, state: JobState) -> Result<(), StoreError> {
        if let Some(job) = self.tables.write().await.jobs.get_mut(&id) {
            job.state = state;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_progress(&self, id: JobId, progress: u8) -> Result<(), StoreError> {
        if let Some(job) = self.tables.write().await.jobs.get_mut(&id) {
            job.progress = job.progress.max(progress.min(100));
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn append_findings(
        &self,
        id: JobId,
        kind: FindingKind,
        findings: Vec<Finding>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.jobs.contains_key(&id) {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(findings.len());
        for finding in findings.iter().filter(|f| is_storable(f)) {
            tables.next_finding += 1;
            rows.push(FindingRecord {
                id: tables.next_finding,
                job_id: id,
                kind,
                data: serde_json::to_value(finding)?,
                created_at: Utc::now(),
            });
        }
        let stored = rows.len();
        tables.findings.entry(id).or_default().extend(rows);
        Ok(stored)
    }

    async fn list_findings(&self, id: JobId) -> Result<Vec<FindingRecord>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.jobs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(tables.findings.get(&id).cloned().unwrap_or_default())
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.jobs.remove(&id);
        tables.findings.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{PathFinding, PathParams};

    fn path(url: &str) -> Finding {
        Finding::Path(PathFinding {
            url: url.to_string(),
            status: 200,
            length: 0,
            title: String::new(),
            content_type: String::new(),
            redirected_to: None,
        })
    }

    #[tokio::test]
    async fn updates_to_deleted_jobs_are_ignored() {
        let store = MemoryJobStore::new();
        let job = store
            .create_job(ScanParams::Paths(PathParams::new("http://h")))
            .await
            .unwrap();
        store.delete_job(job.id).await.unwrap();

        store.update_state(job.id, JobState::Running).await.unwrap();
        store.update_progress(job.id, 50).await.unwrap();
        let stored = store
            .append_findings(job.id, FindingKind::Path, vec![path("http://h/a")])
            .await
            .unwrap();
        assert_eq!(stored, 0);
        assert!(store.get_job(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_never_moves_backwards() {
        let store = MemoryJobStore::new();
        let job = store
            .create_job(ScanParams::Paths(PathParams::new("http://h")))
            .await
            .unwrap();
        store.update_progress(job.id, 40).await.unwrap();
        store.update_progress(job.id, 10).await.unwrap();
        assert_eq!(store.get_job(job.id).await.unwrap().unwrap().progress, 40);
    }

    #[tokio::test]
    async fn path_rows_without_url_are_skipped() {
        let store = MemoryJobStore::new();
        let job = store
            .create_job(ScanParams::Paths(PathParams::new("http://h")))
            .await
            .unwrap();
        let stored = store
            .append_findings(job.id, FindingKind::Path, vec![path("http://h/a"), path("  ")])
            .await
            .unwrap();
        assert_eq!(stored, 1);

        let rows = store.list_findings(job.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, FindingKind::Path);
        assert_eq!(rows[0].data["url"], "http://h/a");
    }
}
