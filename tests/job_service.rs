use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reconx::app::{Drivers, ReconApp};
use reconx::config::Settings;
use reconx::core::error::StoreError;
use reconx::core::models::{FindingKind, JobState, PathParams, PortParams, ScanParams, SubdomainParams};
use reconx::core::scanner::sources::CandidateSource;
use reconx::core::scanner::{PathScanner, SubdomainScanner};
use reconx::core::scanner::path_scanner::PathScanConfig;
use reconx::core::scanner::retry::Jitter;
use reconx::core::store::MemoryJobStore;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn app() -> ReconApp<MemoryJobStore> {
    let drivers = Drivers {
        paths: PathScanner::new(PathScanConfig {
            jitter: Jitter::none(),
            ..PathScanConfig::default()
        }),
        ..Drivers::default()
    };
    ReconApp::new(MemoryJobStore::new(), &Settings::default()).with_drivers(drivers)
}

fn path_job(server: &MockServer, words: &[&str]) -> ScanParams {
    let mut params = PathParams::new(server.uri());
    params.wordlist = Some(words.iter().map(|w| w.to_string()).collect());
    ScanParams::Paths(params)
}

async fn wait_for_state(app: &ReconApp<MemoryJobStore>, id: u64, state: JobState) {
    for _ in 0..200 {
        if app.job(id).await.unwrap().map(|job| job.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {state}");
}

#[tokio::test]
async fn test_path_job_completes_with_findings() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = app();
    let job = app.submit(path_job(&server, &["admin", "nope"])).await.unwrap();
    assert_eq!(job.state, JobState::Queued);
    assert_eq!(job.progress, 0);

    app.wait(job.id).await;

    let record = app.job(job.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.progress, 100);
    assert!(!app.is_running(job.id));

    let findings = app.findings(job.id).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, FindingKind::Path);
    assert_eq!(findings[0].data["url"], format!("{}/admin", server.uri()));
    assert_eq!(findings[0].data["status"], 200);
    assert!(findings[0].data["redirected_to"].is_null());
}

#[tokio::test]
async fn test_cancel_after_start_ends_cancelled_at_100() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = app();
    let job = app.submit(path_job(&server, &["a", "b", "c", "d"])).await.unwrap();
    app.cancel(job.id);
    app.wait(job.id).await;

    let record = app.job(job.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Cancelled);
    assert_eq!(record.progress, 100);
    assert!(app.findings(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_start_is_ignored_while_running() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let app = app();
    let params = path_job(&server, &["slow"]);
    let job = app.submit(params.clone()).await.unwrap();

    assert!(!app.start(job.id, params.clone()));
    assert!(app.is_running(job.id));

    app.wait(job.id).await;
    assert_eq!(app.findings(job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_orchestration_error_marks_job_failed() {
    let app = app();
    let job = app
        .submit(ScanParams::Paths(PathParams::new("definitely not a url")))
        .await
        .unwrap();
    app.wait(job.id).await;

    let record = app.job(job.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failed);
}

#[tokio::test]
async fn test_oversized_timeout_marks_job_failed() {
    let app = app();
    let mut params = PortParams::new(vec!["127.0.0.1".into()], vec![9]);
    params.timeout = 1e30;
    let job = app.submit(ScanParams::Ports(params)).await.unwrap();
    app.wait(job.id).await;

    let record = app.job(job.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert!(!app.is_running(job.id));
}

struct PanickingSource;

#[async_trait]
impl CandidateSource for PanickingSource {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn candidates(&self, _http: &reqwest::Client, _domain: &str) -> Result<HashSet<String>, String> {
        panic!("source blew up");
    }
}

#[tokio::test]
async fn test_panicking_driver_marks_job_failed() {
    let drivers = Drivers {
        subdomains: SubdomainScanner::new(vec![Arc::new(PanickingSource)]),
        ..Drivers::default()
    };
    let app = ReconApp::new(MemoryJobStore::new(), &Settings::default()).with_drivers(drivers);
    let job = app
        .submit(ScanParams::Subdomains(SubdomainParams::new("example.com")))
        .await
        .unwrap();
    app.wait(job.id).await;

    let record = app.job(job.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert!(app.findings(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pause_and_resume_relabel_the_job() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let app = app();
    let job = app.submit(path_job(&server, &["slow", "slower"])).await.unwrap();
    wait_for_state(&app, job.id, JobState::Running).await;

    app.pause(job.id).await.unwrap();
    assert_eq!(app.job(job.id).await.unwrap().unwrap().state, JobState::Paused);

    app.resume(job.id).await.unwrap();
    assert_eq!(app.job(job.id).await.unwrap().unwrap().state, JobState::Running);

    app.wait(job.id).await;
    let record = app.job(job.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.progress, 100);
}

#[tokio::test]
async fn test_controls_for_unknown_jobs_are_acknowledged() {
    let app = app();
    app.pause(999).await.unwrap();
    app.resume(999).await.unwrap();
    app.cancel(999);
    app.wait(999).await;
    assert!(app.job(999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deleted_job_is_gone() {
    let server = MockServer::start().await;
    let app = app();
    let job = app.submit(path_job(&server, &["a"])).await.unwrap();
    app.wait(job.id).await;

    app.delete(job.id).await.unwrap();
    assert!(app.job(job.id).await.unwrap().is_none());
    assert!(matches!(app.findings(job.id).await, Err(StoreError::NotFound(id)) if id == job.id));
}
