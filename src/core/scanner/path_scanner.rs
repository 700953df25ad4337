// src/core/scanner/path_scanner.rs

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Method, Proxy, Response, redirect};
use scraper::{Html, Selector};
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

use crate::core::control::ControlHandle;
use crate::core::error::{ScanError, ScanResult};
use crate::core::models::{PathFinding, PathParams};
use crate::core::progress::{ProgressFn, ignore_progress};
use crate::core::scanner::crawler::crawl;
use crate::core::scanner::rate_limiter::HostPacer;
use crate::core::scanner::retry::{
    DEFAULT_ACCEPTED_STATUSES, Jitter, RetryPolicy, StatusClass, classify_status, head_unsupported,
};
use crate::core::scanner::{Probe, dedup_targets, fan_out, positive_seconds};

/// Words probed when the caller supplies no wordlist.
pub const DEFAULT_WORDLIST: &[&str] = &["admin", "login", "api", "dashboard"];

const TITLE_MAX_CHARS: usize = 120;

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

/// Tunables of the path prober that are not part of a job's parameters.
#[derive(Debug, Clone)]
pub struct PathScanConfig {
    pub concurrency: usize,
    pub jitter: Jitter,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub user_agent: String,
}

impl Default for PathScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            jitter: Jitter::default(),
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(2),
            user_agent: crate::core::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// How a job's `auth` string is attached to requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Basic { user: String, password: String },
    Header { name: String, value: String },
}

impl Credential {
    /// `Authorization: <value>` becomes that header, `user:pass` becomes
    /// HTTP basic auth. Anything else is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.to_ascii_lowercase().starts_with("authorization:") {
            let (name, value) = raw.split_once(':')?;
            return Some(Credential::Header {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
        let (user, password) = raw.split_once(':')?;
        Some(Credential::Basic {
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}

/// Web path discovery over a wordlist plus a one-level crawl of the base URL.
#[derive(Debug, Clone, Default)]
pub struct PathScanner {
    config: PathScanConfig,
}

impl PathScanner {
    pub fn new(config: PathScanConfig) -> Self {
        Self { config }
    }

    /// Probes every candidate path under `params.base_url`.
    ///
    /// # Arguments
    /// * `params` - Base URL, wordlist, filters, credentials, proxies and pacing.
    /// * `control` - Cancel/pause signals of the run.
    /// * `progress` - Percentage callback; always ends with 100.
    ///
    /// # Returns
    /// One finding per URL whose status landed in the accepted set.
    pub async fn run(
        &self,
        params: &PathParams,
        control: &ControlHandle,
        progress: ProgressFn<'_>,
    ) -> ScanResult<Vec<PathFinding>> {
        let base_url = params.base_url.trim();
        let base = Url::parse(base_url).map_err(|source| ScanError::InvalidUrl {
            url: params.base_url.clone(),
            source,
        })?;
        let request_timeout = positive_seconds(params.timeout, "path timeout")?;
        if let Some(qps) = params.qps_per_host.filter(|q| q.is_finite() && *q > 0.0) {
            positive_seconds(1.0 / qps, "request spacing")?;
        }

        let credential = params.auth.as_deref().and_then(Credential::parse);
        let http = self.build_client(request_timeout, params, credential.as_ref())?;

        let mut targets = enumerate_candidates(base_url, params);
        targets.extend(crawl(&http, &base).await);
        let targets = dedup_targets(targets);

        let accepted: HashSet<u16> = match params.status_include.as_deref() {
            Some(list) if !list.is_empty() => list.iter().copied().collect(),
            _ => DEFAULT_ACCEPTED_STATUSES.into_iter().collect(),
        };

        info!(base = %base, targets = targets.len(), "Starting path scan.");
        let prober = PathProber {
            http,
            basic: match credential {
                Some(Credential::Basic { user, password }) => Some((user, password)),
                _ => None,
            },
            accepted,
            policy: RetryPolicy::new(params.retries)
                .with_backoff(self.config.backoff_base, self.config.backoff_cap)
                .with_jitter(self.config.jitter),
            jitter: self.config.jitter,
            pacer: HostPacer::new(params.qps_per_host, self.config.jitter),
            requests: AtomicU64::new(0),
        };
        let findings = fan_out(&prober, targets, self.config.concurrency, control, progress).await?;
        info!(
            base = %base,
            found = findings.len(),
            requests = prober.requests.load(Ordering::Relaxed),
            "Path scan finished."
        );
        Ok(findings)
    }

    fn build_client(
        &self,
        request_timeout: Duration,
        params: &PathParams,
        credential: Option<&Credential>,
    ) -> ScanResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        if let Some(Credential::Header { name, value }) = credential {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ScanError::InvalidParams(format!("bad auth header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ScanError::InvalidParams(format!("bad auth header value: {}", e)))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(self.config.user_agent.as_str())
            .default_headers(headers)
            .timeout(request_timeout)
            .redirect(redirect::Policy::none());
        if let Some(proxies) = params.proxies.clone() {
            builder = builder.proxy(Proxy::custom(move |url| {
                proxies.pick(url.scheme()).map(str::to_string)
            }));
        }
        Ok(builder.build()?)
    }
}

/// Standalone entry point: probes without a job, ignoring progress.
pub async fn scan_paths(params: &PathParams) -> ScanResult<Vec<PathFinding>> {
    PathScanner::default()
        .run(params, &ControlHandle::new(), &ignore_progress)
        .await
}

/// Each word bare and with every extension, rooted at `base_url`.
pub fn enumerate_candidates(base_url: &str, params: &PathParams) -> Vec<String> {
    let root = base_url.trim_end_matches('/');
    let words: Vec<&str> = match params.wordlist.as_deref() {
        Some(list) if !list.is_empty() => list.iter().map(String::as_str).collect(),
        _ => DEFAULT_WORDLIST.to_vec(),
    };
    let extensions: Vec<&str> = params
        .extensions
        .iter()
        .flatten()
        .map(|ext| ext.trim().trim_start_matches('.'))
        .filter(|ext| !ext.is_empty())
        .collect();

    let mut candidates = Vec::new();
    for word in words {
        let word = word.trim().trim_start_matches('/');
        if word.is_empty() {
            continue;
        }
        candidates.push(format!("{root}/{word}"));
        for ext in &extensions {
            candidates.push(format!("{root}/{word}.{ext}"));
        }
    }
    candidates
}

/// `<title>` text, trimmed and capped.
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .select(&TITLE)
        .next()
        .map(|title| {
            title
                .text()
                .collect::<String>()
                .trim()
                .chars()
                .take(TITLE_MAX_CHARS)
                .collect()
        })
        .unwrap_or_default()
}

enum Attempt {
    Found(PathFinding),
    Dropped,
    Retry(String),
}

struct PathProber {
    http: reqwest::Client,
    basic: Option<(String, String)>,
    accepted: HashSet<u16>,
    policy: RetryPolicy,
    jitter: Jitter,
    pacer: HostPacer,
    requests: AtomicU64,
}

impl PathProber {
    async fn attempt(&self, url: &Url) -> Attempt {
        self.pace(url).await;
        match self.send(Method::HEAD, url).await {
            Ok(response) if !head_unsupported(response.status().as_u16()) => {
                return self.classify(url, response, false).await;
            }
            Ok(response) => debug!(url = %url, status = %response.status(), "HEAD unsupported, falling back to GET."),
            Err(e) => debug!(url = %url, error = %e, "HEAD failed, falling back to GET."),
        }

        self.pace(url).await;
        match self.send(Method::GET, url).await {
            Ok(response) => self.classify(url, response, true).await,
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }

    async fn pace(&self, url: &Url) {
        let delay = self.jitter.sample();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.pacer.wait(url).await;
    }

    async fn send(&self, method: Method, url: &Url) -> reqwest::Result<Response> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut request = self.http.request(method, url.clone());
        if let Some((user, password)) = &self.basic {
            request = request.basic_auth(user, Some(password));
        }
        request.send().await
    }

    async fn classify(&self, url: &Url, response: Response, read_body: bool) -> Attempt {
        let status = response.status().as_u16();
        match classify_status(status, &self.accepted) {
            StatusClass::Rejected => return Attempt::Dropped,
            StatusClass::Retryable => return Attempt::Retry(format!("status {}", status)),
            StatusClass::Accepted => {}
        }

        let headers = response.headers();
        let content_type = header_str(headers, CONTENT_TYPE).unwrap_or_default();
        let redirected_to = header_str(headers, LOCATION);
        let declared_length = header_str(headers, CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let (length, title) = if read_body {
            match response.text().await {
                Ok(body) => (body.chars().count() as u64, extract_title(&body)),
                Err(e) => return Attempt::Retry(e.to_string()),
            }
        } else {
            (declared_length, String::new())
        };

        Attempt::Found(PathFinding {
            url: url.to_string(),
            status,
            length,
            title,
            content_type,
            redirected_to,
        })
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl Probe for PathProber {
    type Target = String;
    type Finding = PathFinding;

    async fn probe(&self, target: &String, control: &ControlHandle) -> Option<PathFinding> {
        let Ok(url) = Url::parse(target) else {
            debug!(url = %target, "Skipping unparsable candidate.");
            return None;
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            if !control.admit().await {
                return None;
            }
            match self.attempt(&url).await {
                Attempt::Found(finding) => {
                    debug!(url = %url, status = finding.status, "Path found.");
                    return Some(finding);
                }
                Attempt::Dropped => return None,
                Attempt::Retry(reason) => {
                    debug!(url = %url, attempt, reason = %reason, "Retryable failure.");
                    if !self.policy.should_retry(attempt) {
                        return None;
                    }
                    sleep(self.policy.backoff(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_parsed() {
        assert_eq!(
            Credential::parse("alice:s3:cret"),
            Some(Credential::Basic {
                user: "alice".into(),
                password: "s3:cret".into()
            })
        );
        assert_eq!(
            Credential::parse("Authorization: Bearer abc"),
            Some(Credential::Header {
                name: "Authorization".into(),
                value: "Bearer abc".into()
            })
        );
        assert_eq!(Credential::parse("token-without-colon"), None);
    }

    #[test]
    fn candidates_cover_words_and_extensions() {
        let mut params = PathParams::new("http://example.com/");
        params.wordlist = Some(vec!["admin".into(), "/backup".into(), " ".into()]);
        params.extensions = Some(vec![".php".into(), "bak".into()]);

        let candidates = enumerate_candidates(&params.base_url, &params);
        assert_eq!(
            candidates,
            vec![
                "http://example.com/admin",
                "http://example.com/admin.php",
                "http://example.com/admin.bak",
                "http://example.com/backup",
                "http://example.com/backup.php",
                "http://example.com/backup.bak",
            ]
        );
    }

    #[test]
    fn default_wordlist_is_used_when_empty() {
        let mut params = PathParams::new("http://example.com");
        params.wordlist = Some(Vec::new());
        assert_eq!(enumerate_candidates(&params.base_url, &params).len(), DEFAULT_WORDLIST.len());
    }

    #[test]
    fn titles_are_trimmed_and_capped() {
        assert_eq!(extract_title("<html><head><title>  Admin Panel \n</title></head></html>"), "Admin Panel");
        assert_eq!(extract_title("<p>no title</p>"), "");
        let long = format!("<title>{}</title>", "x".repeat(500));
        assert_eq!(extract_title(&long).chars().count(), 120);
    }

    #[tokio::test]
    async fn malformed_base_url_is_rejected() {
        let err = scan_paths(&PathParams::new("not a url")).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn oversized_timeout_and_vanishing_rate_are_rejected() {
        let mut params = PathParams::new("http://127.0.0.1:9");
        params.timeout = 1e30;
        let err = scan_paths(&params).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidParams(_)));

        let mut params = PathParams::new("http://127.0.0.1:9");
        params.qps_per_host = Some(1e-320);
        let err = scan_paths(&params).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidParams(_)));
    }
}
