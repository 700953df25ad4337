// src/core/scanner/sources.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// Prefixes the DoH source checks when nothing better is known.
pub const COMMON_PREFIXES: &[&str] = &["www", "api", "dev", "staging", "mail", "vpn", "test"];

pub const DEFAULT_CRTSH_ENDPOINT: &str = "https://crt.sh";
pub const DEFAULT_SONAR_ENDPOINT: &str = "https://sonar.omnisint.io";
pub const DEFAULT_DOH_ENDPOINT: &str = "https://dns.google";

/// A provider of candidate subdomain names.
///
/// Sources are independent: a failing one contributes nothing and never
/// affects the others.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Short name recorded as a finding's `source`.
    fn name(&self) -> &'static str;

    /// Names this source knows under `domain`. Errors are for logging only.
    async fn candidates(&self, http: &reqwest::Client, domain: &str) -> Result<HashSet<String>, String>;
}

/// The four built-in sources, pointed at the given endpoints.
pub fn standard_sources(
    crtsh: &str,
    sonar: &str,
    doh: &str,
    subfinder: bool,
) -> Vec<Arc<dyn CandidateSource>> {
    let mut sources: Vec<Arc<dyn CandidateSource>> = vec![
        Arc::new(CrtShSource::new(crtsh)),
        Arc::new(PassiveDnsSource::new(sonar)),
        Arc::new(DohSource::new(doh)),
    ];
    if subfinder {
        sources.push(Arc::new(SubfinderSource));
    }
    sources
}

/// Normalizes a raw name and keeps it only if it sits at or under `domain`.
pub fn scoped_name(raw: &str, domain: &str) -> Option<String> {
    let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let name = name.strip_prefix("*.").unwrap_or(&name).to_string();
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if name.is_empty() || domain.is_empty() {
        return None;
    }
    if name == domain || name.ends_with(&format!(".{domain}")) {
        Some(name)
    } else {
        None
    }
}

// --- Certificate Transparency ---

#[derive(Debug, Deserialize)]
struct CertTransparencyEntry {
    #[serde(default)]
    name_value: String,
}

/// Names found in certificate transparency logs via crt.sh.
#[derive(Debug, Clone)]
pub struct CrtShSource {
    endpoint: String,
    timeout: Duration,
}

impl CrtShSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl CandidateSource for CrtShSource {
    fn name(&self) -> &'static str {
        "crtsh"
    }

    async fn candidates(&self, http: &reqwest::Client, domain: &str) -> Result<HashSet<String>, String> {
        let url = format!("{}/", self.endpoint.trim_end_matches('/'));
        let response = http
            .get(&url)
            .query(&[("q", format!("%.{domain}")), ("output", "json".to_string())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("crt.sh request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("crt.sh answered {}", response.status()));
        }
        let entries: Vec<CertTransparencyEntry> = response
            .json()
            .await
            .map_err(|e| format!("crt.sh returned malformed JSON: {}", e))?;

        Ok(entries
            .iter()
            .flat_map(|entry| entry.name_value.split('\n'))
            .filter_map(|name| scoped_name(name, domain))
            .collect())
    }
}

// --- Passive DNS ---

/// Names known to a passive-DNS aggregator exposing `/subdomains/<domain>`.
#[derive(Debug, Clone)]
pub struct PassiveDnsSource {
    endpoint: String,
    timeout: Duration,
}

impl PassiveDnsSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl CandidateSource for PassiveDnsSource {
    fn name(&self) -> &'static str {
        "sonar"
    }

    async fn candidates(&self, http: &reqwest::Client, domain: &str) -> Result<HashSet<String>, String> {
        let url = format!("{}/subdomains/{}", self.endpoint.trim_end_matches('/'), domain);
        let response = http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("passive DNS request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("passive DNS answered {}", response.status()));
        }
        let names: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| format!("passive DNS returned malformed JSON: {}", e))?;

        Ok(names
            .iter()
            .filter_map(|value| value.as_str())
            .filter_map(|name| scoped_name(name, domain))
            .collect())
    }
}

// --- DNS over HTTPS ---

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<serde_json::Value>,
}

/// Checks a fixed list of common prefixes against a JSON DoH `/resolve` endpoint.
#[derive(Debug, Clone)]
pub struct DohSource {
    endpoint: String,
    prefixes: Vec<String>,
    timeout: Duration,
}

impl DohSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            prefixes: COMMON_PREFIXES.iter().map(|p| p.to_string()).collect(),
            timeout: Duration::from_secs(10),
        }
    }

    async fn has_answer(&self, http: &reqwest::Client, name: &str) -> Result<bool, String> {
        let url = format!("{}/resolve", self.endpoint.trim_end_matches('/'));
        let response = http
            .get(&url)
            .query(&[("name", name), ("type", "A")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let body: DohResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(!body.answer.is_empty())
    }
}

#[async_trait]
impl CandidateSource for DohSource {
    fn name(&self) -> &'static str {
        "doh"
    }

    async fn candidates(&self, http: &reqwest::Client, domain: &str) -> Result<HashSet<String>, String> {
        let mut found = HashSet::new();
        for prefix in &self.prefixes {
            let name = format!("{prefix}.{domain}");
            match self.has_answer(http, &name).await {
                Ok(true) => {
                    found.insert(name.to_ascii_lowercase());
                }
                Ok(false) => {}
                Err(e) => debug!(name = %name, error = %e, "DoH query failed."),
            }
        }
        Ok(found)
    }
}

// --- Local tooling ---

/// Output of a locally installed `subfinder`, if there is one.
#[derive(Debug, Clone, Default)]
pub struct SubfinderSource;

#[async_trait]
impl CandidateSource for SubfinderSource {
    fn name(&self) -> &'static str {
        "subfinder"
    }

    async fn candidates(&self, _http: &reqwest::Client, domain: &str) -> Result<HashSet<String>, String> {
        let Ok(exe) = which::which("subfinder") else {
            return Ok(HashSet::new());
        };
        let output = Command::new(exe)
            .args(["-silent", "-d", domain])
            .stderr(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| format!("subfinder failed to run: {}", e))?;
        if !output.status.success() {
            warn!(status = %output.status, "subfinder exited unsuccessfully.");
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| scoped_name(line, domain))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_scoped_to_the_domain() {
        assert_eq!(scoped_name("WWW.Example.com.", "example.com"), Some("www.example.com".into()));
        assert_eq!(scoped_name("*.api.example.com", "example.com"), Some("api.example.com".into()));
        assert_eq!(scoped_name("example.com", "example.com"), Some("example.com".into()));
        assert_eq!(scoped_name("notexample.com", "example.com"), None);
        assert_eq!(scoped_name("  ", "example.com"), None);
    }
}
