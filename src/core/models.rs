// src/core/models.rs

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifier handed out by the job store.
pub type JobId = u64;

// --- Job Models ---

/// The three scan families a job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobKind {
    Subdomains,
    Ports,
    Paths,
}

impl JobKind {
    /// The tag attached to every finding this kind of job produces.
    pub fn finding_kind(self) -> FindingKind {
        match self {
            JobKind::Subdomains => FindingKind::Subdomain,
            JobKind::Ports => FindingKind::Port,
            JobKind::Paths => FindingKind::Path,
        }
    }
}

/// Persisted job lifecycle label.
///
/// `Paused` is display-only: drivers observe pausing through the control
/// handle, never through this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

/// A job as the persistence layer sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub params: ScanParams,
    pub state: JobState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Scan Parameters ---

fn default_concurrency() -> usize {
    50
}

fn default_subdomain_timeout() -> f64 {
    30.0
}

fn default_port_timeout() -> f64 {
    5.0
}

fn default_path_timeout() -> f64 {
    10.0
}

fn default_retries() -> u32 {
    1
}

fn default_ports() -> Vec<u16> {
    vec![80, 443, 22, 3389]
}

/// Parameters for a subdomain enumeration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubdomainParams {
    pub domain: String,
    #[serde(default)]
    pub resolvers: Option<Vec<String>>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-query timeout in seconds.
    #[serde(default = "default_subdomain_timeout")]
    pub timeout: f64,
}

impl SubdomainParams {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            resolvers: None,
            concurrency: default_concurrency(),
            timeout: default_subdomain_timeout(),
        }
    }
}

/// Parameters for a TCP port probing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortParams {
    pub targets: Vec<String>,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// Connect timeout in seconds.
    #[serde(default = "default_port_timeout")]
    pub timeout: f64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl PortParams {
    pub fn new(targets: Vec<String>, ports: Vec<u16>) -> Self {
        Self {
            targets,
            ports,
            timeout: default_port_timeout(),
            retries: default_retries(),
        }
    }
}

/// Proxy selection for the path prober.
///
/// A single URL applies to every scheme; a map is keyed by URL scheme and
/// falls back to its `http` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyMap {
    Single(String),
    ByScheme(BTreeMap<String, String>),
}

impl ProxyMap {
    pub fn pick(&self, scheme: &str) -> Option<&str> {
        match self {
            ProxyMap::Single(url) => Some(url.as_str()),
            ProxyMap::ByScheme(map) => map
                .get(&scheme.to_ascii_lowercase())
                .or_else(|| map.get("http"))
                .map(String::as_str),
        }
    }
}

/// Parameters for a web path discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathParams {
    pub base_url: String,
    #[serde(default)]
    pub wordlist: Option<Vec<String>>,
    #[serde(default)]
    pub status_include: Option<Vec<u16>>,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    /// Either `user:pass` (basic auth) or `Authorization: <value>`.
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub proxies: Option<ProxyMap>,
    /// Total request timeout in seconds.
    #[serde(default = "default_path_timeout")]
    pub timeout: f64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub qps_per_host: Option<f64>,
}

impl PathParams {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            wordlist: None,
            status_include: None,
            extensions: None,
            auth: None,
            proxies: None,
            timeout: default_path_timeout(),
            retries: default_retries(),
            qps_per_host: None,
        }
    }
}

/// Parameters captured at submission, tagged by job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScanParams {
    Subdomains(SubdomainParams),
    Ports(PortParams),
    Paths(PathParams),
}

impl ScanParams {
    pub fn kind(&self) -> JobKind {
        match self {
            ScanParams::Subdomains(_) => JobKind::Subdomains,
            ScanParams::Ports(_) => JobKind::Ports,
            ScanParams::Paths(_) => JobKind::Paths,
        }
    }
}

// --- Finding Models ---

/// Tag stored alongside every persisted finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FindingKind {
    Subdomain,
    Port,
    Path,
}

/// A live subdomain. Timestamps are ISO-8601 strings with a `+00:00` offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubdomainFinding {
    pub subdomain: String,
    pub source: String,
    pub resolved_ips: Vec<String>,
    pub first_seen: String,
    pub last_seen: String,
}

impl SubdomainFinding {
    /// Folds a repeated sighting of the same name into this entry.
    pub fn merge(&mut self, other: SubdomainFinding) {
        for ip in other.resolved_ips {
            if !self.resolved_ips.contains(&ip) {
                self.resolved_ips.push(ip);
            }
        }
        if other.source != self.source {
            self.source = "mixed".to_string();
        }
        self.last_seen = other.last_seen;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PortStatus {
    Open,
    Closed,
}

/// Certificate details pulled from a TLS handshake on an open port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsInfo {
    pub subject: BTreeMap<String, String>,
    pub issuer: BTreeMap<String, String>,
    #[serde(rename = "notAfter")]
    pub not_after: String,
    #[serde(rename = "notBefore")]
    pub not_before: String,
}

/// Outcome of probing one (host, port) pair. Closed ports are reported too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortFinding {
    pub target: String,
    pub port: u16,
    pub status: PortStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_info: Option<TlsInfo>,
}

/// An accessible path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathFinding {
    pub url: String,
    pub status: u16,
    pub length: u64,
    pub title: String,
    pub content_type: String,
    pub redirected_to: Option<String>,
}

/// Any finding, serialized as its bare payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Finding {
    Subdomain(SubdomainFinding),
    Port(PortFinding),
    Path(PathFinding),
}

impl From<SubdomainFinding> for Finding {
    fn from(value: SubdomainFinding) -> Self {
        Finding::Subdomain(value)
    }
}

impl From<PortFinding> for Finding {
    fn from(value: PortFinding) -> Self {
        Finding::Port(value)
    }
}

impl From<PathFinding> for Finding {
    fn from(value: PathFinding) -> Self {
        Finding::Path(value)
    }
}

/// A finding as stored against a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRecord {
    pub id: u64,
    pub job_id: JobId,
    pub kind: FindingKind,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Formats a timestamp the way finding payloads carry it,
/// e.g. `2025-01-02T03:04:05.123456+00:00`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}
