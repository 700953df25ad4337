// src/core/scanner/subdomain_scanner.rs

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::control::ControlHandle;
use crate::core::error::{ScanError, ScanResult};
use crate::core::models::{SubdomainFinding, SubdomainParams, iso_timestamp};
use crate::core::progress::{ProgressFn, ignore_progress};
use crate::core::scanner::sources::{
    CandidateSource, DEFAULT_CRTSH_ENDPOINT, DEFAULT_DOH_ENDPOINT, DEFAULT_SONAR_ENDPOINT,
    scoped_name, standard_sources,
};
use crate::core::scanner::wildcard::WildcardFilter;
use crate::core::scanner::{Probe, fan_out, positive_seconds};

const MIXED_SOURCE: &str = "mixed";

/// Turns a name into the addresses it resolves to.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// A and AAAA addresses of `name`, de-duplicated and never containing
    /// empty entries. Lookup failures yield an empty list.
    async fn resolve(&self, name: &str) -> Vec<String>;
}

/// [`NameResolver`] backed by hickory's async resolver.
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl HickoryResolver {
    /// Builds a resolver using `nameservers` (plain IPs, port 53) or the
    /// default upstreams when none are given.
    ///
    /// # Returns
    /// `ScanError::InvalidResolver` if any nameserver is not an IP address.
    pub fn new(nameservers: Option<&[String]>, query_timeout: Duration) -> ScanResult<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = query_timeout;

        let config = match nameservers.filter(|list| !list.is_empty()) {
            Some(list) => {
                let ips = list
                    .iter()
                    .map(|raw| {
                        raw.trim()
                            .parse::<IpAddr>()
                            .map_err(|_| ScanError::InvalidResolver(raw.clone()))
                    })
                    .collect::<ScanResult<Vec<_>>>()?;
                ResolverConfig::from_parts(None, vec![], NameServerConfigGroup::from_ips_clear(&ips, 53, true))
            }
            None => ResolverConfig::default(),
        };

        Ok(Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

#[async_trait]
impl NameResolver for HickoryResolver {
    async fn resolve(&self, name: &str) -> Vec<String> {
        let (v4, v6) = tokio::join!(self.inner.ipv4_lookup(name), self.inner.ipv6_lookup(name));

        let mut ips: Vec<String> = Vec::new();
        match v4 {
            Ok(records) => ips.extend(records.iter().map(|a| a.0.to_string())),
            Err(e) => debug!(name, error = %e, "A lookup failed."),
        }
        match v6 {
            Ok(records) => ips.extend(records.iter().map(|aaaa| aaaa.0.to_string())),
            Err(e) => debug!(name, error = %e, "AAAA lookup failed."),
        }

        let mut unique = Vec::with_capacity(ips.len());
        for ip in ips {
            if !ip.trim().is_empty() && !unique.contains(&ip) {
                unique.push(ip);
            }
        }
        unique
    }
}

/// Passive enumeration followed by active resolution with wildcard filtering.
#[derive(Clone)]
pub struct SubdomainScanner {
    sources: Vec<Arc<dyn CandidateSource>>,
    resolver: Option<Arc<dyn NameResolver>>,
    user_agent: String,
}

impl fmt::Debug for SubdomainScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubdomainScanner")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("custom_resolver", &self.resolver.is_some())
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for SubdomainScanner {
    fn default() -> Self {
        Self::new(standard_sources(
            DEFAULT_CRTSH_ENDPOINT,
            DEFAULT_SONAR_ENDPOINT,
            DEFAULT_DOH_ENDPOINT,
            true,
        ))
    }
}

impl SubdomainScanner {
    pub fn new(sources: Vec<Arc<dyn CandidateSource>>) -> Self {
        Self {
            sources,
            resolver: None,
            user_agent: crate::core::DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Replaces the hickory resolver the run would otherwise build from its parameters.
    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enumerates and resolves subdomains of `params.domain`.
    ///
    /// # Arguments
    /// * `params` - Domain, optional nameservers, concurrency and per-query timeout.
    /// * `control` - Cancel/pause signals of the run.
    /// * `progress` - Percentage callback; always ends with 100.
    ///
    /// # Returns
    /// One finding per name that resolved to something other than the
    /// zone's wildcard answer.
    pub async fn run(
        &self,
        params: &SubdomainParams,
        control: &ControlHandle,
        progress: ProgressFn<'_>,
    ) -> ScanResult<Vec<SubdomainFinding>> {
        let domain = params.domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return Err(ScanError::InvalidParams("domain must not be empty".into()));
        }
        let query_timeout = positive_seconds(params.timeout, "subdomain timeout")?;

        let resolver: Arc<dyn NameResolver> = match &self.resolver {
            Some(resolver) => Arc::clone(resolver),
            None => Arc::new(HickoryResolver::new(params.resolvers.as_deref(), query_timeout)?),
        };
        let http = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(query_timeout)
            .build()?;

        info!(domain = %domain, sources = self.sources.len(), "Starting subdomain scan.");
        let candidates = self.gather(&http, &domain).await;
        if candidates.is_empty() {
            info!(domain = %domain, "No candidate subdomains found.");
            progress(100);
            return Ok(Vec::new());
        }

        let wildcard = WildcardFilter::detect(resolver.as_ref(), &domain).await;
        let prober = SubdomainProber {
            resolver,
            wildcard,
            query_timeout,
        };
        let findings = fan_out(
            &prober,
            candidates.into_iter().collect(),
            params.concurrency,
            control,
            progress,
        )
        .await?;
        info!(domain = %domain, found = findings.len(), "Subdomain scan finished.");
        Ok(findings)
    }

    /// Runs every source concurrently and merges their names that sit at or
    /// under `domain`, sorted.
    async fn gather(&self, http: &reqwest::Client, domain: &str) -> BTreeMap<String, String> {
        let results = join_all(self.sources.iter().map(|source| async move {
            (source.name(), source.candidates(http, domain).await)
        }))
        .await;

        let mut candidates: BTreeMap<String, String> = BTreeMap::new();
        for (name, outcome) in results {
            match outcome {
                Ok(found) => {
                    debug!(source = name, count = found.len(), "Source returned candidates.");
                    for subdomain in found.iter().filter_map(|raw| scoped_name(raw, domain)) {
                        candidates
                            .entry(subdomain)
                            .and_modify(|source| {
                                if source.as_str() != name {
                                    *source = MIXED_SOURCE.to_string();
                                }
                            })
                            .or_insert_with(|| name.to_string());
                    }
                }
                Err(e) => warn!(source = name, error = %e, "Candidate source failed."),
            }
        }
        candidates
    }
}

/// Standalone entry point: resolves without a job, ignoring progress.
pub async fn scan_subdomains(
    domain: &str,
    resolvers: Option<Vec<String>>,
    concurrency: usize,
    timeout_secs: f64,
) -> ScanResult<Vec<SubdomainFinding>> {
    let params = SubdomainParams {
        domain: domain.to_string(),
        resolvers,
        concurrency,
        timeout: timeout_secs,
    };
    SubdomainScanner::default()
        .run(&params, &ControlHandle::new(), &ignore_progress)
        .await
}

struct SubdomainProber {
    resolver: Arc<dyn NameResolver>,
    wildcard: WildcardFilter,
    query_timeout: Duration,
}

#[async_trait]
impl Probe for SubdomainProber {
    /// (name, contributing source)
    type Target = (String, String);
    type Finding = SubdomainFinding;

    async fn probe(&self, target: &(String, String), _control: &ControlHandle) -> Option<SubdomainFinding> {
        let (name, source) = target;
        let ips = match timeout(self.query_timeout, self.resolver.resolve(name)).await {
            Ok(ips) => ips,
            Err(_) => {
                debug!(name = %name, "Resolution timed out.");
                Vec::new()
            }
        };
        if !self.wildcard.admits(&ips) {
            debug!(name = %name, ips = ips.len(), "Dropping unresolved or wildcard name.");
            return None;
        }

        let seen = iso_timestamp(Utc::now());
        Some(SubdomainFinding {
            subdomain: name.clone(),
            source: source.clone(),
            resolved_ips: ips,
            first_seen: seen.clone(),
            last_seen: seen,
        })
    }

    fn absorb(&self, findings: &mut Vec<SubdomainFinding>, found: SubdomainFinding) {
        match findings.iter_mut().find(|f| f.subdomain == found.subdomain) {
            Some(existing) => existing.merge(found),
            None => findings.push(found),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nameservers_must_be_ip_addresses() {
        let bad = vec!["8.8.8.8".to_string(), "not-an-ip".to_string()];
        let err = HickoryResolver::new(Some(&bad), Duration::from_secs(1)).err();
        assert!(matches!(err, Some(ScanError::InvalidResolver(ref s)) if s == "not-an-ip"));
    }

    #[tokio::test]
    async fn unusable_timeout_is_rejected_before_any_lookup() {
        let err = scan_subdomains("example.com", None, 4, 1e30).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidParams(_)));
    }

    struct Fixed(&'static str, &'static [&'static str]);

    #[async_trait]
    impl CandidateSource for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn candidates(&self, _http: &reqwest::Client, _domain: &str) -> Result<HashSet<String>, String> {
            Ok(self.1.iter().map(|s| s.to_string()).collect())
        }
    }

    #[tokio::test]
    async fn names_from_several_sources_are_mixed() {
        let scanner = SubdomainScanner::new(vec![
            Arc::new(Fixed("crtsh", &["a.example.com", "b.example.com"])),
            Arc::new(Fixed("doh", &["a.example.com"])),
        ]);
        let http = reqwest::Client::new();
        let candidates = scanner.gather(&http, "example.com").await;
        assert_eq!(candidates.get("a.example.com").map(String::as_str), Some("mixed"));
        assert_eq!(candidates.get("b.example.com").map(String::as_str), Some("crtsh"));
    }

    #[tokio::test]
    async fn off_domain_names_are_dropped_when_merging() {
        let scanner = SubdomainScanner::new(vec![Arc::new(Fixed(
            "custom",
            &["WWW.Example.com.", "unrelated.org", "notexample.com", "*.api.example.com"],
        ))]);
        let http = reqwest::Client::new();
        let candidates = scanner.gather(&http, "example.com").await;
        let names: Vec<&str> = candidates.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["api.example.com", "www.example.com"]);
    }

    #[test]
    fn repeated_sightings_are_merged() {
        let prober = SubdomainProber {
            resolver: Arc::new(NoAnswers),
            wildcard: WildcardFilter::default(),
            query_timeout: Duration::from_secs(1),
        };
        let sighting = |ip: &str, source: &str, at: &str| SubdomainFinding {
            subdomain: "a.example.com".into(),
            source: source.into(),
            resolved_ips: vec![ip.into()],
            first_seen: at.into(),
            last_seen: at.into(),
        };
        let mut findings = Vec::new();
        prober.absorb(&mut findings, sighting("1.1.1.1", "crtsh", "t1"));
        prober.absorb(&mut findings, sighting("2.2.2.2", "doh", "t2"));

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resolved_ips, vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(findings[0].first_seen, "t1");
        assert_eq!(findings[0].last_seen, "t2");
        assert_eq!(findings[0].source, "mixed");
    }

    struct NoAnswers;

    #[async_trait]
    impl NameResolver for NoAnswers {
        async fn resolve(&self, _name: &str) -> Vec<String> {
            Vec::new()
        }
    }
}
