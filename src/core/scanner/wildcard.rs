// src/core/scanner/wildcard.rs

use std::collections::HashSet;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info};

use crate::core::scanner::subdomain_scanner::NameResolver;

/// The IP set a DNS zone hands out for names that do not exist.
///
/// Any candidate resolving only to these addresses is a wildcard echo and is
/// dropped as a false positive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WildcardFilter {
    ips: HashSet<String>,
}

impl WildcardFilter {
    pub fn new(ips: impl IntoIterator<Item = String>) -> Self {
        Self {
            ips: ips.into_iter().collect(),
        }
    }

    /// Probes `domain` with a name that cannot exist and records what it resolves to.
    pub async fn detect(resolver: &dyn NameResolver, domain: &str) -> Self {
        let probe = probe_name(domain);
        debug!(probe = %probe, "Checking for wildcard DNS.");
        let filter = Self::new(resolver.resolve(&probe).await);
        if filter.is_active() {
            info!(domain, ips = ?filter.ips, "Wildcard DNS detected.");
        }
        filter
    }

    pub fn is_active(&self) -> bool {
        !self.ips.is_empty()
    }

    /// A resolution is worth reporting when it is non-empty and reaches at
    /// least one address outside the wildcard set.
    pub fn admits(&self, resolved: &[String]) -> bool {
        if resolved.is_empty() {
            return false;
        }
        !self.is_active() || resolved.iter().any(|ip| !self.ips.contains(ip))
    }
}

fn probe_name(domain: &str) -> String {
    let salt: u32 = rand::rng().random();
    format!(
        "nonexistent-{}-{salt:08x}.{domain}",
        Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn inactive_filter_admits_any_resolution() {
        let filter = WildcardFilter::default();
        assert!(filter.admits(&ips(&["10.0.0.1"])));
        assert!(!filter.admits(&[]));
    }

    #[test]
    fn subset_of_wildcard_set_is_rejected() {
        let filter = WildcardFilter::new(ips(&["1.1.1.1", "1.1.1.2"]));
        assert!(!filter.admits(&ips(&["1.1.1.1"])));
        assert!(!filter.admits(&ips(&["1.1.1.2", "1.1.1.1"])));
        assert!(filter.admits(&ips(&["1.1.1.1", "9.9.9.9"])));
    }

    #[test]
    fn probe_names_are_unique_and_scoped() {
        let a = probe_name("example.com");
        let b = probe_name("example.com");
        assert!(a.ends_with(".example.com"));
        assert!(a.starts_with("nonexistent-"));
        assert_ne!(a, b);
    }
}
