// src/config.rs

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::DEFAULT_USER_AGENT;
use crate::core::scanner::path_scanner::PathScanConfig;
use crate::core::scanner::port_scanner::PortScanConfig;
use crate::core::scanner::retry::Jitter;
use crate::core::scanner::sources::{
    CandidateSource, DEFAULT_CRTSH_ENDPOINT, DEFAULT_DOH_ENDPOINT, DEFAULT_SONAR_ENDPOINT,
    standard_sources,
};
use crate::logging;

/// File name looked up in the user's config directory.
pub const CONFIG_FILE_NAME: &str = "reconx.toml";

/// Prefix of environment overrides, e.g. `RECONX__ENGINE__PORT_CONCURRENCY=500`.
pub const ENV_PREFIX: &str = "RECONX";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine-wide settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub sources: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub pause_poll_ms: u64,
    /// Minimum gap, in percentage points, between persisted progress ticks.
    pub progress_step: u8,
    pub user_agent: String,
    pub port_concurrency: usize,
    pub path_concurrency: usize,
    pub banner_bytes: usize,
    pub banner_timeout_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pause_poll_ms: 200,
            progress_step: 5,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            port_concurrency: 200,
            path_concurrency: 50,
            banner_bytes: 128,
            banner_timeout_ms: 1000,
            jitter_min_ms: 50,
            jitter_max_ms: 200,
            backoff_base_ms: 250,
            backoff_cap_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub crtsh_url: String,
    pub sonar_url: String,
    pub doh_url: String,
    pub subfinder: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            crtsh_url: DEFAULT_CRTSH_ENDPOINT.to_string(),
            sonar_url: DEFAULT_SONAR_ENDPOINT.to_string(),
            doh_url: DEFAULT_DOH_ENDPOINT.to_string(),
            subfinder: true,
        }
    }
}

impl Settings {
    /// Layers defaults, `<config dir>/reconx.toml`, an explicit file and
    /// `RECONX__*` environment variables, lowest precedence first.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

        let user_file = logging::get_config_dir().join(CONFIG_FILE_NAME);
        if user_file.exists() {
            debug!(path = %user_file.display(), "Loading user configuration file.");
            builder = builder.add_source(config::File::from(user_file));
        }
        if let Some(path) = explicit {
            info!(path = %path.display(), "Loading configuration file.");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.port_concurrency == 0 || engine.path_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be greater than 0".into()));
        }
        if engine.jitter_min_ms > engine.jitter_max_ms {
            return Err(ConfigError::Invalid(format!(
                "jitter_min_ms ({}) exceeds jitter_max_ms ({})",
                engine.jitter_min_ms, engine.jitter_max_ms
            )));
        }
        if engine.progress_step == 0 || engine.progress_step > 100 {
            return Err(ConfigError::Invalid(format!(
                "progress_step must be within 1..=100, got {}",
                engine.progress_step
            )));
        }
        if engine.pause_poll_ms == 0 {
            return Err(ConfigError::Invalid("pause_poll_ms must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.engine.pause_poll_ms)
    }

    pub fn jitter(&self) -> Jitter {
        Jitter::new(
            Duration::from_millis(self.engine.jitter_min_ms),
            Duration::from_millis(self.engine.jitter_max_ms),
        )
    }

    pub fn port_scan_config(&self) -> PortScanConfig {
        PortScanConfig {
            concurrency: self.engine.port_concurrency,
            banner_bytes: self.engine.banner_bytes,
            banner_timeout: Duration::from_millis(self.engine.banner_timeout_ms),
        }
    }

    pub fn path_scan_config(&self) -> PathScanConfig {
        PathScanConfig {
            concurrency: self.engine.path_concurrency,
            jitter: self.jitter(),
            backoff_base: Duration::from_millis(self.engine.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.engine.backoff_cap_ms),
            user_agent: self.engine.user_agent.clone(),
        }
    }

    pub fn candidate_sources(&self) -> Vec<Arc<dyn CandidateSource>> {
        standard_sources(
            &self.sources.crtsh_url,
            &self.sources.sonar_url,
            &self.sources.doh_url,
            self.sources.subfinder,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.port_scan_config().concurrency, 200);
        assert_eq!(settings.path_scan_config().concurrency, 50);
        assert_eq!(settings.candidate_sources().len(), 4);
    }

    #[test]
    fn inverted_jitter_is_rejected() {
        let mut settings = Settings::default();
        settings.engine.jitter_min_ms = 500;
        settings.engine.jitter_max_ms = 100;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_concurrency_and_bad_step_are_rejected() {
        let mut settings = Settings::default();
        settings.engine.path_concurrency = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.engine.progress_step = 101;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("reconx-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[engine]\nport_concurrency = 17\n\n[sources]\nsubfinder = false\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.engine.port_concurrency, 17);
        assert_eq!(settings.engine.path_concurrency, 50);
        assert!(!settings.sources.subfinder);
        assert_eq!(settings.candidate_sources().len(), 3);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("reconx-definitely-missing.toml");
        assert!(matches!(Settings::load(Some(&path)), Err(ConfigError::Load(_))));
    }
}
