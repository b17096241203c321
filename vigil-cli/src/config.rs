//! CLI configuration: an optional TOML file layered under command-line
//! flags. Flags always win; anything left unset falls back to the engine
//! defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use vigil_engine::{FailoverConfig, HealthConfig, ProbeConfig, RetryConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: EndpointsSection,
    #[serde(default)]
    pub tuning: TuningSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointsSection {
    pub primary: Option<Url>,
    pub secondary: Option<Url>,
    pub fallback: Option<Url>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningSection {
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub retry_jitter: Option<bool>,
    pub stall_timeout_secs: Option<u64>,
    pub stall_threshold: Option<u32>,
    pub probe_retry_delay_secs: Option<u64>,
    pub stability_window_secs: Option<u64>,
    pub min_probe_fragments: Option<u32>,
    pub journal_capacity: Option<usize>,
}

impl AppConfig {
    /// Load the config file, or defaults when none exists. An explicit path
    /// that cannot be read is an error; the implicit default path is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("invalid configuration in {}", path.display())),
            Err(_) if !explicit => Ok(Self::default()),
            Err(e) => {
                Err(anyhow::Error::from(e)
                    .context(format!("cannot read configuration {}", path.display())))
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vigil").join("config.toml"))
    }

    /// Overlay values onto the engine defaults, producing the final
    /// [`FailoverConfig`]. Flag overrides are applied onto the sections
    /// before this is called; `primary` must have come from one of the two.
    pub fn into_failover_config(self) -> Result<FailoverConfig> {
        let primary = self
            .endpoints
            .primary
            .context("no primary endpoint configured (use --primary or the config file)")?;

        let tuning = self.tuning;
        let retry_defaults = RetryConfig::default();
        let health_defaults = HealthConfig::default();
        let probe_defaults = ProbeConfig::default();

        let stability_window = tuning
            .stability_window_secs
            .map(Duration::from_secs)
            .unwrap_or(health_defaults.stability_window);

        let retry = RetryConfig {
            max_retries: tuning.max_retries.unwrap_or(retry_defaults.max_retries),
            retry_delay: tuning
                .retry_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(retry_defaults.retry_delay),
            jitter: tuning.retry_jitter.unwrap_or(retry_defaults.jitter),
        };
        let health = HealthConfig {
            stall_timeout: tuning
                .stall_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(health_defaults.stall_timeout),
            stall_threshold: tuning
                .stall_threshold
                .unwrap_or(health_defaults.stall_threshold),
            stability_window,
        };
        let probe = ProbeConfig {
            retry_delay: tuning
                .probe_retry_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(probe_defaults.retry_delay),
            stability_window,
            min_fragments: tuning
                .min_probe_fragments
                .unwrap_or(probe_defaults.min_fragments),
            manifest_timeout: probe_defaults.manifest_timeout,
        };

        let mut builder = FailoverConfig::builder(primary)
            .with_retry(retry)
            .with_health(health)
            .with_probe(probe);
        if let Some(capacity) = tuning.journal_capacity {
            builder = builder.with_journal_capacity(capacity);
        }
        if let Some(secondary) = self.endpoints.secondary {
            builder = builder.with_secondary(secondary);
        }
        if let Some(fallback) = self.endpoints.fallback {
            builder = builder.with_fallback(fallback);
        }

        builder
            .build()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))
    }
}
