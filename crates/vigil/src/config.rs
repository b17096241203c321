use rand::RngExt;
use std::time::Duration;

use url::Url;

use crate::adapter::MediaSurface;
use crate::error::EngineError;
use crate::tier::StreamEndpoints;

/// Retry policy for the active tier.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum re-initializations of the same tier before advancing.
    pub max_retries: u32,
    /// Fixed delay before re-initializing the same tier.
    pub retry_delay: Duration,
    /// When true, adds random jitter of [0, retry_delay/2) to each retry to
    /// prevent synchronized reconnect storms against a struggling origin.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(4),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Delay to apply before the next same-tier retry.
    pub fn delay(&self) -> Duration {
        if !self.jitter {
            return self.retry_delay;
        }
        let jitter_range_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range_ms == 0 {
            return self.retry_delay;
        }
        let jitter_ms = rand::rng().random_range(0..jitter_range_ms);
        self.retry_delay + Duration::from_millis(jitter_ms)
    }
}

/// Buffer-health thresholds for the active session.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Maximum silence between fragment arrivals before the watchdog trips.
    pub stall_timeout: Duration,
    /// Stall events tolerated (since the last fragment) before escalating.
    pub stall_threshold: u32,
    /// Grace window after manifest-ready during which stalls never escalate.
    pub stability_window: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(20),
            stall_threshold: 5,
            stability_window: Duration::from_secs(15),
        }
    }
}

/// Background recovery probing against the preferred tier.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Delay before re-probing after an unsuccessful attempt.
    pub retry_delay: Duration,
    /// Observation window after the probe's manifest becomes ready.
    pub stability_window: Duration,
    /// Fragments that must arrive within the window to declare recovery.
    pub min_fragments: u32,
    /// Budget for the probe to produce a manifest before it is abandoned.
    pub manifest_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(30),
            stability_window: Duration::from_secs(15),
            min_fragments: 3,
            manifest_timeout: Duration::from_secs(10),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub endpoints: StreamEndpoints,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub probe: ProbeConfig,
    /// Recent activity-journal entries retained for operators.
    pub journal_capacity: usize,
    /// Viewer surface descriptor handed to engine sessions.
    pub surface: MediaSurface,
}

pub const DEFAULT_JOURNAL_CAPACITY: usize = 50;

impl FailoverConfig {
    pub fn new(primary: Url) -> Self {
        Self {
            endpoints: StreamEndpoints::new(primary),
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
            probe: ProbeConfig::default(),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            surface: MediaSurface::default(),
        }
    }

    pub fn builder(primary: Url) -> FailoverConfigBuilder {
        FailoverConfigBuilder::new(primary)
    }
}

/// Builder for [`FailoverConfig`].
#[derive(Debug)]
pub struct FailoverConfigBuilder {
    config: FailoverConfig,
}

impl FailoverConfigBuilder {
    pub fn new(primary: Url) -> Self {
        Self {
            config: FailoverConfig::new(primary),
        }
    }

    pub fn with_secondary(mut self, url: Url) -> Self {
        self.config.endpoints.secondary = Some(url);
        self
    }

    pub fn with_fallback(mut self, url: Url) -> Self {
        self.config.endpoints.fallback = Some(url);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.config.health = health;
        self
    }

    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.config.probe = probe;
        self
    }

    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.config.journal_capacity = capacity;
        self
    }

    pub fn with_surface(mut self, surface: MediaSurface) -> Self {
        self.config.surface = surface;
        self
    }

    pub fn build(self) -> Result<FailoverConfig, EngineError> {
        if self.config.journal_capacity == 0 {
            return Err(EngineError::Internal {
                reason: "journal capacity must be at least 1".to_string(),
            });
        }
        Ok(self.config)
    }
}
