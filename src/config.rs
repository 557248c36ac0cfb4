//! Coordinator configuration
//!
//! Provides CoordinatorConfig with a validating builder, mirroring how the
//! scheduling knobs are surfaced to the host process.

use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default number of project jobs allowed to run at the same time
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1;

/// Default period between incremental runs of one project (5 minutes)
pub const DEFAULT_INCREMENTAL_PERIOD_SECS: u64 = 5 * 60;

/// Default period between full reindexes of one project (12 hours)
///
/// Zero disables scheduled full runs; explicit force requests still apply.
pub const DEFAULT_FULL_UPDATE_PERIOD_SECS: u64 = 12 * 60 * 60;

/// Polling interval while projects are waiting to be dispatched
pub const DEFAULT_FAST_INTERVAL_SECS: u64 = 2;

/// Polling interval while nothing is due
pub const DEFAULT_SLOW_INTERVAL_SECS: u64 = 30;

/// Minimum time between two refills of the pending queue
pub const DEFAULT_QUEUE_REFILL_INTERVAL_SECS: u64 = 30;

/// How long a project list fetched from the remote source is reused (30 minutes)
pub const DEFAULT_PROJECT_KEYS_REFRESH_SECS: u64 = 30 * 60;

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Scheduling configuration of one coordinator instance
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Upper bound on concurrently running project jobs
    pub max_concurrent_jobs: usize,

    /// A project is due for incremental work once its last run start is older than this
    pub incremental_period: Duration,

    /// A project is due for a full run once its last full completion is older than this
    pub full_update_period: Duration,

    /// Polling interval used while there is work queued
    pub fast_interval: Duration,

    /// Polling interval used while idle
    pub slow_interval: Duration,

    /// Throttle for refilling an empty pending queue
    pub queue_refill_interval: Duration,

    /// Lifetime of the cached remote project list
    pub project_keys_refresh_interval: Duration,

    /// Explicit project list; when absent the remote source is asked
    pub project_keys: Option<Vec<String>>,

    /// Projects never indexed
    pub excluded_project_keys: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            incremental_period: Duration::from_secs(DEFAULT_INCREMENTAL_PERIOD_SECS),
            full_update_period: Duration::from_secs(DEFAULT_FULL_UPDATE_PERIOD_SECS),
            fast_interval: Duration::from_secs(DEFAULT_FAST_INTERVAL_SECS),
            slow_interval: Duration::from_secs(DEFAULT_SLOW_INTERVAL_SECS),
            queue_refill_interval: Duration::from_secs(DEFAULT_QUEUE_REFILL_INTERVAL_SECS),
            project_keys_refresh_interval: Duration::from_secs(DEFAULT_PROJECT_KEYS_REFRESH_SECS),
            project_keys: None,
            excluded_project_keys: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Start building a configuration from defaults
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::new()
    }

    /// Whether scheduled (non-forced) full runs are enabled
    pub fn full_updates_enabled(&self) -> bool {
        !self.full_update_period.is_zero()
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for CoordinatorConfig with validation and defaults
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    max_concurrent_jobs: Option<usize>,
    incremental_period: Option<Duration>,
    full_update_period: Option<Duration>,
    fast_interval: Option<Duration>,
    slow_interval: Option<Duration>,
    queue_refill_interval: Option<Duration>,
    project_keys_refresh_interval: Option<Duration>,
    project_keys: Option<Vec<String>>,
    excluded_project_keys: Vec<String>,
}

impl CoordinatorConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrent project jobs
    pub fn max_concurrent_jobs(mut self, count: usize) -> Self {
        self.max_concurrent_jobs = Some(count);
        self
    }

    /// Set the incremental due period
    pub fn incremental_period(mut self, period: Duration) -> Self {
        self.incremental_period = Some(period);
        self
    }

    /// Set the full update due period (zero disables scheduled full runs)
    pub fn full_update_period(mut self, period: Duration) -> Self {
        self.full_update_period = Some(period);
        self
    }

    /// Set the polling interval used while work is queued
    pub fn fast_interval(mut self, interval: Duration) -> Self {
        self.fast_interval = Some(interval);
        self
    }

    /// Set the polling interval used while idle
    pub fn slow_interval(mut self, interval: Duration) -> Self {
        self.slow_interval = Some(interval);
        self
    }

    /// Set the pending queue refill throttle
    pub fn queue_refill_interval(mut self, interval: Duration) -> Self {
        self.queue_refill_interval = Some(interval);
        self
    }

    /// Set how long a remote project list is cached
    pub fn project_keys_refresh_interval(mut self, interval: Duration) -> Self {
        self.project_keys_refresh_interval = Some(interval);
        self
    }

    /// Track exactly these projects instead of asking the remote source
    pub fn project_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.project_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Exclude a project from indexing
    pub fn exclude_project(mut self, key: impl Into<String>) -> Self {
        self.excluded_project_keys.push(key.into());
        self
    }

    /// Exclude several projects from indexing
    pub fn exclude_projects(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.excluded_project_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();

        let config = CoordinatorConfig {
            max_concurrent_jobs: self
                .max_concurrent_jobs
                .unwrap_or(defaults.max_concurrent_jobs),
            incremental_period: self
                .incremental_period
                .unwrap_or(defaults.incremental_period),
            full_update_period: self
                .full_update_period
                .unwrap_or(defaults.full_update_period),
            fast_interval: self.fast_interval.unwrap_or(defaults.fast_interval),
            slow_interval: self.slow_interval.unwrap_or(defaults.slow_interval),
            queue_refill_interval: self
                .queue_refill_interval
                .unwrap_or(defaults.queue_refill_interval),
            project_keys_refresh_interval: self
                .project_keys_refresh_interval
                .unwrap_or(defaults.project_keys_refresh_interval),
            project_keys: self.project_keys,
            excluded_project_keys: self.excluded_project_keys,
        };

        Self::validate_concurrency(&config)?;
        Self::validate_intervals(&config)?;
        Self::validate_project_keys(&config)?;

        Ok(config)
    }

    fn validate_concurrency(config: &CoordinatorConfig) -> Result<(), ConfigError> {
        if config.max_concurrent_jobs == 0 {
            return Err(ConfigError::invalid_value(
                "max_concurrent_jobs",
                "at least one job slot is required",
            ));
        }
        Ok(())
    }

    fn validate_intervals(config: &CoordinatorConfig) -> Result<(), ConfigError> {
        if config.incremental_period.is_zero() {
            return Err(ConfigError::invalid_interval(
                "incremental_period",
                config.incremental_period,
                "must be greater than zero",
            ));
        }

        if config.fast_interval.is_zero() {
            return Err(ConfigError::invalid_interval(
                "fast_interval",
                config.fast_interval,
                "must be greater than zero",
            ));
        }

        if config.slow_interval < config.fast_interval {
            return Err(ConfigError::invalid_interval(
                "slow_interval",
                config.slow_interval,
                format!(
                    "must not be shorter than fast_interval ({:?})",
                    config.fast_interval
                ),
            ));
        }

        Ok(())
    }

    fn validate_project_keys(config: &CoordinatorConfig) -> Result<(), ConfigError> {
        let keys = config
            .project_keys
            .iter()
            .flatten()
            .chain(config.excluded_project_keys.iter());

        for key in keys {
            if key.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    "project_keys",
                    "project keys must not be blank",
                ));
            }
        }
        Ok(())
    }
}
