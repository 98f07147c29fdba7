//! Fetcher configuration
//!
//! Timeouts and the global concurrency bound for cache population.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{cache, fetch};
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for the fetcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// How long a request waits on an in-flight fetch before giving up
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Ceiling for one fetch; the checkout is killed when it is exceeded
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Fetches allowed to run at the same time across all keys
    pub max_concurrent_fetches: usize,
    /// Module descriptor file name at the repository root
    pub descriptor_file: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: fetch::DEFAULT_REQUEST_TIMEOUT,
            fetch_timeout: fetch::DEFAULT_FETCH_TIMEOUT,
            max_concurrent_fetches: fetch::DEFAULT_MAX_CONCURRENT_FETCHES,
            descriptor_file: cache::DEFAULT_DESCRIPTOR_FILE.to_string(),
        }
    }
}

impl FetcherConfig {
    /// Validate configuration values and return errors for invalid settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_fetches == 0
            || self.max_concurrent_fetches > fetch::MAX_CONCURRENT_FETCHES_LIMIT
        {
            return Err(ConfigError::InvalidValue {
                field: "fetch.max_concurrent_fetches".to_string(),
                value: self.max_concurrent_fetches.to_string(),
                reason: format!(
                    "Must be between 1 and {}",
                    fetch::MAX_CONCURRENT_FETCHES_LIMIT
                ),
            });
        }

        for (field, value) in [
            ("fetch.request_timeout", self.request_timeout),
            ("fetch.fetch_timeout", self.fetch_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: "Must be greater than zero".to_string(),
                });
            }
        }

        if self.descriptor_file.is_empty() || self.descriptor_file.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "fetch.descriptor_file".to_string(),
                value: self.descriptor_file.clone(),
                reason: "Must be a plain file name".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for FetcherConfig
#[derive(Debug, Default)]
pub struct FetcherConfigBuilder {
    config: FetcherConfig,
}

impl FetcherConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long requests wait on a fetch
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the per-fetch ceiling
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    /// Set the global fetch concurrency bound
    pub fn max_concurrent_fetches(mut self, count: usize) -> Self {
        self.config.max_concurrent_fetches = count;
        self
    }

    /// Set the module descriptor file name
    pub fn descriptor_file(mut self, name: impl Into<String>) -> Self {
        self.config.descriptor_file = name.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> ConfigResult<FetcherConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
