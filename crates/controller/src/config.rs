//! Controller configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_core::{Error, Result};

/// Tuning knobs for a controller. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Concurrent workers.
    pub workers: usize,
    /// Failed attempts retried before a key is dropped.
    pub max_retries: u32,
    /// First retry delay.
    pub base_delay_ms: u64,
    /// Retry delay cap.
    pub max_delay_ms: u64,
    /// Periodic resync of every cached key; 0 disables.
    pub resync_period_secs: u64,
    /// Bound on the initial listing.
    pub cache_sync_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 5,
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            resync_period_secs: 30,
            cache_sync_timeout_secs: 60,
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `TomlParseFailed` for malformed TOML and `InvalidConfig` if
    /// validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` if the file cannot be read, otherwise as
    /// [`ControllerConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::invalid_config(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.cache_sync_timeout_secs == 0 {
            return Err(Error::invalid_config(
                "cache_sync_timeout_secs must be positive",
            ));
        }
        Ok(())
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the retry ceiling.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff for the first retry.
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Upper bound on any single retry delay.
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// `None` when resync is disabled.
    pub const fn resync_period(&self) -> Option<Duration> {
        match self.resync_period_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// How long startup waits for the initial listing.
    pub const fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.resync_period(), Some(Duration::from_secs(30)));
        assert_eq!(config.base_delay(), Duration::from_millis(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ControllerConfig::from_toml_str("workers = 4\nresync_period_secs = 0\n").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.resync_period(), None);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let result = ControllerConfig::from_toml_str("workers = 0");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let config = ControllerConfig {
            base_delay_ms: 10,
            max_delay_ms: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_malformed_toml() {
        let result = ControllerConfig::from_toml_str("workers = [");
        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ControllerConfig::load(Path::new("/nonexistent/sluice.toml"));
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }
}
