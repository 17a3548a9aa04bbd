//! Configuration for the Courier SDK.
//!
//! All values are optional with sensible defaults, so an empty configuration
//! is valid. Hosts either construct [`Config`] in code or load it from a JSON
//! file via [`Config::from_path`].

#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_log::LogConfig;

/// Raised when reading the configuration fails.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be opened or read.
    #[error("could not read config file")]
    CouldNotRead(#[from] std::io::Error),
    /// The config file is not valid JSON or contains invalid values.
    #[error("invalid config value")]
    Invalid(#[from] serde_json::Error),
}

/// Controls the HTTP delivery layer.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Http {
    /// Timeout for the entire HTTP request in seconds.
    pub timeout: u64,
    /// Timeout for only the connect phase in seconds.
    pub connection_timeout: u64,
    /// Maximum interval between drain retries after network failures, in
    /// seconds.
    pub max_retry_interval: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout: 5,
            connection_timeout: 3,
            max_retry_interval: 60,
        }
    }
}

/// Controls the on-disk envelope cache.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Cache {
    /// The directory holding stored envelopes and session state.
    ///
    /// When unset, callers must provide a directory explicitly.
    pub directory: Option<PathBuf>,
    /// Maximum number of envelopes kept on disk. Storing beyond this bound
    /// evicts the oldest envelopes.
    pub max_envelopes: usize,
    /// Stored envelopes older than this many days are dropped on cleanup.
    pub envelope_max_age_days: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            directory: None,
            max_envelopes: 30,
            envelope_max_age_days: 90,
        }
    }
}

/// Controls the in-memory item batcher.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Batching {
    /// Seconds of inactivity before buffered items are flushed.
    pub flush_timeout: u64,
    /// Number of buffered items that triggers an immediate flush.
    pub max_item_count: usize,
    /// Serialized buffer size in bytes that triggers an immediate flush.
    pub max_buffer_size_bytes: usize,
}

impl Default for Batching {
    fn default() -> Self {
        Self {
            flush_timeout: 5,
            max_item_count: 100,
            max_buffer_size_bytes: 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigValues {
    http: Http,
    cache: Cache,
    batching: Batching,
    logging: LogConfig,
    shutdown_timeout: Option<u64>,
}

/// Config struct for the Courier SDK.
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: ConfigValues,
}

impl Config {
    /// Loads a config from a JSON file at the given path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let values = serde_json::from_str(&contents)?;
        Ok(Self { values })
    }

    /// Creates a config from already deserialized values.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ConfigError> {
        let values = serde_json::from_value(json)?;
        Ok(Self { values })
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the timeout for the entire HTTP request.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.timeout)
    }

    /// Returns the timeout for the connect phase of an HTTP request.
    pub fn http_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.connection_timeout)
    }

    /// Returns the maximum interval between drain retries.
    pub fn http_max_retry_interval(&self) -> Duration {
        Duration::from_secs(self.values.http.max_retry_interval)
    }

    /// Returns the directory holding the envelope cache, if configured.
    pub fn cache_directory(&self) -> Option<&Path> {
        self.values.cache.directory.as_deref()
    }

    /// Sets the envelope cache directory.
    pub fn set_cache_directory(&mut self, directory: PathBuf) {
        self.values.cache.directory = Some(directory);
    }

    /// Returns the maximum number of envelopes kept on disk.
    pub fn max_envelopes(&self) -> usize {
        self.values.cache.max_envelopes
    }

    /// Returns the maximum age of stored envelopes.
    pub fn envelope_max_age(&self) -> Duration {
        Duration::from_secs(self.values.cache.envelope_max_age_days * 24 * 60 * 60)
    }

    /// Returns the batcher inactivity flush timeout.
    pub fn batch_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.values.batching.flush_timeout)
    }

    /// Returns the batcher item count cap.
    pub fn batch_max_item_count(&self) -> usize {
        self.values.batching.max_item_count
    }

    /// Returns the batcher byte size cap.
    pub fn batch_max_buffer_size_bytes(&self) -> usize {
        self.values.batching.max_buffer_size_bytes
    }

    /// Returns the bounded wait applied to the shutdown flush.
    ///
    /// After this timeout, pending in-memory items may be dropped; envelopes
    /// already persisted to the cache are delivered on the next launch.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.shutdown_timeout.unwrap_or(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_envelopes(), 30);
        assert_eq!(config.batch_max_item_count(), 100);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert!(config.cache_directory().is_none());
    }

    #[test]
    fn test_partial_overrides() {
        let config = Config::from_json(serde_json::json!({
            "cache": { "max_envelopes": 15 },
            "batching": { "flush_timeout": 1 },
        }))
        .unwrap();

        assert_eq!(config.max_envelopes(), 15);
        assert_eq!(config.batch_flush_timeout(), Duration::from_secs(1));
        // Untouched sections keep their defaults.
        assert_eq!(config.batch_max_buffer_size_bytes(), 1024 * 1024);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"http": {"timeout": 10}}"#).unwrap();

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_json() {
        let result = Config::from_json(serde_json::json!({
            "cache": { "max_envelopes": "lots" },
        }));
        assert!(result.is_err());
    }
}
