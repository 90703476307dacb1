//! Client and sync configuration.
//!
//! `ClientConfig` is persisted as JSON and overlaid with `FIELDSYNC_*`
//! environment variables; `SyncConfig` carries the queue's retry and
//! batching knobs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

const CONFIG_SCHEMA_VERSION: u32 = 1;
const DEFAULT_PROBE_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to read config at {path}: {message}")]
    Read { path: String, message: String },
    #[error("Failed to write config at {path}: {message}")]
    Write { path: String, message: String },
}

/// Retry, batching, and scheduling parameters for the sync queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Attempts allowed before an operation becomes FAILED
    pub max_retries: u32,
    /// Backoff ladder indexed by retry count; the last entry is the ceiling
    pub backoff_ms: Vec<u64>,
    /// Operations claimed per drain pass
    pub batch_size: usize,
    /// Delay before the next pass while operations remain pending
    pub retry_interval_ms: u64,
    /// Upper bound for a single network call
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_ms: vec![1_000, 5_000, 15_000, 60_000, 300_000],
            batch_size: 20,
            retry_interval_ms: 30_000,
            request_timeout_ms: 15_000,
        }
    }
}

impl SyncConfig {
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batchSize must be >= 1".to_string()));
        }
        if self.backoff_ms.is_empty() {
            return Err(ConfigError::Invalid(
                "backoffMs must contain at least one delay".to_string(),
            ));
        }
        if self.backoff_ms.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ConfigError::Invalid(
                "backoffMs must be non-decreasing".to_string(),
            ));
        }
        if self.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "retryIntervalMs must be > 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "requestTimeoutMs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `FIELDSYNC_*` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = optional_trimmed(&lookup, "FIELDSYNC_MAX_RETRIES") {
            self.max_retries = parse_number(&value, "FIELDSYNC_MAX_RETRIES")?;
        }
        if let Some(value) = optional_trimmed(&lookup, "FIELDSYNC_BACKOFF_MS") {
            self.backoff_ms = value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| parse_number(part, "FIELDSYNC_BACKOFF_MS"))
                .collect::<Result<Vec<u64>, _>>()?;
        }
        if let Some(value) = optional_trimmed(&lookup, "FIELDSYNC_BATCH_SIZE") {
            self.batch_size = parse_number(&value, "FIELDSYNC_BATCH_SIZE")?;
        }
        if let Some(value) = optional_trimmed(&lookup, "FIELDSYNC_RETRY_INTERVAL_MS") {
            self.retry_interval_ms = parse_number(&value, "FIELDSYNC_RETRY_INTERVAL_MS")?;
        }
        if let Some(value) = optional_trimmed(&lookup, "FIELDSYNC_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_number(&value, "FIELDSYNC_REQUEST_TIMEOUT_MS")?;
        }
        Ok(())
    }
}

/// Persisted client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub version: u32,
    /// Base URL relative operation URLs are joined onto
    pub api_base_url: Option<String>,
    /// Connectivity probe URL; defaults to `{api_base_url}/health`
    pub health_url: Option<String>,
    pub probe_interval_ms: u64,
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_SCHEMA_VERSION,
            api_base_url: None,
            health_url: None,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config from `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        let mut config =
            serde_json::from_str::<Self>(&raw).map_err(|error| ConfigError::Read {
                path: path.display().to_string(),
                message: error.to_string(),
            })?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |message: String| ConfigError::Write {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| write_error(error.to_string()))?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| write_error(error.to_string()))?;
        std::fs::write(path, serialized).map_err(|error| write_error(error.to_string()))
    }

    /// Overlay environment variables and validate the result.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = optional_trimmed(&lookup, "FIELDSYNC_API_BASE_URL") {
            self.api_base_url = Some(url);
        }
        if let Some(url) = optional_trimmed(&lookup, "FIELDSYNC_HEALTH_URL") {
            self.health_url = Some(url);
        }
        if let Some(value) = optional_trimmed(&lookup, "FIELDSYNC_PROBE_INTERVAL_MS") {
            self.probe_interval_ms = parse_number(&value, "FIELDSYNC_PROBE_INTERVAL_MS")?;
        }
        self.sync.apply_overrides(&lookup)?;
        self.normalize();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_SCHEMA_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {} (expected {CONFIG_SCHEMA_VERSION})",
                self.version
            )));
        }
        for (field, value) in [
            ("api_base_url", self.api_base_url.as_deref()),
            ("health_url", self.health_url.as_deref()),
        ] {
            if let Some(url) = value {
                if !is_http_url(url) {
                    return Err(ConfigError::Invalid(format!(
                        "{field} must start with http:// or https://"
                    )));
                }
            }
        }
        if self.probe_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe_interval_ms must be > 0".to_string(),
            ));
        }
        self.sync.validate()
    }

    pub fn health_endpoint(&self) -> Option<String> {
        self.health_url.clone().or_else(|| {
            self.api_base_url
                .as_deref()
                .map(|base| format!("{base}/health"))
        })
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.clone())
            .map(|url| url.trim_end_matches('/').to_string());
        self.health_url = normalize_text_option(self.health_url.clone());
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup_from<'a>(
        map: &'a HashMap<&'a str, &'a str>,
    ) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| map.get(key).map(|value| (*value).to_string())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_ms, vec![1_000, 5_000, 15_000, 60_000, 300_000]);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.retry_interval_ms, 30_000);
        assert_eq!(config.request_timeout_ms, 15_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_decreasing_ladder_and_zero_batch() {
        let decreasing = SyncConfig {
            backoff_ms: vec![5_000, 1_000],
            ..SyncConfig::default()
        };
        assert!(decreasing.validate().is_err());

        let empty_batch = SyncConfig {
            batch_size: 0,
            ..SyncConfig::default()
        };
        assert!(empty_batch.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_to_sync_config() {
        let mut map = HashMap::new();
        map.insert("FIELDSYNC_API_BASE_URL", " https://erp.example.com/api/ ");
        map.insert("FIELDSYNC_MAX_RETRIES", "3");
        map.insert("FIELDSYNC_BACKOFF_MS", "100, 200,400");
        map.insert("FIELDSYNC_BATCH_SIZE", "5");

        let config = ClientConfig::default()
            .with_overrides(lookup_from(&map))
            .unwrap();

        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://erp.example.com/api")
        );
        assert_eq!(
            config.health_endpoint().as_deref(),
            Some("https://erp.example.com/api/health")
        );
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.backoff_ms, vec![100, 200, 400]);
        assert_eq!(config.sync.batch_size, 5);
    }

    #[test]
    fn env_overrides_reject_garbage() {
        let mut map = HashMap::new();
        map.insert("FIELDSYNC_BATCH_SIZE", "lots");
        let error = ClientConfig::default()
            .with_overrides(lookup_from(&map))
            .unwrap_err();
        assert!(error.to_string().contains("FIELDSYNC_BATCH_SIZE"));

        let mut map = HashMap::new();
        map.insert("FIELDSYNC_API_BASE_URL", "erp.example.com");
        assert!(ClientConfig::default()
            .with_overrides(lookup_from(&map))
            .is_err());
    }

    #[test]
    fn config_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = ClientConfig {
            api_base_url: Some(" https://erp.example.com/ ".to_string()),
            sync: SyncConfig {
                batch_size: 7,
                ..SyncConfig::default()
            },
            ..ClientConfig::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.api_base_url.as_deref(), Some("https://erp.example.com"));
        assert_eq!(loaded.sync.batch_size, 7);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ClientConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, ClientConfig::default());
    }
}
