//! Store configuration.
//!
//! Read from a JSON file when one is given; every field falls back to the
//! built-in default, so `{}` is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MatchupError, Result};

/// How far the reconstructor follows parent references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestingDepth {
    /// Matches are attached only directly below top-level points; deeper
    /// rows are dropped. This is how results were read historically.
    Single,
    /// Matches are attached at any depth by following parent row ids.
    #[default]
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of row writes in flight at once.
    pub chunk_size: usize,
    /// Total write passes before giving up.
    pub max_attempts: u32,
    /// Sleep between failed passes.
    pub retry_backoff_ms: u64,
    /// Per-row write timeout. `None` leaves timeouts to the store.
    pub row_timeout_ms: Option<u64>,
    pub nesting_depth: NestingDepth,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            max_attempts: crate::MAX_WRITE_ATTEMPTS,
            retry_backoff_ms: crate::DEFAULT_RETRY_BACKOFF_MS,
            row_timeout_ms: None,
            nesting_depth: NestingDepth::Full,
        }
    }
}

impl StoreConfig {
    /// Read config from `path`. Returns None if the file doesn't exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Write config to `path` as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(MatchupError::Config("chunk_size must be > 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(MatchupError::Config("max_attempts must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn row_timeout(&self) -> Option<Duration> {
        self.row_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_row_timeout(mut self, timeout: Duration) -> Self {
        self.row_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_nesting_depth(mut self, depth: NestingDepth) -> Self {
        self.nesting_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_backoff(), Duration::from_secs(10));
        assert_eq!(config.row_timeout(), None);
        assert_eq!(config.nesting_depth, NestingDepth::Full);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_json_is_default() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"chunk_size": 16, "nesting_depth": "single"}"#).unwrap();
        assert_eq!(config.chunk_size, 16);
        assert_eq!(config.nesting_depth, NestingDepth::Single);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let err = StoreConfig::default().with_chunk_size(0).validate().unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        assert!(StoreConfig::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(StoreConfig::read_from(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let config = StoreConfig::default()
            .with_chunk_size(8)
            .with_row_timeout(Duration::from_millis(250));
        config.write_to(&path).unwrap();

        let loaded = StoreConfig::read_from(&path).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_read_invalid_config_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"chunk_size": 0}"#).unwrap();
        assert!(StoreConfig::read_from(&path).is_err());
    }
}
