//! Daemon configuration
//!
//! Read from `<config dir>/fanbridge/config.json` when present. Every field has
//! a default, so a partial file only overrides what it names. A few
//! environment variables take precedence over the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::{engine, paths, sensors, utility};
use crate::error::{FanbridgeError, Result};

/// Overrides the sensor endpoint URL
pub const ENV_SENSOR_URL: &str = "FANBRIDGE_SENSOR_URL";
/// Overrides the control utility binary
pub const ENV_UTILITY: &str = "FANBRIDGE_LIQUIDCTL";
/// Overrides the directory holding curves.json
pub const ENV_STATE_DIR: &str = "FANBRIDGE_STATE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub sensor_url: String,
    pub sensor_timeout_ms: u64,
    pub utility_path: String,
    pub probe_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub set_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub state_dir: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sensor_url: sensors::DEFAULT_URL.to_string(),
            sensor_timeout_ms: sensors::FETCH_TIMEOUT.as_millis() as u64,
            utility_path: utility::DEFAULT_BINARY.to_string(),
            probe_timeout_ms: utility::PROBE_TIMEOUT.as_millis() as u64,
            query_timeout_ms: utility::QUERY_TIMEOUT.as_millis() as u64,
            set_timeout_ms: utility::SET_TIMEOUT.as_millis() as u64,
            poll_interval_ms: engine::DEFAULT_POLL_INTERVAL_MS,
            state_dir: None,
            socket_path: None,
        }
    }
}

impl DaemonConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        paths::default_state_dir().join(paths::CONFIG_FILE)
    }

    /// Parse a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| FanbridgeError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: DaemonConfig = serde_json::from_str(&content)
            .map_err(|e| FanbridgeError::config(format!("Failed to parse {:?}: {}", path, e)))?;

        Ok(config.normalized())
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// on any error, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = Self::load_from(&path).unwrap_or_else(|e| {
            warn!("{} - continuing with default configuration", e);
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env(ENV_SENSOR_URL) {
            self.sensor_url = url;
        }
        if let Some(bin) = non_empty_env(ENV_UTILITY) {
            self.utility_path = bin;
        }
        if let Some(dir) = non_empty_env(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }
    }

    /// Clamp values that would make the daemon spin or never time out.
    pub fn normalized(mut self) -> Self {
        self.poll_interval_ms = self.poll_interval_ms.max(engine::MIN_POLL_INTERVAL_MS);
        let defaults = Self::default();
        if self.sensor_timeout_ms == 0 {
            self.sensor_timeout_ms = defaults.sensor_timeout_ms;
        }
        if self.probe_timeout_ms == 0 {
            self.probe_timeout_ms = defaults.probe_timeout_ms;
        }
        if self.query_timeout_ms == 0 {
            self.query_timeout_ms = defaults.query_timeout_ms;
        }
        if self.set_timeout_ms == 0 {
            self.set_timeout_ms = defaults.set_timeout_ms;
        }
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(paths::default_state_dir)
    }

    pub fn curves_path(&self) -> PathBuf {
        self.state_dir().join(paths::CURVES_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(paths::default_socket_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn utility_timeouts(&self) -> crate::hw::UtilityTimeouts {
        crate::hw::UtilityTimeouts {
            probe: Duration::from_millis(self.probe_timeout_ms),
            query: Duration::from_millis(self.query_timeout_ms),
            set: Duration::from_millis(self.set_timeout_ms),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.sensor_url, "http://127.0.0.1:8085/data.json");
    }

    #[test]
    fn test_partial_file_overrides_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"poll_interval_ms": 3000, "utility_path": "/opt/liquidctl"}"#).unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 3000);
        assert_eq!(config.utility_path, "/opt/liquidctl");
        assert_eq!(config.set_timeout_ms, 8000);
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"poll_interval_ms": 10, "query_timeout_ms": 0}"#).unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.poll_interval_ms, engine::MIN_POLL_INTERVAL_MS);
        assert_eq!(config.query_timeout_ms, 5000);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = DaemonConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, FanbridgeError::Config(_)));
    }

    #[test]
    fn test_curves_path_follows_state_dir() {
        let config = DaemonConfig {
            state_dir: Some(PathBuf::from("/var/lib/fanbridge")),
            ..DaemonConfig::default()
        };
        assert_eq!(config.curves_path(), PathBuf::from("/var/lib/fanbridge/curves.json"));
    }
}
