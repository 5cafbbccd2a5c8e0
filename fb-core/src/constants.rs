//! Constants and configuration defaults for fanbridge
//!
//! Centralizes timeouts, paths and wire tags. Other modules refer to these
//! instead of repeating literal values.

use std::time::Duration;

/// Filesystem locations
pub mod paths {
    use std::path::PathBuf;

    /// Directory name under the user's config dir
    pub const APP_DIR: &str = "fanbridge";

    /// Persisted curve record
    pub const CURVES_FILE: &str = "curves.json";

    /// Optional daemon configuration
    pub const CONFIG_FILE: &str = "config.json";

    /// Per-user state directory (`$XDG_CONFIG_HOME/fanbridge` on Linux)
    pub fn user_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR))
    }

    /// State directory with a relative fallback when no home is resolvable
    pub fn default_state_dir() -> PathBuf {
        user_config_dir().unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
    }

    /// Default daemon socket, preferring /run when present
    pub fn default_socket_path() -> PathBuf {
        if std::path::Path::new("/run").is_dir() {
            PathBuf::from("/run/fanbridge.sock")
        } else {
            PathBuf::from("/tmp/fanbridge.sock")
        }
    }
}

/// Hardware monitor endpoint
pub mod sensors {
    use super::Duration;

    /// Default LibreHardwareMonitor-style JSON endpoint
    pub const DEFAULT_URL: &str = "http://127.0.0.1:8085/data.json";

    pub const FETCH_TIMEOUT: Duration = Duration::from_millis(2000);

    /// Label of the synthetic root node, left out of hardware paths
    pub const ROOT_LABEL: &str = "Sensor";

    /// Separator between ancestor labels in a hardware path
    pub const PATH_SEPARATOR: &str = " / ";
}

/// Control utility invocation
pub mod utility {
    use super::Duration;

    /// Binary looked up on PATH unless configured otherwise
    pub const DEFAULT_BINARY: &str = "liquidctl";

    /// `--version` probe
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

    /// `list` and `status`
    pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

    /// `set ... speed ...`
    pub const SET_TIMEOUT: Duration = Duration::from_secs(8);

    /// Channel alias tried once when a specific channel name is rejected
    pub const GENERIC_FAN_CHANNEL: &str = "fan";

    /// Diagnostic text kept from stderr/stdout on failure
    pub const MAX_DIAGNOSTIC_LEN: usize = 512;
}

/// Client side of the daemon socket
pub mod ipc {
    use super::utility::{QUERY_TIMEOUT, SET_TIMEOUT};
    use super::Duration;

    /// Requests answered from memory or the sensor endpoint
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Slack on top of the daemon's own command timeouts
    pub const RESPONSE_MARGIN: Duration = Duration::from_secs(4);

    /// A set plus the generic alias retry
    pub const SET_SPEED_TIMEOUT: Duration =
        Duration::from_secs(2 * SET_TIMEOUT.as_secs() + RESPONSE_MARGIN.as_secs());

    /// Devices covered by the channel scan deadline
    pub const SCAN_DEVICE_BUDGET: u64 = 4;

    /// `list` followed by a JSON and a text status query per device
    pub const CHANNEL_SCAN_TIMEOUT: Duration = Duration::from_secs(
        QUERY_TIMEOUT.as_secs() * (1 + 2 * SCAN_DEVICE_BUDGET) + RESPONSE_MARGIN.as_secs(),
    );
}

/// Reconciliation loop
pub mod engine {
    /// Default period between cycles
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2500;

    /// Shortest period accepted from configuration
    pub const MIN_POLL_INTERVAL_MS: u64 = 500;

    /// Errors in a row before the loop logs a summary instead of each one
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
}

/// Duty range accepted by devices
pub mod duty {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 100;
}
