//! Unified error handling for fanbridge
//!
//! A single error type shared by the core library, the daemon and the CLI.
//! Built on thiserror so every variant carries a readable Display message.

use std::io;
use std::path::PathBuf;

/// Result type alias using FanbridgeError
pub type Result<T> = std::result::Result<T, FanbridgeError>;

/// Unified error type for all fanbridge operations
#[derive(thiserror::Error, Debug)]
pub enum FanbridgeError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Sensor Source Errors
    // ============================================================================
    #[error("Sensor source unavailable: {0}")]
    SourceUnavailable(String),

    // ============================================================================
    // Control Utility Errors
    // ============================================================================
    #[error("Control utility not installed: {0}")]
    UtilityNotInstalled(String),

    #[error("Command `{command}` failed: {diagnostic}")]
    CommandFailed {
        command: String,
        diagnostic: String,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Invalid channel id: {0}")]
    InvalidChannelId(String),

    #[error("Invalid percentage: {value} (must be 0-100)")]
    InvalidPercent {
        value: f64,
    },

    #[error("Curve validation failed: {0}")]
    InvalidCurve(String),

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon response error: {0}")]
    DaemonResponse(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },
}

impl FanbridgeError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a curve validation error
    pub fn invalid_curve(msg: impl Into<String>) -> Self {
        Self::InvalidCurve(msg.into())
    }

    /// Create a command failure carrying the captured diagnostic text
    pub fn command_failed(command: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// True when the control utility could not be invoked at all.
    pub fn is_not_installed(&self) -> bool {
        matches!(self, Self::UtilityNotInstalled(_))
    }
}
