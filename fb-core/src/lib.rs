//! fanbridge Core Library
//!
//! Temperature-driven control of liquidctl fan and pump channels.
//!
//! # Module Structure
//!
//! - `hw/` - Sensor source, liquidctl controller, status parsing
//! - `data/` - Curve store, configuration, validation
//! - `engine/` - Curve interpolation and the reconciliation cycle
//!
//! # Example
//!
//! ```no_run
//! use fb_core::{interpolate, CurvePoint};
//!
//! let points = [CurvePoint::new(30.0, 30), CurvePoint::new(80.0, 100)];
//! assert_eq!(interpolate(&points, 55.0), Some(65));
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod daemon_client;

pub mod error {
    pub use fb_error::*;
}

// Re-export shared types
pub use fb_protocol::{
    Backend, Curve, CurvePoint, CurveRequest, CurveState, DeviceInfo, DeviceList, EngineStatus,
    FanChannel, TemperatureReading,
};

pub use error::{FanbridgeError, Result};

pub use data::{
    validate_curve, validate_curve_points, validate_percent, CurveStore, DaemonConfig,
};

pub use engine::{interpolate, normalize_points, CycleOutcome, CycleReport, Engine, SkipReason};

pub use hw::{
    channel_id, parse_channel_id, CommandOutput, CommandRunner, DeviceControl, HttpSensorSource,
    LiquidctlController, SensorSnapshot, SensorSource, StatusReport, SystemCommandRunner,
    UtilityTimeouts,
};

pub use daemon_client::{is_daemon_available, DaemonClient};
