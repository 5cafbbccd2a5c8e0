//! Configuration, persistence and validation
//!
//! The curve record and daemon configuration both live under the user's
//! config directory as JSON.

mod config;
mod persistence;
mod validation;

pub use config::{DaemonConfig, ENV_SENSOR_URL, ENV_STATE_DIR, ENV_UTILITY};
pub use persistence::CurveStore;
pub use validation::{validate_curve, validate_curve_points, validate_percent};
