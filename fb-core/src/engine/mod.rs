//! Curve evaluation and the reconciliation cycle

pub mod curve;
pub mod reconciler;

pub use curve::{interpolate, normalize_points};
pub use reconciler::{CycleOutcome, CycleReport, Engine, SkipReason};
