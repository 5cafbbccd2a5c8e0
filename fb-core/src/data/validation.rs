//! Input validation for curves and control requests
//!
//! Runs before anything reaches the store or the control utility, so a
//! rejected input never has a partial effect.

use fb_protocol::{Curve, CurvePoint, MAX_CURVE_POINTS};

use crate::constants::duty;
use crate::error::{FanbridgeError, Result};

/// Validates that a duty percentage is a finite number in 0-100
pub fn validate_percent(value: f64) -> Result<f64> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(FanbridgeError::InvalidPercent { value });
    }
    Ok(value)
}

/// Validates a curve's point set
pub fn validate_curve_points(points: &[CurvePoint]) -> Result<()> {
    if points.is_empty() {
        return Err(FanbridgeError::invalid_curve("curve needs at least one point"));
    }
    if points.len() > MAX_CURVE_POINTS {
        return Err(FanbridgeError::invalid_curve(format!(
            "curve has {} points (maximum {})",
            points.len(),
            MAX_CURVE_POINTS
        )));
    }

    for (i, point) in points.iter().enumerate() {
        if !point.temperature.is_finite() {
            return Err(FanbridgeError::invalid_curve(format!(
                "point {} has a non-finite temperature",
                i
            )));
        }
        if point.duty > duty::MAX {
            return Err(FanbridgeError::invalid_curve(format!(
                "point {} duty {} exceeds {}",
                i,
                point.duty,
                duty::MAX
            )));
        }
    }

    Ok(())
}

/// Validates a whole curve before it is stored
pub fn validate_curve(curve: &Curve) -> Result<()> {
    if curve.target_channel_id.trim().is_empty() {
        return Err(FanbridgeError::invalid_curve("targetId is required"));
    }
    if curve.sensor_id.trim().is_empty() {
        return Err(FanbridgeError::invalid_curve("sensorId is required"));
    }
    validate_curve_points(&curve.points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(points: Vec<CurvePoint>) -> Curve {
        Curve {
            id: String::new(),
            target_channel_id: "liquidctl:0:fan1".into(),
            target_name: String::new(),
            sensor_id: "/cpu/0/temperature/0".into(),
            sensor_name: String::new(),
            points,
        }
    }

    #[test]
    fn test_validate_percent() {
        assert!(validate_percent(0.0).is_ok());
        assert!(validate_percent(100.0).is_ok());
        assert!(validate_percent(-0.5).is_err());
        assert!(validate_percent(100.1).is_err());
        assert!(validate_percent(f64::INFINITY).is_err());
    }

    #[test]
    fn test_validate_curve_requires_fields() {
        let mut c = curve(vec![CurvePoint::new(40.0, 40)]);
        assert!(validate_curve(&c).is_ok());

        c.target_channel_id = "  ".into();
        assert!(matches!(validate_curve(&c), Err(FanbridgeError::InvalidCurve(_))));
    }

    #[test]
    fn test_validate_curve_points() {
        assert!(validate_curve_points(&[]).is_err());
        assert!(validate_curve_points(&[CurvePoint::new(f64::NAN, 10)]).is_err());
        assert!(validate_curve_points(&[CurvePoint::new(50.0, 101)]).is_err());

        let many: Vec<_> = (0..=MAX_CURVE_POINTS).map(|i| CurvePoint::new(i as f64, 50)).collect();
        assert!(validate_curve_points(&many).is_err());

        // duplicate temperatures are storable
        let dup = [CurvePoint::new(50.0, 40), CurvePoint::new(50.0, 60)];
        assert!(validate_curve_points(&dup).is_ok());
    }
}
