//! Temperature to duty mapping
//!
//! Curves are piecewise linear: below the first point the first duty holds,
//! above the last point the last duty holds, and in between the duty is
//! interpolated along the bracketing segment and rounded to a whole percent.

use fb_protocol::CurvePoint;

use crate::constants::duty;

/// Sort points by temperature, keeping the last-written duty when two points
/// share a temperature.
pub fn normalize_points(points: &[CurvePoint]) -> Vec<CurvePoint> {
    let mut sorted = points.to_vec();
    // stable: equal temperatures keep their write order
    sorted.sort_by(|a, b| a.temperature.total_cmp(&b.temperature));

    let mut out: Vec<CurvePoint> = Vec::with_capacity(sorted.len());
    for point in sorted {
        match out.last_mut() {
            Some(prev) if prev.temperature == point.temperature => *prev = point,
            _ => out.push(point),
        }
    }
    out
}

/// Target duty for `temp`, or None when the curve has no points or the
/// reading is not a finite number.
pub fn interpolate(points: &[CurvePoint], temp: f64) -> Option<u8> {
    if !temp.is_finite() {
        return None;
    }

    let points = normalize_points(points);
    let first = points.first()?;
    let last = points.last()?;

    if temp <= first.temperature {
        return Some(clamp_duty(f64::from(first.duty)));
    }
    if temp >= last.temperature {
        return Some(clamp_duty(f64::from(last.duty)));
    }

    for w in points.windows(2) {
        let (lo, hi) = (&w[0], &w[1]);
        if temp >= lo.temperature && temp <= hi.temperature {
            let t = (temp - lo.temperature) / (hi.temperature - lo.temperature);
            let v = f64::from(lo.duty) + t * (f64::from(hi.duty) - f64::from(lo.duty));
            return Some(clamp_duty(v.round()));
        }
    }

    Some(clamp_duty(f64::from(last.duty)))
}

fn clamp_duty(v: f64) -> u8 {
    v.clamp(f64::from(duty::MIN), f64::from(duty::MAX)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_curve() -> Vec<CurvePoint> {
        vec![
            CurvePoint::new(30.0, 30),
            CurvePoint::new(45.0, 50),
            CurvePoint::new(65.0, 80),
            CurvePoint::new(80.0, 100),
        ]
    }

    #[test]
    fn test_below_curve() {
        assert_eq!(interpolate(&reference_curve(), 20.0), Some(30));
    }

    #[test]
    fn test_above_curve() {
        assert_eq!(interpolate(&reference_curve(), 90.0), Some(100));
    }

    #[test]
    fn test_between_points() {
        // 50 + (55-45)/(65-45) * (80-50) = 65
        assert_eq!(interpolate(&reference_curve(), 55.0), Some(65));
    }

    #[test]
    fn test_at_points() {
        let curve = reference_curve();
        assert_eq!(interpolate(&curve, 30.0), Some(30));
        assert_eq!(interpolate(&curve, 45.0), Some(50));
        assert_eq!(interpolate(&curve, 80.0), Some(100));
    }

    #[test]
    fn test_rounds_to_nearest() {
        let curve = vec![CurvePoint::new(0.0, 0), CurvePoint::new(3.0, 10)];
        // 10/3 = 3.33 -> 3, 20/3 = 6.67 -> 7
        assert_eq!(interpolate(&curve, 1.0), Some(3));
        assert_eq!(interpolate(&curve, 2.0), Some(7));
    }

    #[test]
    fn test_unsorted_points() {
        let mut curve = reference_curve();
        curve.reverse();
        assert_eq!(interpolate(&curve, 55.0), Some(65));
    }

    #[test]
    fn test_duplicate_temperature_uses_last() {
        let curve = vec![
            CurvePoint::new(40.0, 20),
            CurvePoint::new(60.0, 50),
            CurvePoint::new(40.0, 35),
        ];
        assert_eq!(interpolate(&curve, 30.0), Some(35));
        assert_eq!(normalize_points(&curve).len(), 2);
    }

    #[test]
    fn test_single_point() {
        let curve = vec![CurvePoint::new(50.0, 42)];
        assert_eq!(interpolate(&curve, 10.0), Some(42));
        assert_eq!(interpolate(&curve, 90.0), Some(42));
    }

    #[test]
    fn test_empty_and_non_finite() {
        assert_eq!(interpolate(&[], 50.0), None);
        assert_eq!(interpolate(&reference_curve(), f64::NAN), None);
    }

    #[test]
    fn test_stored_duty_above_range_is_clamped() {
        let curve = vec![CurvePoint::new(50.0, 150)];
        assert_eq!(interpolate(&curve, 60.0), Some(100));
    }

    #[test]
    fn test_monotonic_for_monotonic_curves() {
        let curves = vec![
            reference_curve(),
            vec![CurvePoint::new(20.0, 0), CurvePoint::new(90.0, 100)],
            vec![
                CurvePoint::new(35.0, 25),
                CurvePoint::new(50.0, 25),
                CurvePoint::new(60.0, 70),
                CurvePoint::new(61.0, 71),
                CurvePoint::new(85.0, 100),
            ],
        ];

        for curve in &curves {
            let mut prev = 0u8;
            let mut temp = 0.0;
            while temp <= 110.0 {
                let duty = interpolate(curve, temp).unwrap();
                assert!(duty >= prev, "duty dropped at {}C: {} < {}", temp, duty, prev);
                prev = duty;
                temp += 0.25;
            }
        }
    }
}
