//! Snaps a live GPS fix onto a route shape.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::error::MatchError;
use super::geometry::GeoPoint;
use super::polyline::Polyline;
use super::proximity::reach_segment;

/// One vehicle observation as reported by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleFix {
    pub location: GeoPoint,
    /// Report time, epoch seconds.
    pub timestamp: i64,
    /// The stop the feed claims the vehicle is heading to.
    pub next_stop_id: Option<String>,
}

/// Result of snapping a [`VehicleFix`] onto a [`Polyline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleProjection {
    /// Meters from the start of the polyline.
    pub distance: f64,
    pub segment: usize,
    /// Perpendicular distance between the fix and the snapped point.
    pub error: f64,
    pub point: GeoPoint,
}

/// Finds the best segment for `location`, scanning from `start_segment` to
/// the end of the shape.
///
/// Every segment within `tolerance` is a candidate and a strictly closer
/// candidate always replaces the current best, so a shape that passes near
/// itself resolves to the tighter match. When `expected` ranges are given,
/// the closest candidate whose distance falls inside any of them wins over
/// closer candidates outside.
///
/// # Errors
///
/// Returns [`MatchError::VehicleOutOfPolyline`] when no segment is within
/// `tolerance`.
pub fn project_vehicle(
    polyline: &Polyline,
    location: &GeoPoint,
    tolerance: f64,
    start_segment: usize,
    expected: &[RangeInclusive<f64>],
) -> Result<VehicleProjection, MatchError> {
    let mut best: Option<VehicleProjection> = None;
    let mut best_in_range: Option<VehicleProjection> = None;

    for segment in polyline.segments_from(start_segment) {
        let Some(reach) = reach_segment(location, &segment, tolerance) else {
            continue;
        };

        let candidate = VehicleProjection {
            distance: segment.offset + reach.along,
            segment: segment.index,
            error: reach.error,
            point: reach.point,
        };

        if best.is_none_or(|b| candidate.error < b.error) {
            best = Some(candidate);
        }

        let in_range = expected.iter().any(|r| r.contains(&candidate.distance));
        if in_range && best_in_range.is_none_or(|b| candidate.error < b.error) {
            best_in_range = Some(candidate);
        }
    }

    best_in_range
        .or(best)
        .ok_or(MatchError::VehicleOutOfPolyline {
            lat: location.lat,
            lon: location.lon,
            tolerance,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::geometry::distance_meters;

    // Out and back along the equator, offset 40m north on the way back.
    fn hairpin() -> Polyline {
        Polyline::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.002),
            GeoPoint::new(0.00036, 0.002),
            GeoPoint::new(0.00036, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_snaps_to_nearest_leg() {
        let poly = hairpin();
        // 10m north of the outbound leg, 30m south of the return leg
        let fix = GeoPoint::new(0.00009, 0.001);

        let projection = project_vehicle(&poly, &fix, 50.0, 0, &[]).unwrap();
        assert_eq!(projection.segment, 0);
        assert!((projection.error - 10.0).abs() < 0.1);
        assert!((projection.distance - 111.19).abs() < 0.1);
    }

    #[test]
    fn test_keeps_refining_to_later_closer_leg() {
        let poly = hairpin();
        // 30m north of the outbound leg, 10m south of the return leg
        let fix = GeoPoint::new(0.00027, 0.001);

        let projection = project_vehicle(&poly, &fix, 50.0, 0, &[]).unwrap();
        assert_eq!(projection.segment, 2);
        assert!((projection.error - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_expected_range_wins_over_closer_match() {
        let poly = hairpin();
        let fix = GeoPoint::new(0.00027, 0.001);
        let outbound = 0.0..=200.0;

        let projection = project_vehicle(&poly, &fix, 50.0, 0, &[outbound]).unwrap();
        assert_eq!(projection.segment, 0);
        assert!((projection.error - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_expected_range_without_candidates_falls_back() {
        let poly = hairpin();
        let fix = GeoPoint::new(0.00027, 0.001);

        let projection = project_vehicle(&poly, &fix, 50.0, 0, &[1000.0..=2000.0]).unwrap();
        assert_eq!(projection.segment, 2);
    }

    #[test]
    fn test_start_segment_skips_earlier_legs() {
        let poly = hairpin();
        let fix = GeoPoint::new(0.00009, 0.001);

        let projection = project_vehicle(&poly, &fix, 50.0, 1, &[]).unwrap();
        assert_eq!(projection.segment, 2);
        assert!((projection.error - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_far_fix_is_out_of_polyline() {
        let poly = hairpin();
        let fix = GeoPoint::new(0.002, 0.001);

        let err = project_vehicle(&poly, &fix, 50.0, 0, &[]).unwrap_err();
        assert_eq!(err.code(), "vehicle_out_of_polyline");
    }

    #[test]
    fn test_snapped_point_matches_reported_error() {
        let poly = hairpin();
        let fix = GeoPoint::new(0.0001, 0.0005);

        let projection = project_vehicle(&poly, &fix, 50.0, 0, &[]).unwrap();
        assert!((distance_meters(&fix, &projection.point) - projection.error).abs() < 1e-9);
    }
}
