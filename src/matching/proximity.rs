//! The "reach to point" test shared by the stop and vehicle passes.

use super::geometry::{GeoPoint, closest_point_on_segment, distance_meters};
use super::polyline::Segment;

/// Below this distance from the segment start a projection is always tried.
pub const PROXIMITY_FLOOR_M: f64 = 50.0;
/// Slack subtracted from the start distance before comparing to the segment length.
pub const SEGMENT_SLACK_M: f64 = 10.0;

/// A successful snap of a point onto a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reach {
    /// The snapped point, lying on the segment.
    pub point: GeoPoint,
    /// Distance between the target and `point`, in meters.
    pub error: f64,
    /// Distance from the segment start to `point`, in meters.
    pub along: f64,
}

/// Tries to snap `target` onto `segment` within `allowed_error` meters.
///
/// `start_distance` is the precomputed distance from the segment start to the
/// target. Segments that clearly cannot reach the target are rejected without
/// projecting.
pub fn reach_to_point(
    target: &GeoPoint,
    segment: &Segment,
    start_distance: f64,
    allowed_error: f64,
) -> Option<Reach> {
    let plausible = start_distance < PROXIMITY_FLOOR_M
        || segment.length > start_distance - SEGMENT_SLACK_M;
    if !plausible {
        return None;
    }

    let point = closest_point_on_segment(target, &segment.start, &segment.end);
    let error = distance_meters(target, &point);
    if error > allowed_error {
        return None;
    }

    let along = distance_meters(&segment.start, &point).min(segment.length);
    Some(Reach { point, error, along })
}

/// Convenience wrapper computing the start distance itself.
pub fn reach_segment(target: &GeoPoint, segment: &Segment, allowed_error: f64) -> Option<Reach> {
    let start_distance = distance_meters(&segment.start, target);
    reach_to_point(target, segment, start_distance, allowed_error)
}
