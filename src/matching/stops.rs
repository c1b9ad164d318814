//! Places scheduled stops onto a route shape.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::MatchError;
use super::geometry::{GeoPoint, distance_meters};
use super::polyline::Polyline;
use super::proximity::reach_to_point;

/// One scheduled call of a trip. Times are seconds since the agency-local
/// midnight of the service day and may exceed 24h.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTime {
    pub stop_id: String,
    pub arrival: i64,
    pub departure: i64,
    pub location: GeoPoint,
}

/// Where a stop sits along the shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopProjection {
    /// Meters from the start of the polyline.
    pub distance: f64,
    /// Index of the segment the stop snapped to.
    pub segment: usize,
}

/// Walks the polyline once, placing each stop on the first segment that
/// reaches it within `tolerance` meters.
///
/// The search for a stop resumes on the segment where the previous stop was
/// placed, so projections come out in polyline order. Two stops snapping to
/// the same segment in reverse order are pinned to the earlier distance.
///
/// # Errors
///
/// Returns [`MatchError::StopsUnreachable`] when the walk ends before every
/// stop has been placed, including when `stops` is empty.
pub fn project_stops(
    polyline: &Polyline,
    stops: &[StopTime],
    tolerance: f64,
) -> Result<Vec<StopProjection>, MatchError> {
    let mut projections: Vec<StopProjection> = Vec::with_capacity(stops.len());
    let mut segments = polyline.segments_from(0).peekable();

    while let (Some(stop), Some(segment)) =
        (stops.get(projections.len()), segments.peek().copied())
    {
        let start_distance = distance_meters(&segment.start, &stop.location);
        match reach_to_point(&stop.location, &segment, start_distance, tolerance) {
            Some(reach) => {
                let floor = projections.last().map_or(0.0, |p| p.distance);
                projections.push(StopProjection {
                    distance: (segment.offset + reach.along).max(floor),
                    segment: segment.index,
                });
            }
            None => {
                segments.next();
            }
        }
    }

    if stops.is_empty() || projections.len() < stops.len() {
        return Err(MatchError::StopsUnreachable {
            placed: projections.len(),
            total: stops.len(),
            tolerance,
        });
    }

    Ok(projections)
}

/// Runs [`project_stops`] at `tolerance`, then once more at twice the
/// tolerance if some stop could not be placed.
///
/// # Errors
///
/// Returns the error of the relaxed attempt when both fail.
pub fn project_stops_relaxed(
    polyline: &Polyline,
    stops: &[StopTime],
    tolerance: f64,
) -> Result<Vec<StopProjection>, MatchError> {
    match project_stops(polyline, stops, tolerance) {
        Ok(projections) => Ok(projections),
        Err(err) => {
            debug!(error = %err, relaxed_tolerance = tolerance * 2.0, "Retrying stop placement");
            project_stops(polyline, stops, tolerance * 2.0)
        }
    }
}
