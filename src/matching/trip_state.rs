//! Combines stop and vehicle projections into a per-observation trip state.

use std::ops::RangeInclusive;

use super::error::MatchError;
use super::geometry::GeoPoint;
use super::polyline::Polyline;
use super::stops::{StopProjection, StopTime, project_stops_relaxed};
use super::vehicle::{VehicleFix, VehicleProjection, project_vehicle};

/// A trip's shape with its stops placed on it.
///
/// Depends only on static schedule data, so it is computed once per trip and
/// shared between observations.
#[derive(Debug, Clone)]
pub struct ProjectedTrip {
    polyline: Polyline,
    stops: Vec<StopTime>,
    projections: Vec<StopProjection>,
}

impl ProjectedTrip {
    /// Builds the polyline and places every stop on it, relaxing
    /// `stop_tolerance` once if needed.
    ///
    /// # Errors
    ///
    /// [`MatchError::InvalidShape`] for fewer than two shape points, or
    /// [`MatchError::StopsUnreachable`] when some stop cannot be placed.
    pub fn new(
        shape: Vec<GeoPoint>,
        stops: Vec<StopTime>,
        stop_tolerance: f64,
    ) -> Result<Self, MatchError> {
        let polyline = Polyline::new(shape)?;
        let projections = project_stops_relaxed(&polyline, &stops, stop_tolerance)?;
        Ok(Self {
            polyline,
            stops,
            projections,
        })
    }

    pub fn polyline(&self) -> &Polyline {
        &self.polyline
    }

    pub fn stops(&self) -> &[StopTime] {
        &self.stops
    }

    pub fn projections(&self) -> &[StopProjection] {
        &self.projections
    }

    /// Every stop index serving `stop_id`; loop trips may call a stop twice.
    fn stop_indices<'a>(&'a self, stop_id: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.stops
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.stop_id == stop_id)
            .map(|(i, _)| i)
    }

    /// Distance ranges the vehicle should be in if it is heading to `stop_id`.
    fn expected_ranges(&self, stop_id: &str) -> Vec<RangeInclusive<f64>> {
        self.stop_indices(stop_id)
            .map(|i| {
                let upper = self.projections[i].distance;
                let lower = i.checked_sub(1).map_or(0.0, |p| self.projections[p].distance);
                lower..=upper
            })
            .collect()
    }

    fn first_stop_distance(&self) -> f64 {
        self.projections[0].distance
    }

    fn last_index(&self) -> usize {
        self.projections.len() - 1
    }
}

/// Which part of the trip the vehicle is in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopPosition {
    /// Not yet at the first stop.
    BeforeFirst,
    /// Between stop `previous` and stop `previous + 1`.
    Between {
        previous: usize,
        distance_into: f64,
        interval_length: f64,
    },
    /// At or past the final stop.
    AtOrAfterLast { last: usize },
}

/// The state of one trip at one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TripState {
    position: StopPosition,
    vehicle: VehicleProjection,
    progress: f64,
    estimated_time: f64,
    distance_to_last_stop: f64,
    measurable_length: f64,
}

impl TripState {
    /// Projects `fix` onto `trip` and derives the trip state.
    ///
    /// # Errors
    ///
    /// [`MatchError::VehicleOutOfPolyline`] if the fix is farther than
    /// `vehicle_tolerance` from the shape, [`MatchError::AlgorithmMismatch`]
    /// if the placement contradicts the fix's next-stop hint.
    pub fn locate(
        trip: &ProjectedTrip,
        fix: &VehicleFix,
        vehicle_tolerance: f64,
    ) -> Result<Self, MatchError> {
        Self::locate_from(trip, fix, vehicle_tolerance, 0)
    }

    /// Like [`TripState::locate`] but ignores segments before `start_segment`.
    ///
    /// # Errors
    ///
    /// See [`TripState::locate`].
    pub fn locate_from(
        trip: &ProjectedTrip,
        fix: &VehicleFix,
        vehicle_tolerance: f64,
        start_segment: usize,
    ) -> Result<Self, MatchError> {
        let next_stop_id = fix.next_stop_id.as_deref();
        let expected = next_stop_id.map_or_else(Vec::new, |id| trip.expected_ranges(id));
        let vehicle = project_vehicle(
            trip.polyline(),
            &fix.location,
            vehicle_tolerance,
            start_segment,
            &expected,
        )?;
        Self::from_projection(trip, vehicle, next_stop_id)
    }

    /// Derives the trip state from an existing vehicle projection.
    ///
    /// A `next_stop_id` that the trip does not serve is ignored.
    ///
    /// # Errors
    ///
    /// [`MatchError::AlgorithmMismatch`] when the vehicle sits before the last
    /// stop and `next_stop_id` is neither the previous nor the next stop.
    pub fn from_projection(
        trip: &ProjectedTrip,
        vehicle: VehicleProjection,
        next_stop_id: Option<&str>,
    ) -> Result<Self, MatchError> {
        let stops = trip.stops();
        let projections = trip.projections();
        let last = trip.last_index();
        let first_distance = trip.first_stop_distance();
        let last_distance = projections[last].distance;
        let measurable_length = trip.polyline().total_length() - first_distance;
        let distance = vehicle.distance;

        let (position, progress, estimated_time) = if distance < first_distance {
            (StopPosition::BeforeFirst, 0.0, 0.0)
        } else if distance >= last_distance {
            (
                StopPosition::AtOrAfterLast { last },
                1.0,
                stops[last].arrival as f64,
            )
        } else {
            // Largest i with projections[i] <= distance; i < last here.
            let previous = projections.partition_point(|p| p.distance <= distance) - 1;
            let interval_length = projections[previous + 1].distance - projections[previous].distance;
            let distance_into = distance - projections[previous].distance;

            let estimated = if previous == 0 && distance_into <= 0.0 {
                // standing at the first stop, not yet departed
                stops[0].arrival as f64
            } else {
                let departure = stops[previous].departure as f64;
                let next_arrival = stops[previous + 1].arrival as f64;
                departure + (next_arrival - departure) * (distance_into / interval_length)
            };

            (
                StopPosition::Between {
                    previous,
                    distance_into,
                    interval_length,
                },
                (distance - first_distance) / measurable_length,
                estimated,
            )
        };

        let state = Self {
            position,
            vehicle,
            progress,
            estimated_time,
            distance_to_last_stop: (last_distance - distance).max(0.0),
            measurable_length,
        };

        if let Some(stop_id) = next_stop_id {
            state.check_next_stop(trip, stop_id)?;
        }

        Ok(state)
    }

    fn check_next_stop(&self, trip: &ProjectedTrip, stop_id: &str) -> Result<(), MatchError> {
        if matches!(self.position, StopPosition::AtOrAfterLast { .. }) {
            return Ok(());
        }

        let previous = self.previous_stop_index();
        let mut indices = trip.stop_indices(stop_id).peekable();
        if indices.peek().is_none() {
            return Ok(());
        }

        let plausible = indices.any(|i| {
            let i = i as isize;
            i == previous || i == previous + 1
        });
        if plausible {
            Ok(())
        } else {
            Err(MatchError::AlgorithmMismatch {
                next_stop_id: stop_id.to_string(),
                previous,
            })
        }
    }

    pub fn position(&self) -> StopPosition {
        self.position
    }

    pub fn vehicle(&self) -> &VehicleProjection {
        &self.vehicle
    }

    /// Index of the last stop passed; `-1` before the first stop.
    pub fn previous_stop_index(&self) -> isize {
        match self.position {
            StopPosition::BeforeFirst => -1,
            StopPosition::Between { previous, .. } => previous as isize,
            StopPosition::AtOrAfterLast { last } => last as isize,
        }
    }

    /// One-based sequence of the last stop passed, `0` before the first stop.
    pub fn stop_sequence(&self) -> usize {
        match self.position {
            StopPosition::BeforeFirst => 0,
            StopPosition::Between { previous, .. } => previous + 1,
            StopPosition::AtOrAfterLast { last } => last + 1,
        }
    }

    pub fn interval_distance(&self) -> Option<f64> {
        match self.position {
            StopPosition::Between { distance_into, .. } => Some(distance_into),
            _ => None,
        }
    }

    pub fn interval_length(&self) -> Option<f64> {
        match self.position {
            StopPosition::Between {
                interval_length, ..
            } => Some(interval_length),
            _ => None,
        }
    }

    /// Fraction of the current stop interval covered; `0` outside an interval.
    pub fn stop_progress(&self) -> f64 {
        match self.position {
            StopPosition::Between {
                distance_into,
                interval_length,
                ..
            } => distance_into / interval_length,
            _ => 0.0,
        }
    }

    /// Fraction of the trip covered, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Scheduled time, in seconds since local midnight, at which the vehicle
    /// should be where it is. `0` before the first stop.
    pub fn estimated_scheduled_time(&self) -> f64 {
        self.estimated_time
    }

    pub fn distance_to_last_stop(&self) -> f64 {
        self.distance_to_last_stop
    }

    /// Average speed in km/h implied by covering `progress_delta` of the trip
    /// in `elapsed_secs`. `None` when no time has elapsed.
    pub fn average_speed_kmh(&self, elapsed_secs: i64, progress_delta: f64) -> Option<f64> {
        if elapsed_secs <= 0 {
            return None;
        }
        let meters = progress_delta * self.measurable_length;
        Some(meters / elapsed_secs as f64 * 3.6)
    }
}
