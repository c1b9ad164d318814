//! Static schedule access.
//!
//! [`ScheduleProvider`] is the seam between the matcher and wherever trips
//! come from; [`GtfsSchedule`] reads them from a GTFS directory or zip.

mod gtfs;

pub use gtfs::{GtfsSchedule, parse_gtfs_time};

use std::collections::HashMap;
use std::sync::Arc;

use chrono_tz::Tz;
use thiserror::Error;

use crate::matching::{GeoPoint, StopTime};

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("code: unknown_trip, description: trip {0} is not in the schedule")]
    UnknownTrip(String),

    #[error("code: missing_shape, description: trip {0} has no shape")]
    MissingShape(String),

    #[error("code: invalid_schedule, description: trip {trip_id}: {reason}")]
    InvalidSchedule { trip_id: String, reason: String },
}

impl ScheduleError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownTrip(_) => "unknown_trip",
            Self::MissingShape(_) => "missing_shape",
            Self::InvalidSchedule { .. } => "invalid_schedule",
        }
    }
}

/// Everything the matcher needs about one scheduled trip.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSchedule {
    pub trip_id: String,
    pub route_id: String,
    pub shape: Vec<GeoPoint>,
    pub stop_times: Vec<StopTime>,
}

impl TripSchedule {
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidSchedule`] when there are no stops or
    /// the times are not monotonic
    /// (`arrival[i] <= departure[i] <= arrival[i + 1]`).
    pub fn new(
        trip_id: String,
        route_id: String,
        shape: Vec<GeoPoint>,
        stop_times: Vec<StopTime>,
    ) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidSchedule {
            trip_id: trip_id.clone(),
            reason,
        };

        if stop_times.is_empty() {
            return Err(invalid("no stop times".to_string()));
        }

        for (i, st) in stop_times.iter().enumerate() {
            if st.arrival > st.departure {
                return Err(invalid(format!(
                    "stop {} departs before it arrives",
                    st.stop_id
                )));
            }
            if let Some(next) = stop_times.get(i + 1)
                && st.departure > next.arrival
            {
                return Err(invalid(format!(
                    "stop {} is reached before stop {} departs",
                    next.stop_id, st.stop_id
                )));
            }
        }

        Ok(Self {
            trip_id,
            route_id,
            shape,
            stop_times,
        })
    }
}

/// Source of static trip data.
pub trait ScheduleProvider {
    /// # Errors
    ///
    /// [`ScheduleError::UnknownTrip`] when `trip_id` is not scheduled, or
    /// another [`ScheduleError`] when its data is unusable.
    fn trip(&self, trip_id: &str) -> Result<Arc<TripSchedule>, ScheduleError>;

    /// The agency timezone schedule times are expressed in.
    fn timezone(&self) -> Tz;
}

/// A fixed in-memory set of trips.
#[derive(Debug, Clone)]
pub struct StaticSchedule {
    timezone: Tz,
    trips: HashMap<String, Arc<TripSchedule>>,
}

impl StaticSchedule {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            trips: HashMap::new(),
        }
    }

    pub fn insert(&mut self, trip: TripSchedule) {
        self.trips.insert(trip.trip_id.clone(), Arc::new(trip));
    }
}

impl ScheduleProvider for StaticSchedule {
    fn trip(&self, trip_id: &str) -> Result<Arc<TripSchedule>, ScheduleError> {
        self.trips
            .get(trip_id)
            .cloned()
            .ok_or_else(|| ScheduleError::UnknownTrip(trip_id.to_string()))
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }
}
