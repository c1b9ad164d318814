use serde::Serialize;

use crate::matching::MatchError;
use crate::processor::{Outcome, SkipReason};

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CycleStats {
    /// Feed header timestamp.
    pub timestamp: i64,
    pub vehicles: usize,
    pub incomplete: usize,
    pub saved: usize,

    // skips
    pub unknown_trip: usize,
    pub invalid_schedule: usize,
    pub invalid_timestamp: usize,
    pub before_first_stop: usize,
    pub stalled: usize,
    pub backward: usize,
    pub late_pickup: usize,
    pub duplicate: usize,
    pub too_fast: usize,

    // rejections
    pub invalid_shape: usize,
    pub stops_unreachable: usize,
    pub vehicle_out_of_polyline: usize,
    pub algorithm_mismatch: usize,

    // tracker
    pub evicted: usize,
    pub active_trips: usize,
}

impl CycleStats {
    pub fn new(timestamp: i64, incomplete: usize) -> Self {
        Self {
            timestamp,
            incomplete,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &Outcome) {
        self.vehicles += 1;
        match outcome {
            Outcome::Saved(_) => self.saved += 1,
            Outcome::Skipped(reason) => match reason {
                SkipReason::UnknownTrip => self.unknown_trip += 1,
                SkipReason::InvalidSchedule => self.invalid_schedule += 1,
                SkipReason::InvalidTimestamp => self.invalid_timestamp += 1,
                SkipReason::BeforeFirstStop => self.before_first_stop += 1,
                SkipReason::Stalled => self.stalled += 1,
                SkipReason::Backward => self.backward += 1,
                SkipReason::LatePickup => self.late_pickup += 1,
                SkipReason::Duplicate => self.duplicate += 1,
                SkipReason::TooFast => self.too_fast += 1,
            },
            Outcome::Rejected(err) => match err {
                MatchError::InvalidShape { .. } => self.invalid_shape += 1,
                MatchError::StopsUnreachable { .. } => self.stops_unreachable += 1,
                MatchError::VehicleOutOfPolyline { .. } => self.vehicle_out_of_polyline += 1,
                MatchError::AlgorithmMismatch { .. } => self.algorithm_mismatch += 1,
            },
        }
    }

    pub fn rejected(&self) -> usize {
        self.invalid_shape
            + self.stops_unreachable
            + self.vehicle_out_of_polyline
            + self.algorithm_mismatch
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn saved_pct(&self) -> f64 {
        Self::pct(self.saved, self.vehicles)
    }
}
