//! Process-wide memory of trips currently being followed.
//!
//! [`ActiveTrips`] is a plain owned value: the polling loop holds it and
//! passes `&mut` access to whoever records updates, so every read, update and
//! eviction is serialized by the borrow checker.

use std::collections::HashMap;

use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::delay::service_day;

/// Default idle time after which a trip is forgotten.
pub const DEFAULT_EVICTION_SECS: i64 = 2 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActiveTripEntry {
    pub progress: f64,
    /// Epoch seconds of the last accepted observation.
    pub timestamp: i64,
    /// Local day-of-year of the first accepted observation.
    pub day: u32,
}

#[derive(Debug)]
pub struct ActiveTrips {
    trips: HashMap<String, ActiveTripEntry>,
    timezone: Tz,
}

impl ActiveTrips {
    pub fn new(timezone: Tz) -> Self {
        Self {
            trips: HashMap::new(),
            timezone,
        }
    }

    pub fn is_active(&self, trip_id: &str) -> bool {
        self.trips.contains_key(trip_id)
    }

    pub fn get(&self, trip_id: &str) -> Option<&ActiveTripEntry> {
        self.trips.get(trip_id)
    }

    pub fn progress_of(&self, trip_id: &str) -> Option<f64> {
        self.get(trip_id).map(|e| e.progress)
    }

    pub fn timestamp_of(&self, trip_id: &str) -> Option<i64> {
        self.get(trip_id).map(|e| e.timestamp)
    }

    pub fn day_of(&self, trip_id: &str) -> Option<u32> {
        self.get(trip_id).map(|e| e.day)
    }

    /// Inserts or updates `trip_id`, returning its service day.
    ///
    /// The service day is fixed on first insert so a trip running past
    /// midnight keeps the day it started on.
    pub fn record_update(&mut self, trip_id: &str, timestamp: i64, progress: f64) -> u32 {
        let timezone = self.timezone;
        let entry = self
            .trips
            .entry(trip_id.to_string())
            .or_insert_with(|| ActiveTripEntry {
                progress,
                timestamp,
                // unrepresentable timestamps are rejected before reaching here
                day: service_day(timestamp, timezone).unwrap_or_default(),
            });
        entry.progress = progress;
        entry.timestamp = timestamp;
        entry.day
    }

    /// Drops every trip whose last update is more than `window` seconds
    /// before `now`. Returns how many were dropped.
    pub fn evict_idle(&mut self, now: i64, window: i64) -> usize {
        let before = self.trips.len();
        self.trips.retain(|_, entry| now - entry.timestamp <= window);
        let evicted = before - self.trips.len();
        debug!(evicted, remaining = self.trips.len(), "Evicted idle trips");
        evicted
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }
}
