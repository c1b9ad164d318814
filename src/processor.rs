//! Turns feed snapshots into delay records.
//!
//! For every observation the trip is map-matched, the result is checked
//! against what is already known about the trip, and accepted observations
//! are written to the sink. Rejections never abort a cycle.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, warn};

use crate::config::MatchConfig;
use crate::delay::{calculate_delay, local_seconds_since_midnight};
use crate::matching::{MatchError, ProjectedTrip, StopPosition, TripState};
use crate::output::{LogSink, VehicleLog};
use crate::parser::{FeedSnapshot, Observation};
use crate::schedule::{ScheduleError, ScheduleProvider, TripSchedule};
use crate::stats::CycleStats;
use crate::tracker::ActiveTrips;

/// Why an observation was not recorded although nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownTrip,
    InvalidSchedule,
    InvalidTimestamp,
    /// Not yet at the first stop; there is no scheduled time to compare to.
    BeforeFirstStop,
    /// Parked at the final stop without moving.
    Stalled,
    Backward,
    /// First seen too far into the trip to be trusted.
    LatePickup,
    Duplicate,
    TooFast,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Saved(VehicleLog),
    Skipped(SkipReason),
    Rejected(MatchError),
}

/// Static data of one trip, projected once.
struct CachedTrip {
    schedule: Arc<TripSchedule>,
    projected: Result<ProjectedTrip, MatchError>,
}

struct CacheEntry {
    trip: Arc<CachedTrip>,
    last_seen: i64,
}

pub struct Processor<P, S> {
    schedule: P,
    sink: S,
    tracker: ActiveTrips,
    config: MatchConfig,
    trips: HashMap<String, CacheEntry>,
}

impl<P: ScheduleProvider, S: LogSink> Processor<P, S> {
    pub fn new(schedule: P, sink: S, tracker: ActiveTrips, config: MatchConfig) -> Self {
        Self {
            schedule,
            sink,
            tracker,
            config,
            trips: HashMap::new(),
        }
    }

    pub fn tracker(&self) -> &ActiveTrips {
        &self.tracker
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Processes every observation of `snapshot`, flushes the sink and
    /// forgets trips idle for longer than the eviction window.
    ///
    /// # Errors
    ///
    /// Only sink failures are returned; matching problems are counted.
    #[tracing::instrument(
        skip_all,
        fields(feed_timestamp = snapshot.timestamp, vehicles = snapshot.observations.len())
    )]
    pub fn process_snapshot(&mut self, snapshot: &FeedSnapshot) -> Result<CycleStats> {
        let mut stats = CycleStats::new(snapshot.timestamp, snapshot.incomplete);

        for obs in &snapshot.observations {
            let outcome = self.process_observation(obs)?;
            stats.record(&outcome);
        }

        self.sink.flush()?;

        let window = self.config.eviction_window_secs;
        stats.evicted = self.tracker.evict_idle(snapshot.timestamp, window);
        self.trips
            .retain(|_, entry| snapshot.timestamp - entry.last_seen <= window);
        stats.active_trips = self.tracker.len();

        Ok(stats)
    }

    /// Decides what to do with one observation.
    ///
    /// # Errors
    ///
    /// Returns an error only when an accepted record cannot be written.
    pub fn process_observation(&mut self, obs: &Observation) -> Result<Outcome> {
        let trip_id = obs.trip_id.as_str();

        let Some(reported_secs) = local_seconds_since_midnight(obs.timestamp, self.schedule.timezone())
        else {
            warn!(trip_id, timestamp = obs.timestamp, "Unrepresentable vehicle timestamp");
            return Ok(Outcome::Skipped(SkipReason::InvalidTimestamp));
        };

        let cached = match self.cached_trip(trip_id, obs.timestamp) {
            Ok(cached) => cached,
            Err(ScheduleError::UnknownTrip(_)) => {
                warn!(trip_id, "Vehicle reports a trip_id missing from the schedule");
                return Ok(Outcome::Skipped(SkipReason::UnknownTrip));
            }
            Err(err) => {
                warn!(trip_id, code = err.code(), error = %err, "Unusable schedule for trip");
                return Ok(Outcome::Skipped(SkipReason::InvalidSchedule));
            }
        };
        let projected = match &cached.projected {
            Ok(projected) => projected,
            Err(err) => return Ok(Outcome::Rejected(err.clone())),
        };

        let state = match TripState::locate(projected, &obs.fix(), self.config.vehicle_tolerance_m)
        {
            Ok(state) => state,
            Err(err) => {
                log_rejection(obs, &err);
                return Ok(Outcome::Rejected(err));
            }
        };

        if let Some(reason) = self.skip_reason(obs, &state) {
            return Ok(Outcome::Skipped(reason));
        }

        let progress = state.progress();
        let delay_sec = calculate_delay(reported_secs, state.estimated_scheduled_time());
        let day = self.tracker.record_update(trip_id, obs.timestamp, progress);

        let log = VehicleLog {
            route_id: obs
                .route_id
                .clone()
                .unwrap_or_else(|| cached.schedule.route_id.clone()),
            trip_id: obs.trip_id.clone(),
            stop_seq: state.stop_sequence(),
            time: obs.timestamp,
            day,
            delay_sec,
            progress,
            stop_progress: state.stop_progress(),
        };
        self.sink.insert(&log)?;

        debug!(
            trip_id,
            stop_seq = log.stop_seq,
            delay_sec,
            progress,
            error_m = state.vehicle().error,
            "Vehicle delay recorded"
        );
        Ok(Outcome::Saved(log))
    }

    /// Checks a matched observation against what is known about its trip.
    fn skip_reason(&self, obs: &Observation, state: &TripState) -> Option<SkipReason> {
        let trip_id = obs.trip_id.as_str();
        if state.position() == StopPosition::BeforeFirst {
            debug!(trip_id, "Vehicle has not reached the first stop");
            return Some(SkipReason::BeforeFirstStop);
        }

        let progress = state.progress();
        let tracked = self.tracker.get(trip_id).copied();
        // after a restart the sink still remembers where the trip was
        let known_progress = tracked.map(|e| e.progress).or_else(|| {
            self.sink
                .recent_progress(trip_id, obs.timestamp, self.config.sink_lookback_secs)
        });

        if state.distance_to_last_stop() < self.config.end_stall_distance_m
            && known_progress.is_some_and(|p| (p - progress).abs() < f64::EPSILON)
        {
            return Some(SkipReason::Stalled);
        }

        if let Some(known) = known_progress
            && progress < known
        {
            warn!(
                trip_id,
                timestamp = obs.timestamp,
                known,
                progress,
                "Trip seems to go backwards"
            );
            return Some(SkipReason::Backward);
        }

        if known_progress.is_none() && state.stop_sequence() > self.config.max_initial_stop_sequence
        {
            debug!(trip_id, stop_seq = state.stop_sequence(), "Trip picked up too late");
            return Some(SkipReason::LatePickup);
        }

        if tracked.is_some_and(|e| obs.timestamp <= e.timestamp)
            || self.sink.has_duplicate(trip_id, obs.timestamp)
        {
            return Some(SkipReason::Duplicate);
        }

        if let Some(entry) = tracked
            && let Some(speed) =
                state.average_speed_kmh(obs.timestamp - entry.timestamp, progress - entry.progress)
            && speed > self.config.max_speed_kmh
        {
            warn!(
                trip_id,
                timestamp = obs.timestamp,
                speed_kmh = speed,
                "Trip is advancing implausibly fast"
            );
            return Some(SkipReason::TooFast);
        }

        None
    }

    /// Returns the projected trip, computing and caching it on first use.
    ///
    /// Trip-level matching failures are cached as well and logged only once.
    fn cached_trip(&mut self, trip_id: &str, now: i64) -> Result<Arc<CachedTrip>, ScheduleError> {
        if let Some(entry) = self.trips.get_mut(trip_id) {
            entry.last_seen = now;
            return Ok(Arc::clone(&entry.trip));
        }

        let schedule = self.schedule.trip(trip_id)?;
        let projected = ProjectedTrip::new(
            schedule.shape.clone(),
            schedule.stop_times.clone(),
            self.config.stop_tolerance_m,
        );
        if let Err(err) = &projected {
            warn!(
                trip_id,
                code = err.code(),
                error = %err,
                "Trip cannot be map-matched, ignoring its vehicles"
            );
        }

        let trip = Arc::new(CachedTrip {
            schedule,
            projected,
        });
        self.trips.insert(
            trip_id.to_string(),
            CacheEntry {
                trip: Arc::clone(&trip),
                last_seen: now,
            },
        );
        Ok(trip)
    }
}

fn log_rejection(obs: &Observation, err: &MatchError) {
    match err {
        MatchError::AlgorithmMismatch { .. } => error!(
            trip_id = %obs.trip_id,
            lat = obs.location.lat,
            lon = obs.location.lon,
            code = err.code(),
            error = %err,
            "Vehicle placement disagrees with the reported next stop"
        ),
        _ => warn!(
            trip_id = %obs.trip_id,
            lat = obs.location.lat,
            lon = obs.location.lon,
            code = err.code(),
            error = %err,
            "Vehicle could not be matched to its trip"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{GeoPoint, StopTime};
    use crate::output::MemorySink;
    use crate::schedule::StaticSchedule;

    // 1km in degrees of longitude on the equator
    const KM: f64 = 1000.0 / 111_194.926_644_558_73;
    // 2024-01-15T00:00:00Z
    const MIDNIGHT: i64 = 1_705_276_800;
    const EIGHT_AM: i64 = 8 * 3600;

    fn trip(trip_id: &str) -> TripSchedule {
        let times = [(0, 0), (300, 310), (700, 710), (1100, 1110), (1500, 1500)];
        let stop_times = times
            .iter()
            .enumerate()
            .map(|(i, (arr, dep))| StopTime {
                stop_id: format!("s{i}"),
                arrival: EIGHT_AM + arr,
                departure: EIGHT_AM + dep,
                location: GeoPoint::new(0.0, i as f64 * KM),
            })
            .collect();
        let shape = (0..5).map(|i| GeoPoint::new(0.0, i as f64 * KM)).collect();
        TripSchedule::new(trip_id.to_string(), "R1".to_string(), shape, stop_times).unwrap()
    }

    fn processor() -> Processor<StaticSchedule, MemorySink> {
        let mut schedule = StaticSchedule::new(chrono_tz::UTC);
        schedule.insert(trip("A"));
        schedule.insert(trip("B"));
        Processor::new(
            schedule,
            MemorySink::default(),
            ActiveTrips::new(chrono_tz::UTC),
            MatchConfig::default(),
        )
    }

    /// Observation `km` kilometres along the route, `secs` after 08:00.
    fn obs(trip_id: &str, km: f64, secs: i64) -> Observation {
        Observation {
            trip_id: trip_id.to_string(),
            route_id: None,
            location: GeoPoint::new(0.0, km * KM),
            timestamp: MIDNIGHT + EIGHT_AM + secs,
            next_stop_id: None,
        }
    }

    fn saved(outcome: Outcome) -> VehicleLog {
        match outcome {
            Outcome::Saved(log) => log,
            other => panic!("expected a saved record, got {other:?}"),
        }
    }

    #[test]
    fn test_records_delay() {
        let mut p = processor();
        // half way to s1 is scheduled at 08:02:30; reported at 08:03:00
        let log = saved(p.process_observation(&obs("A", 0.5, 180)).unwrap());

        assert_eq!(log.route_id, "R1");
        assert_eq!(log.stop_seq, 1);
        assert_eq!(log.delay_sec, 30);
        assert_eq!(log.day, 15);
        assert!((log.progress - 0.125).abs() < 1e-6);
        assert!((log.stop_progress - 0.5).abs() < 1e-6);
        assert!(p.tracker().is_active("A"));
        assert_eq!(p.sink().logs.len(), 1);
    }

    #[test]
    fn test_skips_backward_duplicate_and_fast() {
        let mut p = processor();
        saved(p.process_observation(&obs("A", 1.5, 400)).unwrap());

        assert_eq!(
            p.process_observation(&obs("A", 1.2, 460)).unwrap(),
            Outcome::Skipped(SkipReason::Backward)
        );
        assert_eq!(
            p.process_observation(&obs("A", 1.6, 400)).unwrap(),
            Outcome::Skipped(SkipReason::Duplicate)
        );
        // 2km in 10s
        assert_eq!(
            p.process_observation(&obs("A", 3.5, 410)).unwrap(),
            Outcome::Skipped(SkipReason::TooFast)
        );
        // 1km in 120s is 30km/h
        saved(p.process_observation(&obs("A", 2.5, 520)).unwrap());
        assert_eq!(p.sink().logs.len(), 2);
    }

    #[test]
    fn test_skips_late_pickup() {
        let mut p = processor();
        assert_eq!(
            p.process_observation(&obs("B", 2.5, 900)).unwrap(),
            Outcome::Skipped(SkipReason::LatePickup)
        );
        assert!(!p.tracker().is_active("B"));
    }

    #[test]
    fn test_stall_at_final_stop() {
        let mut p = processor();
        saved(p.process_observation(&obs("B", 0.5, 150)).unwrap());
        let log = saved(p.process_observation(&obs("B", 4.0, 1500)).unwrap());
        assert_eq!(log.progress, 1.0);
        assert_eq!(log.stop_seq, 5);

        assert_eq!(
            p.process_observation(&obs("B", 4.0, 1560)).unwrap(),
            Outcome::Skipped(SkipReason::Stalled)
        );
    }

    #[test]
    fn test_unknown_trip_and_far_fix() {
        let mut p = processor();
        assert_eq!(
            p.process_observation(&obs("Z", 0.5, 150)).unwrap(),
            Outcome::Skipped(SkipReason::UnknownTrip)
        );

        let mut far = obs("A", 0.5, 150);
        far.location.lat = 0.01;
        let outcome = p.process_observation(&far).unwrap();
        assert!(matches!(
            outcome,
            Outcome::Rejected(MatchError::VehicleOutOfPolyline { .. })
        ));
    }

    #[test]
    fn test_unreachable_stops_are_cached_rejections() {
        let mut bad = trip("C");
        bad.stop_times[2].location = GeoPoint::new(0.01, 2.0 * KM);
        let mut schedule = StaticSchedule::new(chrono_tz::UTC);
        schedule.insert(bad);
        let mut p = Processor::new(
            schedule,
            MemorySink::default(),
            ActiveTrips::new(chrono_tz::UTC),
            MatchConfig::default(),
        );

        for secs in [100, 200] {
            let outcome = p.process_observation(&obs("C", 0.5, secs)).unwrap();
            assert!(matches!(
                outcome,
                Outcome::Rejected(MatchError::StopsUnreachable { placed: 2, total: 5, .. })
            ));
        }
    }

    #[test]
    fn test_snapshot_counts_and_evicts() {
        let mut p = processor();
        let first = FeedSnapshot {
            timestamp: MIDNIGHT + EIGHT_AM + 200,
            observations: vec![obs("A", 0.5, 150), obs("B", 2.5, 150), obs("Z", 0.0, 150)],
            incomplete: 1,
        };

        let stats = p.process_snapshot(&first).unwrap();
        assert_eq!(stats.vehicles, 3);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.late_pickup, 1);
        assert_eq!(stats.unknown_trip, 1);
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.active_trips, 1);

        let later = FeedSnapshot {
            timestamp: MIDNIGHT + EIGHT_AM + 150 + 7201,
            ..Default::default()
        };
        let stats = p.process_snapshot(&later).unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.active_trips, 0);
    }

    #[test]
    fn test_sink_progress_survives_restart() {
        let mut p = processor();
        p.sink
            .insert(&VehicleLog {
                route_id: "R1".to_string(),
                trip_id: "A".to_string(),
                stop_seq: 3,
                time: MIDNIGHT + EIGHT_AM + 600,
                day: 15,
                delay_sec: 0,
                progress: 0.5,
                stop_progress: 0.0,
            })
            .unwrap();

        assert!(!p.tracker().is_active("A"));
        assert_eq!(
            p.process_observation(&obs("A", 1.5, 660)).unwrap(),
            Outcome::Skipped(SkipReason::Backward)
        );
        // known progress also lifts the late pickup check
        let log = saved(p.process_observation(&obs("A", 2.5, 720)).unwrap());
        assert_eq!(log.stop_seq, 3);
    }

    #[test]
    fn test_skips_vehicle_before_first_stop() {
        // shape starts 1km before the first stop, at the depot
        let mut depot = trip("D");
        depot.shape.insert(0, GeoPoint::new(0.0, -KM));
        let mut schedule = StaticSchedule::new(chrono_tz::UTC);
        schedule.insert(depot);
        let mut p = Processor::new(
            schedule,
            MemorySink::default(),
            ActiveTrips::new(chrono_tz::UTC),
            MatchConfig::default(),
        );

        assert_eq!(
            p.process_observation(&obs("D", -0.5, -300)).unwrap(),
            Outcome::Skipped(SkipReason::BeforeFirstStop)
        );
        assert!(!p.tracker().is_active("D"));
        assert!(p.sink().logs.is_empty());

        let log = saved(p.process_observation(&obs("D", 0.5, 180)).unwrap());
        assert_eq!(log.delay_sec, 30);
    }
}
