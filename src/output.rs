//! Persistence of per-observation delay records.
//!
//! [`LogSink`] is what the pipeline writes to. [`CsvLogSink`] appends rows to
//! a CSV file; [`MemorySink`] keeps them in a `Vec`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One accepted observation, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLog {
    pub route_id: String,
    pub trip_id: String,
    pub stop_seq: usize,
    /// Epoch seconds of the observation.
    pub time: i64,
    /// Service day (local day-of-year) the trip started on.
    pub day: u32,
    pub delay_sec: i64,
    pub progress: f64,
    pub stop_progress: f64,
}

pub trait LogSink {
    /// # Errors
    ///
    /// Returns an error when the record cannot be written.
    fn insert(&mut self, log: &VehicleLog) -> Result<()>;

    /// Whether a record for `trip_id` at exactly `timestamp` exists.
    fn has_duplicate(&self, trip_id: &str, timestamp: i64) -> bool;

    /// Progress of the latest record for `trip_id` within `lookback` seconds
    /// up to `timestamp`.
    fn recent_progress(&self, trip_id: &str, timestamp: i64, lookback: i64) -> Option<f64>;

    /// # Errors
    ///
    /// Returns an error when buffered records cannot be written out.
    fn flush(&mut self) -> Result<()>;
}

/// How long indexed records are kept, matching the default sink look-back.
pub const DEFAULT_RETENTION_SECS: i64 = 2 * 3600;

/// `(time, progress)` pairs per trip, in insertion order.
///
/// Only records within `retention` seconds of the newest one are kept.
#[derive(Debug)]
struct ProgressIndex {
    by_trip: HashMap<String, Vec<(i64, f64)>>,
    retention: i64,
    newest: i64,
}

impl Default for ProgressIndex {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_SECS)
    }
}

impl ProgressIndex {
    fn new(retention: i64) -> Self {
        Self {
            by_trip: HashMap::new(),
            retention,
            newest: i64::MIN,
        }
    }

    fn add(&mut self, log: &VehicleLog) {
        self.newest = self.newest.max(log.time);
        let cutoff = self.cutoff();
        let entries = self.by_trip.entry(log.trip_id.clone()).or_default();
        entries.retain(|(t, _)| *t >= cutoff);
        entries.push((log.time, log.progress));
    }

    /// Drops records older than the retention window, across all trips.
    fn prune(&mut self) -> usize {
        let cutoff = self.cutoff();
        let before = self.len();
        self.by_trip.retain(|_, entries| {
            entries.retain(|(t, _)| *t >= cutoff);
            !entries.is_empty()
        });
        before - self.len()
    }

    fn cutoff(&self) -> i64 {
        self.newest.saturating_sub(self.retention)
    }

    fn len(&self) -> usize {
        self.by_trip.values().map(Vec::len).sum()
    }

    fn contains(&self, trip_id: &str, timestamp: i64) -> bool {
        self.by_trip
            .get(trip_id)
            .is_some_and(|entries| entries.iter().any(|(t, _)| *t == timestamp))
    }

    fn latest_within(&self, trip_id: &str, timestamp: i64, lookback: i64) -> Option<f64> {
        self.by_trip
            .get(trip_id)?
            .iter()
            .filter(|(t, _)| *t <= timestamp && timestamp - *t <= lookback)
            .max_by_key(|(t, _)| *t)
            .map(|(_, p)| *p)
    }
}

/// Appends [`VehicleLog`] rows to a CSV file.
///
/// Existing rows are indexed on open so duplicate and progress lookups see
/// records written by earlier runs.
pub struct CsvLogSink {
    writer: csv::Writer<File>,
    index: ProgressIndex,
}

impl CsvLogSink {
    /// Opens `path` for appending, writing headers when the file is new or
    /// empty. Rows older than `retention` seconds before the newest row are
    /// not indexed.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or an existing row is malformed.
    pub fn open(path: &str, retention: i64) -> Result<Self> {
        let is_empty = fs::metadata(path).map_or(true, |m| m.len() == 0);
        let mut index = ProgressIndex::new(retention);

        if !is_empty {
            let mut rdr = csv::Reader::from_path(path).with_context(|| format!("reading {path}"))?;
            for result in rdr.deserialize() {
                let record: VehicleLog = result.with_context(|| format!("parsing {path}"))?;
                index.add(&record);
            }
            index.prune();
        }
        debug!(path, is_empty, records = index.len(), "Opened CSV sink");

        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let writer = WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);

        Ok(Self { writer, index })
    }
}

impl LogSink for CsvLogSink {
    fn insert(&mut self, log: &VehicleLog) -> Result<()> {
        self.writer.serialize(log)?;
        self.index.add(log);
        Ok(())
    }

    fn has_duplicate(&self, trip_id: &str, timestamp: i64) -> bool {
        self.index.contains(trip_id, timestamp)
    }

    fn recent_progress(&self, trip_id: &str, timestamp: i64, lookback: i64) -> Option<f64> {
        self.index.latest_within(trip_id, timestamp, lookback)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        let dropped = self.index.prune();
        debug!(dropped, records = self.index.len(), "CSV sink flushed");
        Ok(())
    }
}

/// Keeps records in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub logs: Vec<VehicleLog>,
    index: ProgressIndex,
}

impl LogSink for MemorySink {
    fn insert(&mut self, log: &VehicleLog) -> Result<()> {
        self.index.add(log);
        self.logs.push(log.clone());
        Ok(())
    }

    fn has_duplicate(&self, trip_id: &str, timestamp: i64) -> bool {
        self.index.contains(trip_id, timestamp)
    }

    fn recent_progress(&self, trip_id: &str, timestamp: i64, lookback: i64) -> Option<f64> {
        self.index.latest_within(trip_id, timestamp, lookback)
    }

    fn flush(&mut self) -> Result<()> {
        self.index.prune();
        info!(records = self.logs.len(), "Memory sink holds records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn log(trip_id: &str, time: i64, progress: f64) -> VehicleLog {
        VehicleLog {
            route_id: "R1".to_string(),
            trip_id: trip_id.to_string(),
            stop_seq: 2,
            time,
            day: 15,
            delay_sec: 42,
            progress,
            stop_progress: 0.5,
        }
    }

    #[test]
    fn test_memory_sink_queries() {
        let mut sink = MemorySink::default();
        sink.insert(&log("t1", 100, 0.1)).unwrap();
        sink.insert(&log("t1", 200, 0.2)).unwrap();

        assert!(sink.has_duplicate("t1", 100));
        assert!(!sink.has_duplicate("t1", 150));
        assert!(!sink.has_duplicate("t2", 100));

        assert_eq!(sink.recent_progress("t1", 250, 7200), Some(0.2));
        assert_eq!(sink.recent_progress("t1", 150, 7200), Some(0.1));
        assert_eq!(sink.recent_progress("t1", 10_000, 7200), None);
        assert_eq!(sink.recent_progress("t2", 250, 7200), None);
    }

    #[test]
    fn test_csv_sink_writes_header_once() {
        let path = temp_path("gtfs_rt_delay_test_header.csv");
        let _ = fs::remove_file(&path);

        {
            let mut sink = CsvLogSink::open(&path, DEFAULT_RETENTION_SECS).unwrap();
            sink.insert(&log("t1", 100, 0.1)).unwrap();
            sink.flush().unwrap();
        }
        {
            let mut sink = CsvLogSink::open(&path, DEFAULT_RETENTION_SECS).unwrap();
            sink.insert(&log("t1", 200, 0.2)).unwrap();
            sink.flush().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "route_id,trip_id,stop_seq,time,day,delay_sec,progress,stop_progress"
        );

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_csv_sink_indexes_existing_rows() {
        let path = temp_path("gtfs_rt_delay_test_reopen.csv");
        let _ = fs::remove_file(&path);

        {
            let mut sink = CsvLogSink::open(&path, DEFAULT_RETENTION_SECS).unwrap();
            sink.insert(&log("t1", 100, 0.3)).unwrap();
            sink.flush().unwrap();
        }

        let sink = CsvLogSink::open(&path, DEFAULT_RETENTION_SECS).unwrap();
        assert!(sink.has_duplicate("t1", 100));
        assert_eq!(sink.recent_progress("t1", 160, 7200), Some(0.3));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_csv_sink_reopens_after_empty_run() {
        let path = temp_path("gtfs_rt_delay_test_empty_run.csv");
        let _ = fs::remove_file(&path);

        // a run that records nothing leaves an empty file behind
        drop(CsvLogSink::open(&path, DEFAULT_RETENTION_SECS).unwrap());
        {
            let mut sink = CsvLogSink::open(&path, DEFAULT_RETENTION_SECS).unwrap();
            sink.insert(&log("t1", 100, 0.1)).unwrap();
            sink.insert(&log("t1", 200, 0.2)).unwrap();
            sink.flush().unwrap();
        }

        let sink = CsvLogSink::open(&path, DEFAULT_RETENTION_SECS).unwrap();
        assert!(sink.has_duplicate("t1", 200));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("route_id,trip_id"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_index_drops_records_outside_retention() {
        let mut sink = MemorySink::default();
        sink.insert(&log("yesterday", 1_000, 0.9)).unwrap();
        sink.insert(&log("t1", 1_000, 0.1)).unwrap();
        sink.insert(&log("t1", 1_000 + DEFAULT_RETENTION_SECS + 60, 0.4)).unwrap();
        sink.flush().unwrap();

        assert!(!sink.has_duplicate("t1", 1_000));
        assert!(sink.has_duplicate("t1", 1_000 + DEFAULT_RETENTION_SECS + 60));
        assert_eq!(sink.recent_progress("yesterday", 1_500, 7200), None);
        assert_eq!(sink.index.len(), 1);
        assert_eq!(sink.logs.len(), 3);
    }

    #[test]
    fn test_csv_sink_skips_old_rows_on_open() {
        let path = temp_path("gtfs_rt_delay_test_retention.csv");
        let _ = fs::remove_file(&path);

        {
            let mut sink = CsvLogSink::open(&path, 100_000).unwrap();
            sink.insert(&log("t1", 100, 0.1)).unwrap();
            sink.insert(&log("t2", 50_000, 0.2)).unwrap();
            sink.flush().unwrap();
        }

        let sink = CsvLogSink::open(&path, 7200).unwrap();
        assert!(!sink.has_duplicate("t1", 100));
        assert!(sink.has_duplicate("t2", 50_000));
        assert_eq!(sink.index.len(), 1);

        fs::remove_file(&path).unwrap();
    }
}
