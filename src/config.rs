//! Tuning parameters for matching and the observation pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tracker::DEFAULT_EVICTION_SECS;

/// Thresholds applied while processing observations.
///
/// Stored as a JSON object on disk; absent keys take their defaults:
/// ```json
/// { "stop_tolerance_m": 30.0, "vehicle_tolerance_m": 50.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Initial distance within which a stop must lie of the shape; doubled once on failure.
    pub stop_tolerance_m: f64,
    /// Distance within which a vehicle fix must lie of the shape.
    pub vehicle_tolerance_m: f64,
    /// Idle time after which a trip is forgotten.
    pub eviction_window_secs: i64,
    /// Average speeds above this between two fixes are rejected.
    pub max_speed_kmh: f64,
    /// Within this distance of the final stop, an unchanged progress is a stall.
    pub end_stall_distance_m: f64,
    /// Untracked trips first seen past this stop sequence are ignored.
    pub max_initial_stop_sequence: usize,
    /// How far back the sink is searched for a trip's progress.
    pub sink_lookback_secs: i64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            stop_tolerance_m: 30.0,
            vehicle_tolerance_m: 50.0,
            eviction_window_secs: DEFAULT_EVICTION_SECS,
            max_speed_kmh: 120.0,
            end_stall_distance_m: 100.0,
            max_initial_stop_sequence: 2,
            sink_lookback_secs: DEFAULT_EVICTION_SECS,
        }
    }
}

impl MatchConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config = serde_json::from_str(&content).with_context(|| format!("parsing {path}"))?;
        Ok(config)
    }
}
