//! Measures how often a feed publishes new vehicle positions.
//!
//! Used to pick a polling interval: a feed is considered refreshed when the
//! set of `(trip_id, timestamp)` pairs differs from the previous poll.

use std::collections::HashMap;

use crate::parser::FeedSnapshot;

#[derive(Debug, Default)]
pub struct CadenceProbe {
    last: HashMap<String, i64>,
    last_change: Option<f64>,
}

impl CadenceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a poll made at `now` (seconds, any epoch).
    ///
    /// Returns the seconds elapsed since the previous change when this poll
    /// brings new content, `None` when it does not or when it is the first
    /// change seen.
    pub fn observe(&mut self, snapshot: &FeedSnapshot, now: f64) -> Option<f64> {
        let current: HashMap<String, i64> = snapshot
            .observations
            .iter()
            .map(|o| (o.trip_id.clone(), o.timestamp))
            .collect();
        if current == self.last {
            return None;
        }

        self.last = current;
        let elapsed = self.last_change.map(|prev| now - prev);
        self.last_change = Some(now);
        elapsed
    }
}
