//! Map-matching of GTFS-Realtime vehicle positions onto scheduled trips.
//!
//! A vehicle fix is snapped onto its trip's shape, placed between two
//! scheduled stops and turned into a delay against the timetable.

pub mod cadence;
pub mod config;
pub mod delay;
pub mod fetch;
pub mod matching;
pub mod output;
pub mod parser;
pub mod processor;
pub mod schedule;
pub mod stats;
pub mod tracker;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
