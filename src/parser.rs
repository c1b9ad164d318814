//! Protobuf decoding of GTFS Realtime feeds into vehicle observations.

use anyhow::Result;
use chrono::Utc;
use prost::Message;
use serde::Serialize;

use crate::gtfs_rt::{FeedMessage, VehiclePosition};
use crate::matching::{GeoPoint, VehicleFix};

/// One vehicle report extracted from a feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub trip_id: String,
    pub route_id: Option<String>,
    pub location: GeoPoint,
    /// Epoch seconds.
    pub timestamp: i64,
    pub next_stop_id: Option<String>,
}

impl Observation {
    pub fn fix(&self) -> VehicleFix {
        VehicleFix {
            location: self.location,
            timestamp: self.timestamp,
            next_stop_id: self.next_stop_id.clone(),
        }
    }
}

/// The usable content of one poll of the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedSnapshot {
    /// Header timestamp, or the local clock when the feed omits it.
    pub timestamp: i64,
    pub observations: Vec<Observation>,
    /// Vehicle entities dropped for lacking a trip, position or timestamp.
    pub incomplete: usize,
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Extracts the vehicle observations of `feed`.
pub fn snapshot(feed: &FeedMessage) -> FeedSnapshot {
    let header_timestamp = feed.header.timestamp.and_then(|t| i64::try_from(t).ok());
    let mut snapshot = FeedSnapshot {
        timestamp: header_timestamp.unwrap_or_else(|| Utc::now().timestamp()),
        ..Default::default()
    };

    for entity in &feed.entity {
        if entity.is_deleted() {
            continue;
        }
        let Some(vehicle) = &entity.vehicle else {
            continue;
        };

        match observation(vehicle, header_timestamp) {
            Some(obs) => snapshot.observations.push(obs),
            None => snapshot.incomplete += 1,
        }
    }

    snapshot
}

fn observation(vehicle: &VehiclePosition, header_timestamp: Option<i64>) -> Option<Observation> {
    let trip = vehicle.trip.as_ref()?;
    let trip_id = non_empty(trip.trip_id.as_deref())?;
    let position = vehicle.position.as_ref()?;
    let timestamp = vehicle
        .timestamp
        .and_then(|t| i64::try_from(t).ok())
        .or(header_timestamp)?;

    Some(Observation {
        trip_id,
        route_id: non_empty(trip.route_id.as_deref()),
        location: GeoPoint::new(f64::from(position.latitude), f64::from(position.longitude)),
        timestamp,
        next_stop_id: non_empty(vehicle.stop_id.as_deref()),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, Position, TripDescriptor};

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // An empty byte array decodes to a FeedMessage with default values
        let feed = parse_feed(&[]).unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        assert!(parse_feed(&invalid_bytes).is_err());
    }

    #[test]
    fn test_parse_round_trips_header() {
        let feed = FeedMessage {
            header: create_header(Some(1234567890)),
            entity: vec![],
        };
        let parsed = parse_feed(&feed.encode_to_vec()).unwrap();

        assert_eq!(parsed.header.gtfs_realtime_version, "2.0");
        assert_eq!(parsed.header.timestamp, Some(1234567890));
    }

    #[test]
    fn test_snapshot_extracts_observations() {
        let feed = FeedMessage {
            header: create_header(Some(1_700_000_000)),
            entity: vec![
                vehicle_entity("v1", Some("T1"), Some(1_699_999_990), Some("S3")),
                vehicle_entity("v2", Some("T2"), None, Some("")),
                vehicle_entity("v3", None, Some(1_699_999_990), None),
                vehicle_entity("v4", Some("  "), Some(1_699_999_990), None),
                FeedEntity {
                    id: "alert-only".to_string(),
                    ..Default::default()
                },
            ],
        };

        let snapshot = snapshot(&feed);
        assert_eq!(snapshot.timestamp, 1_700_000_000);
        assert_eq!(snapshot.observations.len(), 2);
        assert_eq!(snapshot.incomplete, 2);

        let first = &snapshot.observations[0];
        assert_eq!(first.trip_id, "T1");
        assert_eq!(first.route_id.as_deref(), Some("R1"));
        assert_eq!(first.timestamp, 1_699_999_990);
        assert_eq!(first.next_stop_id.as_deref(), Some("S3"));
        assert!((first.location.lat - 42.145).abs() < 1e-5);

        // missing vehicle timestamp falls back to the header, empty stop id is no hint
        let second = &snapshot.observations[1];
        assert_eq!(second.timestamp, 1_700_000_000);
        assert_eq!(second.next_stop_id, None);
    }

    #[test]
    fn test_snapshot_skips_deleted_entities() {
        let mut entity = vehicle_entity("v1", Some("T1"), Some(10), None);
        entity.is_deleted = Some(true);
        let feed = FeedMessage {
            header: create_header(Some(10)),
            entity: vec![entity],
        };

        assert!(snapshot(&feed).observations.is_empty());
    }

    // Helper functions for tests
    fn create_header(timestamp: Option<u64>) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp,
            incrementality: None,
            feed_version: None,
        }
    }

    fn vehicle_entity(
        id: &str,
        trip_id: Option<&str>,
        timestamp: Option<u64>,
        stop_id: Option<&str>,
    ) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            vehicle: Some(VehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: trip_id.map(str::to_string),
                    route_id: Some("R1".to_string()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: 42.145,
                    longitude: 24.8003,
                    bearing: None,
                    odometer: None,
                    speed: None,
                }),
                stop_id: stop_id.map(str::to_string),
                timestamp,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
