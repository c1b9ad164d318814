//! Trip map-matching and progress engine.
//!
//! Snaps scheduled stops and live vehicle fixes onto a route shape and turns
//! the result into a [`TripState`]: the last stop passed, progress through
//! the current interval and the trip, and the scheduled time matching the
//! vehicle's position. Everything here is pure and synchronous; the only
//! process-wide state lives in [`crate::tracker`].

pub mod error;
pub mod geometry;
pub mod polyline;
pub mod proximity;
pub mod stops;
pub mod trip_state;
pub mod vehicle;

pub use error::MatchError;
pub use geometry::{GeoPoint, closest_point_on_segment, distance_meters};
pub use polyline::{Polyline, Segment};
pub use stops::{StopProjection, StopTime, project_stops, project_stops_relaxed};
pub use trip_state::{ProjectedTrip, StopPosition, TripState};
pub use vehicle::{VehicleFix, VehicleProjection, project_vehicle};
