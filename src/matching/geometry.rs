//! Spherical geometry helpers used by the map-matching passes.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        distance_meters(self, other)
    }
}

/// Haversine distance between two points, in meters.
pub fn distance_meters(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1_rad = p1.lat.to_radians();
    let lat2_rad = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lon = (p2.lon - p1.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Returns the point of segment `[a, b]` nearest to `x`.
///
/// The projection is done on a local equirectangular plane centred on the
/// segment, which is well below a meter of error at city scale. The result
/// is clamped to the endpoints, and a degenerate segment yields `a`.
pub fn closest_point_on_segment(x: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> GeoPoint {
    let scale = ((a.lat + b.lat) / 2.0).to_radians().cos();

    let seg_x = (b.lon - a.lon) * scale;
    let seg_y = b.lat - a.lat;
    let len_sq = seg_x * seg_x + seg_y * seg_y;
    if len_sq == 0.0 {
        return *a;
    }

    let pt_x = (x.lon - a.lon) * scale;
    let pt_y = x.lat - a.lat;
    let t = ((pt_x * seg_x + pt_y * seg_y) / len_sq).clamp(0.0, 1.0);

    GeoPoint {
        lat: a.lat + t * (b.lat - a.lat),
        lon: a.lon + t * (b.lon - a.lon),
    }
}
