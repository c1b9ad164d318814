use thiserror::Error;

/// Rejections produced while map-matching a single vehicle observation.
///
/// Every variant is recoverable at the observation level; the polling loop
/// logs it with trip context and moves on.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum MatchError {
    #[error("code: invalid_shape, description: shape has {points} point(s), at least 2 required")]
    InvalidShape { points: usize },

    #[error(
        "code: stops_unreachable, description: placed {placed} of {total} stops within {tolerance}m of the shape"
    )]
    StopsUnreachable {
        placed: usize,
        total: usize,
        tolerance: f64,
    },

    #[error(
        "code: vehicle_out_of_polyline, description: no segment within {tolerance}m of ({lat}, {lon})"
    )]
    VehicleOutOfPolyline { lat: f64, lon: f64, tolerance: f64 },

    #[error(
        "code: algorithm_mismatch, description: next stop {next_stop_id} disagrees with previous stop index {previous}"
    )]
    AlgorithmMismatch { next_stop_id: String, previous: isize },
}

impl MatchError {
    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidShape { .. } => "invalid_shape",
            Self::StopsUnreachable { .. } => "stops_unreachable",
            Self::VehicleOutOfPolyline { .. } => "vehicle_out_of_polyline",
            Self::AlgorithmMismatch { .. } => "algorithm_mismatch",
        }
    }
}
