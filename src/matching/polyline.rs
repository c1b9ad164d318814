use super::error::MatchError;
use super::geometry::{GeoPoint, distance_meters};

/// An immutable route shape with precomputed segment lengths.
///
/// Built once per shape and shared read-only between observations.
#[derive(Debug, Clone)]
pub struct Polyline {
    points: Vec<GeoPoint>,
    segment_lengths: Vec<f64>,
    /// Distance from the first point to point `i`; `offsets[0] == 0`.
    offsets: Vec<f64>,
    total_length: f64,
}

/// A borrowed view of one segment `[start, end]` of a [`Polyline`].
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub index: usize,
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub length: f64,
    /// Cumulative distance from the polyline start to `start`.
    pub offset: f64,
}

impl Polyline {
    /// # Errors
    ///
    /// Returns [`MatchError::InvalidShape`] when fewer than two points are given.
    pub fn new(points: Vec<GeoPoint>) -> Result<Self, MatchError> {
        if points.len() < 2 {
            return Err(MatchError::InvalidShape {
                points: points.len(),
            });
        }

        let segment_lengths: Vec<f64> = points
            .windows(2)
            .map(|pair| distance_meters(&pair[0], &pair[1]))
            .collect();

        let mut offsets = Vec::with_capacity(points.len());
        let mut total_length = 0.0;
        offsets.push(0.0);
        for length in &segment_lengths {
            total_length += length;
            offsets.push(total_length);
        }

        Ok(Self {
            points,
            segment_lengths,
            offsets,
            total_length,
        })
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segment_lengths.len()
    }

    pub fn point(&self, index: usize) -> Option<GeoPoint> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn segment_length(&self, index: usize) -> Option<f64> {
        self.segment_lengths.get(index).copied()
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn segment(&self, index: usize) -> Option<Segment> {
        let length = *self.segment_lengths.get(index)?;
        Some(Segment {
            index,
            start: self.points[index],
            end: self.points[index + 1],
            length,
            offset: self.offsets[index],
        })
    }

    /// Iterates segments starting at `from`; yields nothing when `from` is
    /// past the last segment.
    pub fn segments_from(&self, from: usize) -> impl Iterator<Item = Segment> + '_ {
        (from..self.segment_count()).filter_map(|i| self.segment(i))
    }
}
