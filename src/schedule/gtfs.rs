use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{ScheduleError, ScheduleProvider, TripSchedule};
use crate::matching::{GeoPoint, StopTime};

#[derive(Debug, Deserialize)]
struct AgencyRow {
    agency_timezone: String,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    route_id: String,
    trip_id: String,
    #[serde(default)]
    shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    #[serde(default)]
    stop_lat: Option<f64>,
    #[serde(default)]
    stop_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    #[serde(default)]
    arrival_time: Option<String>,
    #[serde(default)]
    departure_time: Option<String>,
    stop_id: String,
    stop_sequence: u32,
}

#[derive(Debug, Deserialize)]
struct ShapeRow {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: u32,
}

/// Where GTFS tables are read from.
enum TableSource {
    Dir(PathBuf),
    Zip(zip::ZipArchive<File>),
}

impl TableSource {
    fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self::Dir(path.to_path_buf()));
        }
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let archive = zip::ZipArchive::new(file)
            .with_context(|| format!("{} is neither a directory nor a zip", path.display()))?;
        Ok(Self::Zip(archive))
    }

    fn read<T: DeserializeOwned>(&mut self, name: &str) -> Result<Vec<T>> {
        match self {
            Self::Dir(dir) => {
                let file = File::open(dir.join(name)).with_context(|| format!("opening {name}"))?;
                read_rows(file).with_context(|| format!("parsing {name}"))
            }
            Self::Zip(archive) => {
                let file = archive
                    .by_name(name)
                    .with_context(|| format!("{name} not found in archive"))?;
                read_rows(file).with_context(|| format!("parsing {name}"))
            }
        }
    }
}

fn read_rows<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        rows.push(record);
    }
    Ok(rows)
}

/// Parses a GTFS `H:MM:SS` time into seconds; hours may exceed 23.
pub fn parse_gtfs_time(value: &str) -> Option<i64> {
    let mut parts = value.trim().split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// A GTFS static feed held in memory, assembling [`TripSchedule`]s on request.
pub struct GtfsSchedule {
    timezone: Tz,
    trips: HashMap<String, TripRow>,
    stop_times: HashMap<String, Vec<StopTimeRow>>,
    stops: HashMap<String, GeoPoint>,
    shapes: HashMap<String, Vec<GeoPoint>>,
}

impl GtfsSchedule {
    /// Loads a feed from a directory or a `.zip` archive.
    ///
    /// # Errors
    ///
    /// Fails when a required table is missing or malformed, when the agency
    /// timezone is not a valid IANA name, or when the feed has no shapes.
    #[tracing::instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut source = TableSource::open(path.as_ref())?;

        let agencies: Vec<AgencyRow> = source.read("agency.txt")?;
        let timezone = agencies
            .first()
            .ok_or_else(|| anyhow!("agency.txt has no rows"))?
            .agency_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid agency_timezone: {e}"))?;

        let shape_rows: Vec<ShapeRow> = source
            .read("shapes.txt")
            .context("feeds without shapes cannot be map-matched")?;
        if shape_rows.is_empty() {
            bail!("shapes.txt is empty");
        }

        let mut shape_points: HashMap<String, Vec<(u32, GeoPoint)>> = HashMap::new();
        for row in shape_rows {
            shape_points
                .entry(row.shape_id)
                .or_default()
                .push((row.shape_pt_sequence, GeoPoint::new(row.shape_pt_lat, row.shape_pt_lon)));
        }
        let shapes = shape_points
            .into_iter()
            .map(|(id, mut points)| {
                points.sort_by_key(|(seq, _)| *seq);
                (id, points.into_iter().map(|(_, p)| p).collect())
            })
            .collect();

        let stops = source
            .read::<StopRow>("stops.txt")?
            .into_iter()
            .filter_map(|s| Some((s.stop_id, GeoPoint::new(s.stop_lat?, s.stop_lon?))))
            .collect();

        let trips: HashMap<String, TripRow> = source
            .read::<TripRow>("trips.txt")?
            .into_iter()
            .map(|t| (t.trip_id.clone(), t))
            .collect();

        let mut stop_times: HashMap<String, Vec<StopTimeRow>> = HashMap::new();
        for row in source.read::<StopTimeRow>("stop_times.txt")? {
            stop_times.entry(row.trip_id.clone()).or_default().push(row);
        }
        for rows in stop_times.values_mut() {
            rows.sort_by_key(|r| r.stop_sequence);
        }

        info!(
            timezone = %timezone,
            trips = trips.len(),
            "GTFS schedule loaded"
        );

        Ok(Self {
            timezone,
            trips,
            stop_times,
            stops,
            shapes,
        })
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    fn assemble_stop_times(&self, trip_id: &str) -> Result<Vec<StopTime>, ScheduleError> {
        let rows = self.stop_times.get(trip_id).map_or(&[][..], Vec::as_slice);
        let mut stop_times = Vec::with_capacity(rows.len());

        for row in rows {
            let arrival = row.arrival_time.as_deref().and_then(parse_gtfs_time);
            let departure = row.departure_time.as_deref().and_then(parse_gtfs_time);
            // untimed stops carry no schedule position to compare against
            let (Some(arrival), Some(departure)) = (arrival.or(departure), departure.or(arrival))
            else {
                debug!(trip_id, stop_id = %row.stop_id, "Skipping untimed stop");
                continue;
            };

            let location = *self.stops.get(&row.stop_id).ok_or_else(|| {
                ScheduleError::InvalidSchedule {
                    trip_id: trip_id.to_string(),
                    reason: format!("stop {} has no location", row.stop_id),
                }
            })?;

            stop_times.push(StopTime {
                stop_id: row.stop_id.clone(),
                arrival,
                departure,
                location,
            });
        }

        Ok(stop_times)
    }
}

impl ScheduleProvider for GtfsSchedule {
    fn trip(&self, trip_id: &str) -> Result<Arc<TripSchedule>, ScheduleError> {
        let trip = self
            .trips
            .get(trip_id)
            .ok_or_else(|| ScheduleError::UnknownTrip(trip_id.to_string()))?;

        let shape = trip
            .shape_id
            .as_ref()
            .and_then(|id| self.shapes.get(id))
            .ok_or_else(|| ScheduleError::MissingShape(trip_id.to_string()))?;

        let stop_times = self.assemble_stop_times(trip_id)?;

        TripSchedule::new(
            trip.trip_id.clone(),
            trip.route_id.clone(),
            shape.clone(),
            stop_times,
        )
        .map(Arc::new)
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }
}
