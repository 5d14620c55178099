//! Span events produced by the matcher

use crate::trajectory::GpsTrajectory;
use crate::{Result, SurveyError, utils};
use chrono::{DateTime, SecondsFormat, Utc};

/// Whether an event's end was recorded or inferred
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Completeness {
    Complete,
    /// The end record was missing; the end time was inferred
    InferredEnd,
}

/// A matched span event over a time and chainage range
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    id: String,
    name: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    pub start_chainage: f64,
    pub end_chainage: f64,
    pub start_lat: Option<f64>,
    pub start_lon: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lon: Option<f64>,
    pub completeness: Completeness,
    /// Non-overlap render bucket
    pub layer: usize,
    pub file_id: String,
    /// End was recorded before start; times are kept as matched
    timing_anomaly: bool,
}

impl Event {
    /// Create a complete event. Rejects `start_time > end_time`.
    pub fn new(
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        start_chainage: f64,
        end_chainage: f64,
    ) -> Result<Self> {
        if start_time > end_time {
            return Err(SurveyError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }
        Ok(Self::from_match(
            name.into(),
            start_time,
            end_time,
            start_chainage,
            end_chainage,
            Completeness::Complete,
        ))
    }

    /// Build an event from matched records without validating the time order
    pub(crate) fn from_match(
        name: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        start_chainage: f64,
        end_chainage: f64,
        completeness: Completeness,
    ) -> Self {
        Self {
            id: make_id(&name, start_time),
            timing_anomaly: end_time < start_time,
            name,
            start_time,
            end_time,
            start_chainage,
            end_chainage,
            start_lat: None,
            start_lon: None,
            end_lat: None,
            end_lon: None,
            completeness,
            layer: 0,
            file_id: String::new(),
        }
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }

    /// `"{name}_{start}"` in RFC 3339, with sub-second digits only when the start has them.
    /// Events with the same name and the same start instant share an id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[inline]
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn duration_secs(&self) -> f64 {
        utils::seconds_between(self.start_time, self.end_time)
    }

    pub fn length_m(&self) -> f64 {
        (self.end_chainage - self.start_chainage).abs()
    }

    /// End was recorded before the start it was paired with
    pub fn has_timing_anomaly(&self) -> bool {
        self.timing_anomaly
    }

    pub fn max_length_m(&self) -> Option<f64> {
        max_length_for_event(&self.name)
    }

    pub fn is_length_exceeded(&self) -> bool {
        self.max_length_m().is_some_and(|max| self.length_m() > max)
    }

    /// Replace both times. Rejects `start > end` and leaves the event unchanged.
    pub fn set_times(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        if start > end {
            return Err(SurveyError::InvalidTimeRange { start, end });
        }
        self.start_time = start;
        self.end_time = end;
        self.timing_anomaly = false;
        self.id = make_id(&self.name, start);
        Ok(())
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.id = make_id(&self.name, self.start_time);
    }

    /// Fill start/end positions from the trajectory. Positions outside valid WGS84 bounds
    /// are left unset.
    pub fn enrich(&mut self, trajectory: &GpsTrajectory) {
        let valid = |pos: Option<(f64, f64)>| {
            pos.filter(|&(lat, lon)| utils::is_valid_coordinate(lat, lon))
        };
        if let Some((lat, lon)) = valid(trajectory.interpolate_position(self.start_time)) {
            self.start_lat = Some(lat);
            self.start_lon = Some(lon);
        }
        if let Some((lat, lon)) = valid(trajectory.interpolate_position(self.end_time)) {
            self.end_lat = Some(lat);
            self.end_lon = Some(lon);
        }
    }

    /// Recompute chainage and positions after the times were edited
    pub fn refresh_from_trajectory(&mut self, trajectory: &GpsTrajectory) {
        if let Some(chainage) = trajectory.interpolate_chainage(self.start_time) {
            self.start_chainage = chainage;
        }
        if let Some(chainage) = trajectory.interpolate_chainage(self.end_time) {
            self.end_chainage = chainage;
        }
        self.start_lat = None;
        self.start_lon = None;
        self.end_lat = None;
        self.end_lon = None;
        self.enrich(trajectory);
    }

    pub fn start_position(&self) -> Option<(f64, f64)> {
        self.start_lat.zip(self.start_lon)
    }

    pub fn end_position(&self) -> Option<(f64, f64)> {
        self.end_lat.zip(self.end_lon)
    }

    /// Whether the event touches `[start, end]`
    #[inline]
    pub fn overlaps_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.end_time >= start && self.start_time <= end
    }
}

fn make_id(name: &str, start: DateTime<Utc>) -> String {
    format!("{}_{}", name, start.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Maximum plausible length in meters for known span event types
pub fn max_length_for_event(name: &str) -> Option<f64> {
    let max = match name {
        "Bridge" => 400.0,
        "Cattle Grid" => 50.0,
        "Detour" => 500.0,
        "Pavers" => 150.0,
        "Railway Crossing" => 100.0,
        "Road Works" => 500.0,
        "Speed Hump" => 120.0,
        "Surface Contamination" => 500.0,
        "Unsealed Road" => 1000.0,
        "Wet surface" => 200.0,
        _ => return None,
    };
    Some(max)
}

/// Assign render layers so that events sharing a layer never overlap in time.
///
/// Greedy first-fit in start order over at most `max_layers` layers. An event that fits
/// nowhere goes to layer 0.
pub fn assign_layers(events: &mut [Event], max_layers: usize) {
    let max_layers = max_layers.max(1);
    let mut order: Vec<usize> = (0..events.len()).collect();
    order.sort_by_key(|&i| events[i].start_time);

    let mut layer_ends: Vec<DateTime<Utc>> = Vec::with_capacity(max_layers);
    for i in order {
        let event = &mut events[i];
        let free = layer_ends.iter().position(|&end| end <= event.start_time);
        event.layer = match free {
            Some(layer) => {
                layer_ends[layer] = event.end_time.max(event.start_time);
                layer
            }
            None if layer_ends.len() < max_layers => {
                layer_ends.push(event.end_time.max(event.start_time));
                layer_ends.len() - 1
            }
            None => 0,
        };
    }
}
