//! GPS trajectory storage and time-based interpolation
//!
//! This module provides [`GpsTrajectory`], an append-only store of timestamped positions with
//! a lazily built, sorted timestamp index. Queries binary-search the index and interpolate
//! linearly between the bracketing points. Queries outside the recorded range clamp to the
//! nearest endpoint; nothing is extrapolated.

use crate::{Result, SurveyError, utils};
use chrono::{DateTime, Utc};
use geo::Rect;
use std::io::Read;
use std::sync::OnceLock;

/// A single GPS fix
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Distance along the route in meters
    pub chainage: f64,
    pub elevation: Option<f64>,
    pub speed_kmh: Option<f64>,
}

impl GpsPoint {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, chainage: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            chainage,
            elevation: None,
            speed_kmh: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    #[inline]
    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// Trajectory record as handed over by an external parser
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrajectoryRecord {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub chainage_m: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub elevation: Option<f64>,
}

/// Interpolated state at one instant
#[derive(Clone, Copy, Debug, PartialEq)]
struct Sample {
    latitude: f64,
    longitude: f64,
    chainage: f64,
}

/// Sorted view over the point collection: `times[k]` is the timestamp of `points[order[k]]`
#[derive(Clone, Debug)]
struct TimeIndex {
    order: Vec<usize>,
    times: Vec<DateTime<Utc>>,
}

impl TimeIndex {
    fn build(points: &[GpsPoint]) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("trajectory::build_index");

        let mut order: Vec<usize> = (0..points.len()).collect();
        // Stable: equal timestamps keep insertion order
        order.sort_by_key(|&i| points[i].timestamp);
        let times = order.iter().map(|&i| points[i].timestamp).collect();
        Self { order, times }
    }

    /// First sorted position whose timestamp equals `times[k]`
    #[inline]
    fn run_start(&self, k: usize) -> usize {
        let t = self.times[k];
        self.times.partition_point(|x| *x < t)
    }
}

/// Time-ordered GPS trajectory with O(log n) interpolation
#[derive(Clone, Debug, Default)]
pub struct GpsTrajectory {
    points: Vec<GpsPoint>,
    /// True while `points` itself is in non-decreasing time order
    sorted: bool,
    index: OnceLock<TimeIndex>,
    rejected_records: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl GpsTrajectory {
    pub fn new() -> Self {
        Self {
            sorted: true,
            ..Default::default()
        }
    }

    /// Build a trajectory from pre-typed records, skipping malformed ones
    pub fn from_records(records: impl IntoIterator<Item = TrajectoryRecord>) -> Self {
        let mut trajectory = Self::new();
        for record in records {
            trajectory.add_record(record);
        }
        trajectory
    }

    /// Append a point. Insertion order is free; the index is rebuilt on the next query.
    pub fn add_point(&mut self, point: GpsPoint) {
        if let Some(last) = self.points.last() {
            self.sorted &= last.timestamp <= point.timestamp;
        }
        self.points.push(point);
        self.index.take();
    }

    /// Validate and append a record.
    ///
    /// Records with non-finite or out-of-range coordinates, or a non-finite chainage, are
    /// treated as missing data: they are skipped, logged and counted in
    /// [`rejected_records`](Self::rejected_records). Returns whether the record was kept.
    pub fn add_record(&mut self, record: TrajectoryRecord) -> bool {
        if !utils::is_valid_coordinate(record.latitude, record.longitude)
            || !record.chainage_m.is_finite()
        {
            tracing::warn!(
                "Skipping malformed trajectory record at {}: ({}, {}) chainage {}",
                record.timestamp,
                record.latitude,
                record.longitude,
                record.chainage_m
            );
            self.rejected_records += 1;
            return false;
        }

        let mut point = GpsPoint::new(
            record.timestamp,
            record.latitude,
            record.longitude,
            record.chainage_m,
        );
        point.elevation = record.elevation.filter(|e| e.is_finite());
        self.add_point(point);
        true
    }

    /// Stable-sort the stored points by timestamp and build the search index.
    ///
    /// Idempotent when nothing was inserted since the last build.
    pub fn build_index(&mut self) {
        if !self.sorted {
            self.points.sort_by_key(|p| p.timestamp);
            self.sorted = true;
            self.index.take();
        }
        self.index();
    }

    #[inline]
    fn index(&self) -> &TimeIndex {
        self.index.get_or_init(|| TimeIndex::build(&self.points))
    }

    #[inline]
    fn sorted_point(&self, k: usize) -> &GpsPoint {
        &self.points[self.index().order[k]]
    }

    /// Interpolate the full state at `t`, clamping outside the recorded range
    fn sample(&self, t: DateTime<Utc>) -> Option<Sample> {
        let index = self.index();
        let n = index.times.len();
        if n == 0 {
            return None;
        }

        let exact_or_successor = index.times.partition_point(|x| *x < t);
        let canonical = |p: &GpsPoint| Sample {
            latitude: p.latitude,
            longitude: p.longitude,
            chainage: p.chainage,
        };

        if exact_or_successor < n && index.times[exact_or_successor] == t {
            return Some(canonical(self.sorted_point(exact_or_successor)));
        }
        if exact_or_successor == 0 {
            return Some(canonical(self.sorted_point(0)));
        }
        if exact_or_successor == n {
            return Some(canonical(self.sorted_point(index.run_start(n - 1))));
        }

        let before = self.sorted_point(index.run_start(exact_or_successor - 1));
        let after = self.sorted_point(exact_or_successor);
        let span = utils::seconds_between(before.timestamp, after.timestamp);
        let fraction = utils::seconds_between(before.timestamp, t) / span;

        Some(Sample {
            latitude: utils::lerp(before.latitude, after.latitude, fraction),
            longitude: utils::lerp(before.longitude, after.longitude, fraction),
            chainage: utils::lerp(before.chainage, after.chainage, fraction),
        })
    }

    /// Interpolated `(latitude, longitude)` at `t`, or `None` for an empty trajectory
    pub fn interpolate_position(&self, t: DateTime<Utc>) -> Option<(f64, f64)> {
        self.sample(t).map(|s| (s.latitude, s.longitude))
    }

    /// Interpolated chainage in meters at `t`, or `None` for an empty trajectory
    pub fn interpolate_chainage(&self, t: DateTime<Utc>) -> Option<f64> {
        self.sample(t).map(|s| s.chainage)
    }

    /// Points with `start <= timestamp <= end`, in time order
    pub fn points_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &GpsPoint> + '_ {
        let index = self.index();
        let from = index.times.partition_point(|x| *x < start);
        let to = index.times.partition_point(|x| *x <= end).max(from);
        index.order[from..to].iter().map(|&i| &self.points[i])
    }

    /// All points in time order
    pub fn iter_sorted(&self) -> impl Iterator<Item = &GpsPoint> + '_ {
        self.index().order.iter().map(|&i| &self.points[i])
    }

    /// First and last timestamps, or `None` if empty
    pub fn time_extent(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let times = &self.index().times;
        Some((*times.first()?, *times.last()?))
    }

    /// Chainage of the point closest to `(lat, lon)` by planar degree distance
    pub fn nearest_chainage(&self, lat: f64, lon: f64) -> Option<f64> {
        if !utils::is_valid_coordinate(lat, lon) {
            return None;
        }
        self.points
            .iter()
            .map(|p| {
                let d = (p.latitude - lat).powi(2) + (p.longitude - lon).powi(2);
                (d, p.chainage)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, chainage)| chainage)
    }

    /// Sum of Haversine distances between consecutive points in meters
    pub fn total_distance_m(&self) -> f64 {
        let mut total = 0.0;
        let mut prev: Option<&GpsPoint> = None;
        for point in self.iter_sorted() {
            if let Some(prev) = prev {
                total += utils::haversine_distance(
                    utils::to_point(prev.latitude, prev.longitude),
                    utils::to_point(point.latitude, point.longitude),
                );
            }
            prev = Some(point);
        }
        total
    }

    /// Bounding box in degrees (x = longitude, y = latitude)
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y) = (first.longitude, first.latitude);
        let (mut max_x, mut max_y) = (min_x, min_y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.longitude);
            min_y = min_y.min(p.latitude);
            max_x = max_x.max(p.longitude);
            max_y = max_y.max(p.latitude);
        }
        Some(Rect::new(
            geo::Coord { x: min_x, y: min_y },
            geo::Coord { x: max_x, y: max_y },
        ))
    }

    /// Build a trajectory from GPX data.
    ///
    /// Every waypoint carrying a time becomes a point. Chainage is the accumulated Haversine
    /// distance from the first timed waypoint. Waypoints without time are skipped.
    pub fn from_gpx(gpx_data: gpx::Gpx) -> Result<Self> {
        let mut trajectory = Self::new();
        let mut chainage = 0.0;
        let mut prev: Option<geo::Point<f64>> = None;
        let mut untimed = 0usize;

        for track in &gpx_data.tracks {
            for segment in &track.segments {
                for waypoint in &segment.points {
                    let Some(timestamp) = waypoint.time.as_ref().and_then(gpx_time_to_utc) else {
                        untimed += 1;
                        continue;
                    };
                    let point = waypoint.point();
                    if !utils::is_valid_coordinate(point.y(), point.x()) {
                        trajectory.rejected_records += 1;
                        continue;
                    }
                    if let Some(prev) = prev {
                        chainage += utils::haversine_distance(prev, point);
                    }
                    prev = Some(point);

                    trajectory.add_point(GpsPoint {
                        timestamp,
                        latitude: point.y(),
                        longitude: point.x(),
                        chainage,
                        elevation: waypoint.elevation,
                        speed_kmh: waypoint.speed.map(|mps| mps * 3.6),
                    });
                }
            }
        }

        if untimed > 0 {
            tracing::warn!("Skipped {} GPX waypoints without a timestamp", untimed);
        }
        if trajectory.is_empty() {
            return Err(SurveyError::EmptyTrajectory);
        }
        trajectory.build_index();
        Ok(trajectory)
    }

    /// Parse GPX from a reader into a trajectory
    pub fn read_gpx<R: Read>(reader: R) -> Result<Self> {
        let gpx_data = gpx::read(reader)?;
        Self::from_gpx(gpx_data)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of records skipped as malformed
    #[inline]
    pub fn rejected_records(&self) -> usize {
        self.rejected_records
    }

    /// Raw points in storage order (time order after [`build_index`](Self::build_index))
    #[inline]
    pub fn points(&self) -> &[GpsPoint] {
        &self.points
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.sorted = true;
        self.index.take();
        self.rejected_records = 0;
    }
}

fn gpx_time_to_utc(time: &gpx::Time) -> Option<DateTime<Utc>> {
    let formatted = time.format().ok()?;
    DateTime::parse_from_rfc3339(&formatted)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| formatted.parse::<DateTime<Utc>>())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn create_test_trajectory() -> GpsTrajectory {
        let mut trajectory = GpsTrajectory::new();
        trajectory.add_point(GpsPoint::new(ts(0), 10.0, 20.0, 0.0));
        trajectory.add_point(GpsPoint::new(ts(10), 10.01, 20.02, 100.0));
        trajectory.add_point(GpsPoint::new(ts(20), 10.02, 20.04, 250.0));
        trajectory
    }

    #[test]
    fn test_interpolate_midpoint() {
        let trajectory = create_test_trajectory();
        let (lat, lon) = trajectory.interpolate_position(ts(5)).unwrap();
        assert!((lat - 10.005).abs() < 1e-9);
        assert!((lon - 20.01).abs() < 1e-9);
        let chainage = trajectory.interpolate_chainage(ts(15)).unwrap();
        assert!((chainage - 175.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_exact_point() {
        let trajectory = create_test_trajectory();
        assert_eq!(trajectory.interpolate_position(ts(10)), Some((10.01, 20.02)));
        assert_eq!(trajectory.interpolate_chainage(ts(20)), Some(250.0));
    }

    #[test]
    fn test_interpolate_clamps_outside_range() {
        let trajectory = create_test_trajectory();
        assert_eq!(trajectory.interpolate_position(ts(-100)), Some((10.0, 20.0)));
        assert_eq!(trajectory.interpolate_chainage(ts(1000)), Some(250.0));
    }

    #[test]
    fn test_empty_trajectory_returns_none() {
        let trajectory = GpsTrajectory::new();
        assert!(trajectory.interpolate_position(ts(0)).is_none());
        assert!(trajectory.interpolate_chainage(ts(0)).is_none());
        assert!(trajectory.time_extent().is_none());
        assert!(trajectory.bounding_box().is_none());
    }

    #[test]
    fn test_unordered_insertion() {
        let mut trajectory = GpsTrajectory::new();
        trajectory.add_point(GpsPoint::new(ts(20), 10.02, 20.04, 250.0));
        trajectory.add_point(GpsPoint::new(ts(0), 10.0, 20.0, 0.0));
        trajectory.add_point(GpsPoint::new(ts(10), 10.01, 20.02, 100.0));

        // Lazy index works without an explicit build
        assert_eq!(trajectory.interpolate_chainage(ts(5)), Some(50.0));

        trajectory.build_index();
        let times: Vec<_> = trajectory.points().iter().map(|p| p.timestamp).collect();
        assert_eq!(times, vec![ts(0), ts(10), ts(20)]);
        assert_eq!(trajectory.interpolate_chainage(ts(5)), Some(50.0));
    }

    #[test]
    fn test_insert_invalidates_index() {
        let mut trajectory = create_test_trajectory();
        assert_eq!(trajectory.interpolate_chainage(ts(30)), Some(250.0));
        trajectory.add_point(GpsPoint::new(ts(40), 10.04, 20.08, 450.0));
        assert_eq!(trajectory.interpolate_chainage(ts(30)), Some(350.0));
    }

    #[test]
    fn test_duplicate_timestamps_prefer_earliest_inserted() {
        let mut trajectory = GpsTrajectory::new();
        trajectory.add_point(GpsPoint::new(ts(0), 0.0, 0.0, 0.0));
        trajectory.add_point(GpsPoint::new(ts(10), 1.0, 1.0, 100.0));
        trajectory.add_point(GpsPoint::new(ts(10), 2.0, 2.0, 200.0));
        trajectory.add_point(GpsPoint::new(ts(20), 3.0, 3.0, 300.0));

        assert_eq!(trajectory.interpolate_chainage(ts(10)), Some(100.0));
        // Predecessor for t in (10, 20) is the first point inserted at t=10
        assert_eq!(trajectory.interpolate_chainage(ts(15)), Some(200.0));
        assert_eq!(trajectory.interpolate_chainage(ts(5)), Some(50.0));

        trajectory.build_index();
        assert_eq!(trajectory.interpolate_chainage(ts(10)), Some(100.0));
    }

    #[test]
    fn test_add_record_rejects_malformed() {
        let mut trajectory = GpsTrajectory::new();
        let good = TrajectoryRecord {
            timestamp: ts(0),
            latitude: 51.5,
            longitude: -0.1,
            chainage_m: 0.0,
            elevation: Some(12.0),
        };
        assert!(trajectory.add_record(good.clone()));
        assert!(!trajectory.add_record(TrajectoryRecord {
            latitude: f64::NAN,
            ..good.clone()
        }));
        assert!(!trajectory.add_record(TrajectoryRecord {
            longitude: 181.0,
            ..good.clone()
        }));
        assert!(!trajectory.add_record(TrajectoryRecord {
            chainage_m: f64::INFINITY,
            ..good
        }));
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory.rejected_records(), 3);
        assert_eq!(trajectory.points()[0].elevation, Some(12.0));
    }

    #[test]
    fn test_points_in_range() {
        let trajectory = create_test_trajectory();
        let chainages: Vec<f64> = trajectory
            .points_in_range(ts(5), ts(20))
            .map(|p| p.chainage)
            .collect();
        assert_eq!(chainages, vec![100.0, 250.0]);
        assert_eq!(trajectory.points_in_range(ts(21), ts(30)).count(), 0);
        assert_eq!(trajectory.points_in_range(ts(30), ts(0)).count(), 0);
    }

    #[test]
    fn test_time_extent_and_distance() {
        let trajectory = create_test_trajectory();
        assert_eq!(trajectory.time_extent(), Some((ts(0), ts(20))));
        let distance = trajectory.total_distance_m();
        // Each hop is roughly 2.4 km
        assert!(distance > 4000.0 && distance < 6000.0);
    }

    #[test]
    fn test_nearest_chainage() {
        let trajectory = create_test_trajectory();
        assert_eq!(trajectory.nearest_chainage(10.011, 20.019), Some(100.0));
        assert_eq!(trajectory.nearest_chainage(f64::NAN, 0.0), None);
        assert_eq!(GpsTrajectory::new().nearest_chainage(0.0, 0.0), None);
    }

    #[test]
    fn test_bounding_box() {
        let trajectory = create_test_trajectory();
        let bbox = trajectory.bounding_box().unwrap();
        assert_eq!(bbox.min().y, 10.0);
        assert_eq!(bbox.max().x, 20.04);
    }

    #[test]
    fn test_read_gpx() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="survey-core" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <trkseg>
      <trkpt lat="51.5074" lon="-0.1278"><ele>11.0</ele><time>2024-05-01T10:00:00Z</time></trkpt>
      <trkpt lat="51.5076" lon="-0.1276"><time>2024-05-01T10:00:05Z</time></trkpt>
      <trkpt lat="51.5078" lon="-0.1274"></trkpt>
      <trkpt lat="51.5080" lon="-0.1272"><time>2024-05-01T10:00:10Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>"#;
        let trajectory = GpsTrajectory::read_gpx(xml.as_bytes()).unwrap();
        assert_eq!(trajectory.len(), 3);
        assert_eq!(trajectory.points()[0].chainage, 0.0);
        assert_eq!(trajectory.points()[0].elevation, Some(11.0));
        assert!(trajectory.points()[2].chainage > trajectory.points()[1].chainage);

        let (start, end) = trajectory.time_extent().unwrap();
        assert_eq!((end - start).num_seconds(), 10);
    }

    #[test]
    fn test_gpx_without_times_is_empty() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="survey-core" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg><trkpt lat="51.5" lon="-0.1"></trkpt></trkseg></trk>
</gpx>"#;
        let result = GpsTrajectory::read_gpx(xml.as_bytes());
        assert!(matches!(result, Err(SurveyError::EmptyTrajectory)));
    }

    #[test]
    fn test_clear() {
        let mut trajectory = create_test_trajectory();
        trajectory.clear();
        assert!(trajectory.is_empty());
        assert!(trajectory.interpolate_position(ts(0)).is_none());
    }
}
