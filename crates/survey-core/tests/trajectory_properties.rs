//! Differential tests: indexed interpolation against a linear-scan reference

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;
use survey_core::{GpsPoint, GpsTrajectory};

fn ts_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::milliseconds(ms)
}

/// Earliest-inserted point among those matching `pred` with the extreme timestamp
fn pick<'a>(
    points: &'a [GpsPoint],
    pred: impl Fn(&GpsPoint) -> bool,
    prefer_later: bool,
) -> Option<&'a GpsPoint> {
    let mut best: Option<&GpsPoint> = None;
    for p in points.iter().filter(|p| pred(p)) {
        best = match best {
            None => Some(p),
            Some(b) if prefer_later && p.timestamp > b.timestamp => Some(p),
            Some(b) if !prefer_later && p.timestamp < b.timestamp => Some(p),
            keep => keep,
        };
    }
    best
}

/// Linear-scan reference in insertion order
fn reference(points: &[GpsPoint], t: DateTime<Utc>) -> Option<(f64, f64, f64)> {
    let value = |p: &GpsPoint| (p.latitude, p.longitude, p.chainage);
    if let Some(exact) = points.iter().find(|p| p.timestamp == t) {
        return Some(value(exact));
    }
    let before = pick(points, |p| p.timestamp < t, true);
    let after = pick(points, |p| p.timestamp > t, false);
    match (before, after) {
        (None, None) => None,
        (Some(p), None) | (None, Some(p)) => Some(value(p)),
        (Some(b), Some(a)) => {
            let span = (a.timestamp - b.timestamp).num_milliseconds() as f64;
            let f = (t - b.timestamp).num_milliseconds() as f64 / span;
            Some((
                b.latitude + (a.latitude - b.latitude) * f,
                b.longitude + (a.longitude - b.longitude) * f,
                b.chainage + (a.chainage - b.chainage) * f,
            ))
        }
    }
}

fn point_strategy() -> impl Strategy<Value = GpsPoint> {
    (0i64..200, -80.0f64..80.0, -170.0f64..170.0, 0.0f64..10_000.0)
        .prop_map(|(sec, lat, lon, chainage)| GpsPoint::new(ts_ms(sec * 1_000), lat, lon, chainage))
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * (1.0 + a.abs().max(b.abs()))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256, .. ProptestConfig::default()
    })]

    /// Binary search agrees with the linear scan, including duplicate timestamps.
    #[test]
    fn indexed_matches_linear_scan(
        points in prop::collection::vec(point_strategy(), 0..60),
        queries in prop::collection::vec(-10_000i64..210_000, 1..20),
        build_first in any::<bool>(),
    ) {
        let mut trajectory = GpsTrajectory::new();
        for p in &points {
            trajectory.add_point(p.clone());
        }
        if build_first {
            trajectory.build_index();
        }

        for q in queries {
            let t = ts_ms(q);
            let expected = reference(&points, t);
            let position = trajectory.interpolate_position(t);
            let chainage = trajectory.interpolate_chainage(t);
            match expected {
                None => {
                    prop_assert!(position.is_none());
                    prop_assert!(chainage.is_none());
                }
                Some((lat, lon, ch)) => {
                    let (got_lat, got_lon) = position.unwrap();
                    prop_assert!(close(got_lat, lat), "lat {} vs {} at {}", got_lat, lat, q);
                    prop_assert!(close(got_lon, lon), "lon {} vs {} at {}", got_lon, lon, q);
                    prop_assert!(close(chainage.unwrap(), ch));
                }
            }
        }
    }

    /// Between two points the result is the time-fraction blend of their coordinates.
    #[test]
    fn interpolation_is_linear_between_neighbours(
        lat0 in -80.0f64..80.0, lat1 in -80.0f64..80.0,
        lon0 in -170.0f64..170.0, lon1 in -170.0f64..170.0,
        gap_ms in 2i64..100_000,
        frac in 0.0f64..1.0,
    ) {
        let mut trajectory = GpsTrajectory::new();
        trajectory.add_point(GpsPoint::new(ts_ms(0), lat0, lon0, 0.0));
        trajectory.add_point(GpsPoint::new(ts_ms(gap_ms), lat1, lon1, 100.0));

        let offset = ((gap_ms as f64 * frac) as i64).clamp(1, gap_ms - 1);
        let f = offset as f64 / gap_ms as f64;
        let (lat, lon) = trajectory.interpolate_position(ts_ms(offset)).unwrap();
        prop_assert!(close(lat, lat0 + (lat1 - lat0) * f));
        prop_assert!(close(lon, lon0 + (lon1 - lon0) * f));
    }
}

#[test]
fn test_midpoint_example() {
    let mut trajectory = GpsTrajectory::new();
    trajectory.add_point(GpsPoint::new(ts_ms(0), 10.0, 20.0, 0.0));
    trajectory.add_point(GpsPoint::new(ts_ms(10_000), 10.01, 20.02, 100.0));
    let (lat, lon) = trajectory.interpolate_position(ts_ms(5_000)).unwrap();
    assert!((lat - 10.005).abs() < 1e-12);
    assert!((lon - 20.01).abs() < 1e-12);
}
