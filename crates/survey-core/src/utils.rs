//! Utility functions for time arithmetic and coordinate handling

use chrono::{DateTime, TimeDelta, Utc};
use geo::Point;

/// Valid WGS84 latitude range in degrees
pub const MAX_LATITUDE: f64 = 90.0;

/// Valid WGS84 longitude range in degrees
pub const MAX_LONGITUDE: f64 = 180.0;

/// Earth's mean radius in meters
pub const EARTH_RADIUS_M: f64 = 6371000.0;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Signed number of seconds from `from` to `to`, with microsecond resolution
#[inline]
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / MICROS_PER_SECOND,
        None => delta.num_seconds() as f64,
    }
}

/// Shift `t` by a fractional number of seconds, saturating at the representable range
#[inline]
pub fn offset_by_secs(t: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    let micros = (secs * MICROS_PER_SECOND).round();
    let saturated = if secs >= 0.0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    };
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return saturated;
    }
    t.checked_add_signed(TimeDelta::microseconds(micros as i64))
        .unwrap_or(saturated)
}

/// Linear interpolation between `a` and `b`
#[inline(always)]
pub fn lerp(a: f64, b: f64, fraction: f64) -> f64 {
    a + (b - a) * fraction
}

/// Check if a latitude/longitude pair is finite and within WGS84 bounds
#[inline(always)]
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-MAX_LATITUDE..=MAX_LATITUDE).contains(&lat)
        && (-MAX_LONGITUDE..=MAX_LONGITUDE).contains(&lon)
}

/// Build a `geo` point from latitude/longitude degrees (x = lon, y = lat)
#[inline(always)]
pub fn to_point(lat: f64, lon: f64) -> Point<f64> {
    Point::new(lon, lat)
}

/// Calculate the Haversine distance between two WGS84 points in meters
#[inline]
pub fn haversine_distance(p1: Point<f64>, p2: Point<f64>) -> f64 {
    let lat1 = p1.y().to_radians();
    let lat2 = p2.y().to_radians();
    let delta_lat = (p2.y() - p1.y()).to_radians();
    let delta_lon = (p2.x() - p1.x()).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}
