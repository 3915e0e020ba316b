//! Heading from two successive confirmed positions.

use crate::geo_point::GeoPoint;
use geo::HaversineBearing;

/// Normalizes any finite angle into `[0, 360)`.
///
/// `rem_euclid` can round a tiny negative input up to exactly 360.0, which
/// is folded back to 0.
#[inline]
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 || !wrapped.is_finite() {
        0.0
    } else {
        wrapped
    }
}

/// Compass heading in degrees `[0, 360)` from `previous` to `next`.
///
/// Returns `fallback` (normalized) when there is no previous fix or the
/// vehicle has not moved.
///
/// Otherwise this is the initial great-circle bearing: with latitudes and
/// the longitude delta in radians,
/// `atan2(sin Δλ · cos φ2, cos φ1 · sin φ2 − sin φ1 · cos φ2 · cos Δλ)`.
pub fn bearing(previous: Option<GeoPoint>, next: GeoPoint, fallback: f64) -> f64 {
    let prev = match previous {
        Some(p) if p != next => p,
        _ => return normalize_degrees(fallback),
    };

    let raw = prev.to_geo().haversine_bearing(next.to_geo());
    normalize_degrees(raw)
}
