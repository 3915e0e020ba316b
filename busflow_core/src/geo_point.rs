//! Plain WGS84 coordinate used throughout the tracker.

use serde::{Deserialize, Serialize};

/// A geographic coordinate in degrees.
///
/// The live feed sends `[longitude, latitude]`; the swap into this struct
/// happens once, in the validator, and never again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Builds a point from the feed's `[lng, lat]` wire order.
    pub fn from_lng_lat(lng: f64, lat: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite (not NaN, not infinite).
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Linear interpolation in lat/lng space, each axis independently.
    #[inline]
    pub fn lerp(&self, target: &GeoPoint, fraction: f64) -> GeoPoint {
        GeoPoint {
            lat: self.lat + (target.lat - self.lat) * fraction,
            lng: self.lng + (target.lng - self.lng) * fraction,
        }
    }

    /// Converts to a `geo` point (x = longitude, y = latitude).
    pub fn to_geo(&self) -> geo::Point<f64> {
        geo::Point::new(self.lng, self.lat)
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(p: GeoPoint) -> Self {
        p.to_geo()
    }
}
