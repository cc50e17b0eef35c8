//! Great-circle geometry for nearby-complaint lookups.
//!
//! Everything here is pure. Range validation happens once, when a
//! [`Coordinate`] is built; the distance functions accept any pair of
//! validated coordinates and never fail.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const METERS_PER_DEGREE_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

/// Validated latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate", into = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize, Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    #[must_use]
    pub const fn latitude(self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub const fn longitude(self) -> f64 {
        self.longitude
    }

    #[must_use]
    pub fn distance_to(self, other: Self) -> f64 {
        distance_meters(self, other)
    }

    /// Point `north_m` meters north and `east_m` meters east of `self`,
    /// using a local flat-earth approximation. Only meaningful for short
    /// offsets; clamps to the valid coordinate range.
    #[must_use]
    pub fn offset_by_meters(self, north_m: f64, east_m: f64) -> Self {
        let latitude = (self.latitude + north_m / METERS_PER_DEGREE_LAT).clamp(-90.0, 90.0);
        let cos_lat = self.latitude.to_radians().cos().max(1e-12);
        let mut longitude = self.longitude + east_m / (METERS_PER_DEGREE_LAT * cos_lat);
        if longitude > 180.0 {
            longitude -= 360.0;
        } else if longitude < -180.0 {
            longitude += 360.0;
        }
        Self {
            latitude,
            longitude: longitude.clamp(-180.0, 180.0),
        }
    }
}

impl TryFrom<(f64, f64)> for Coordinate {
    type Error = CoordinateError;

    fn try_from((latitude, longitude): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(latitude, longitude)
    }
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.latitude, raw.longitude)
    }
}

impl From<Coordinate> for RawCoordinate {
    fn from(c: Coordinate) -> Self {
        Self {
            latitude: c.latitude,
            longitude: c.longitude,
        }
    }
}

/// Haversine distance in meters. Symmetric, and exactly zero for identical
/// coordinates.
#[must_use]
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);

    // Rounding can push h a hair outside [0, 1] near antipodes.
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[must_use]
pub fn is_within_radius(center: Coordinate, point: Coordinate, radius_m: f64) -> bool {
    distance_meters(center, point) <= radius_m
}

/// Short distance label shown next to a candidate, e.g. `"120m away"`.
#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }
    if meters < 1000.0 {
        format!("{:.0}m away", meters.round())
    } else {
        format!("{:.1}km away", meters / 1000.0)
    }
}

/// Lat/lon rectangle enclosing a circle, used to pre-filter a store fetch
/// before the exact haversine check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    /// When set, longitude cannot be expressed as a single interval (the
    /// circle spans the antimeridian or a pole) and must not be filtered.
    pub unbounded_lon: bool,
}

impl BoundingBox {
    #[must_use]
    pub fn around(center: Coordinate, radius_m: f64) -> Self {
        // Slight padding so points exactly on the circle survive rounding.
        let radius_m = radius_m.max(0.0) * 1.000_001;
        let delta_lat = radius_m / METERS_PER_DEGREE_LAT;
        let min_lat = center.latitude - delta_lat;
        let max_lat = center.latitude + delta_lat;

        if min_lat <= -90.0 || max_lat >= 90.0 {
            return Self {
                min_lat: min_lat.max(-90.0),
                max_lat: max_lat.min(90.0),
                min_lon: -180.0,
                max_lon: 180.0,
                unbounded_lon: true,
            };
        }

        // Widest longitude reached by the circle, on a sphere.
        let sin_ratio =
            (radius_m / EARTH_RADIUS_M).sin() / center.latitude.to_radians().cos();
        if !(0.0..1.0).contains(&sin_ratio) {
            return Self {
                min_lat,
                max_lat,
                min_lon: -180.0,
                max_lon: 180.0,
                unbounded_lon: true,
            };
        }
        let delta_lon = sin_ratio.asin().to_degrees() * 1.000_001;
        let min_lon = center.longitude - delta_lon;
        let max_lon = center.longitude + delta_lon;
        let unbounded_lon = min_lon < -180.0 || max_lon > 180.0;

        Self {
            min_lat,
            max_lat,
            min_lon: if unbounded_lon { -180.0 } else { min_lon },
            max_lon: if unbounded_lon { 180.0 } else { max_lon },
            unbounded_lon,
        }
    }

    #[must_use]
    pub fn contains(&self, point: Coordinate) -> bool {
        let lat_ok = (self.min_lat..=self.max_lat).contains(&point.latitude);
        lat_ok && (self.unbounded_lon || (self.min_lon..=self.max_lon).contains(&point.longitude))
    }
}
