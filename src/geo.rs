//! Geographic value types: station coordinates and query bounding boxes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A (latitude, longitude) pair identifying a monitoring station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// Rectangular query area defined by two opposite corners.
///
/// The corners are kept in the order they were given; the provider accepts
/// either diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    first: Coordinate,
    second: Coordinate,
}

impl BoundingBox {
    /// Create a bounding box from two corners given as `(lat1, lon1)` and `(lat2, lon2)`.
    pub const fn new(latitude_1: f64, longitude_1: f64, latitude_2: f64, longitude_2: f64) -> Self {
        Self {
            first: Coordinate::new(latitude_1, longitude_1),
            second: Coordinate::new(latitude_2, longitude_2),
        }
    }

    pub fn first(&self) -> Coordinate {
        self.first
    }

    pub fn second(&self) -> Coordinate {
        self.second
    }

    /// Render the box in the `lat1,lon1,lat2,lon2` form used by the bounds query.
    pub fn to_latlng(&self) -> String {
        format!("{},{}", self.first, self.second)
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) - ({})", self.first, self.second)
    }
}

/// Error returned when a `lat1,lon1,lat2,lon2` string cannot be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseBoundsError {
    pub message: String,
}

impl std::fmt::Display for ParseBoundsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid bounding box: {}", self.message)
    }
}

impl std::error::Error for ParseBoundsError {}

impl FromStr for BoundingBox {
    type Err = ParseBoundsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(ParseBoundsError {
                message: format!("expected 4 comma-separated values, got {}", parts.len()),
            });
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| ParseBoundsError {
                message: format!("'{}' is not a valid number", part),
            })?;
        }

        for latitude in [values[0], values[2]] {
            if !(-90.0..=90.0).contains(&latitude) {
                return Err(ParseBoundsError {
                    message: format!("latitude {} is outside [-90, 90]", latitude),
                });
            }
        }
        for longitude in [values[1], values[3]] {
            if !(-180.0..=180.0).contains(&longitude) {
                return Err(ParseBoundsError {
                    message: format!("longitude {} is outside [-180, 180]", longitude),
                });
            }
        }

        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}
