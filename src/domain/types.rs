//! Shared value types for regions, beacons and locations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

/// Valid latitude range in degrees
pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;
/// Valid longitude range in degrees
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Errors for malformed sensor or server input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("invalid latitude {0}: expected -90..=90")]
    InvalidLatitude(f64),
    #[error("invalid longitude {0}: expected -180..=180")]
    InvalidLongitude(f64),
    #[error("invalid beacon distance {0}: expected a finite, non-negative value")]
    InvalidDistance(f64),
    #[error("polygon region {0} has fewer than 3 vertices")]
    MalformedPolygon(RegionId),
}

/// Newtype wrapper for server-assigned region identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub String);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Newtype wrapper for beacon identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeaconId(pub String);

impl std::fmt::Display for BeaconId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BeaconId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A plain latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Reject non-finite or out-of-range coordinates
    pub fn validate(&self) -> Result<(), GeoError> {
        if !self.lat.is_finite() || !(MIN_LAT..=MAX_LAT).contains(&self.lat) {
            return Err(GeoError::InvalidLatitude(self.lat));
        }
        if !self.lon.is_finite() || !(MIN_LON..=MAX_LON).contains(&self.lon) {
            return Err(GeoError::InvalidLongitude(self.lon));
        }
        Ok(())
    }
}

/// A timestamped device location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

impl Location {
    pub fn new(lat: f64, lon: f64, timestamp: DateTime<Utc>) -> Self {
        Self { lat, lon, timestamp }
    }

    #[inline]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }

    pub fn validate(&self) -> Result<(), GeoError> {
        self.coordinate().validate()
    }
}

/// Region geometry as delivered by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegionGeometry {
    Circle { center: Coordinate, radius_m: f64 },
    Polygon { vertices: SmallVec<[Coordinate; 8]> },
}

/// A monitored geographic area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    /// Beacon major shared by every beacon placed in this region
    #[serde(default)]
    pub major: Option<u16>,
    pub geometry: RegionGeometry,
    /// Monitoring radius reported by the server (metres)
    #[serde(default)]
    pub distance: f64,
}

impl Region {
    #[inline]
    pub fn is_polygon(&self) -> bool {
        matches!(self.geometry, RegionGeometry::Polygon { .. })
    }

    /// Center and radius for regions the OS fence primitive can express
    pub fn circle(&self) -> Option<(Coordinate, f64)> {
        match self.geometry {
            RegionGeometry::Circle { center, radius_m } => Some((center, radius_m)),
            RegionGeometry::Polygon { .. } => None,
        }
    }

    /// Synthesized "main region beacon" (no minor) used for coarse beacon-region entry
    pub fn main_beacon(&self) -> Option<Beacon> {
        let major = self.major?;
        Some(Beacon {
            id: BeaconId(self.id.0.clone()),
            name: self.name.clone(),
            major,
            minor: None,
            proximity: Proximity::Unknown,
        })
    }
}

/// Coarse beacon distance tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    Immediate,
    Near,
    Far,
    #[default]
    Unknown,
}

impl Proximity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::Immediate => "immediate",
            Proximity::Near => "near",
            Proximity::Far => "far",
            Proximity::Unknown => "unknown",
        }
    }
}

/// A short-range proximity beacon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub id: BeaconId,
    pub name: String,
    pub major: u16,
    /// Absent for the main region beacon
    #[serde(default)]
    pub minor: Option<u16>,
    #[serde(default)]
    pub proximity: Proximity,
}

impl Beacon {
    #[inline]
    pub fn is_main_region_beacon(&self) -> bool {
        self.minor.is_none()
    }
}

/// Identity of a beacon as reported by a monitoring callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconSignal {
    pub unique_id: BeaconId,
    pub major: u16,
    #[serde(default)]
    pub minor: Option<u16>,
}

/// A single ranging measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingReading {
    pub major: u16,
    pub minor: u16,
    /// Estimated distance in metres; `None` when the radio could not estimate it
    #[serde(default)]
    pub distance_m: Option<f64>,
}

/// Direction of a transition reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Enter,
    Exit,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Enter => "enter",
            Transition::Exit => "exit",
        }
    }
}

/// Device capabilities relevant to monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub precise_location: bool,
    pub background_location: bool,
    pub bluetooth: bool,
}

impl Capabilities {
    /// All capabilities granted
    pub fn full() -> Self {
        Self { precise_location: true, background_location: true, bluetooth: true }
    }

    #[inline]
    pub fn can_monitor_regions(&self) -> bool {
        self.precise_location && self.background_location
    }

    #[inline]
    pub fn can_monitor_beacons(&self) -> bool {
        self.can_monitor_regions() && self.bluetooth
    }
}
