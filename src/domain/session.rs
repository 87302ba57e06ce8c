//! Dwell session records for regions and beacon regions

use crate::domain::types::{Beacon, Location, RegionId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Upper bound on trail points handed to analytics for a closed region session
pub const MAX_SESSION_LOCATIONS: usize = 100;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Presence inside a single region, with its location trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSession {
    pub id: String,
    pub region_id: RegionId,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub locations: Vec<Location>,
}

impl RegionSession {
    pub fn new(region_id: RegionId, start: DateTime<Utc>) -> Self {
        Self {
            id: new_session_id(),
            region_id,
            start,
            end: None,
            locations: Vec::with_capacity(16),
        }
    }

    /// Close the session, down-sampling the trail to `max_locations` points
    pub fn close(&mut self, end: DateTime<Utc>, max_locations: usize) {
        self.end = Some(end);
        if self.locations.len() > max_locations {
            self.locations = downsample(&self.locations, max_locations);
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Presence inside a beacon region, with ranging snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeaconSession {
    pub id: String,
    pub region_id: RegionId,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub beacons: Vec<BeaconSample>,
}

impl BeaconSession {
    pub fn new(region_id: RegionId, start: DateTime<Utc>) -> Self {
        Self { id: new_session_id(), region_id, start, end: None, beacons: Vec::new() }
    }

    pub fn close(&mut self, end: DateTime<Utc>) {
        self.end = Some(end);
    }
}

/// One beacon observed during a ranging pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeaconSample {
    pub major: u16,
    pub minor: Option<u16>,
    pub proximity: crate::domain::types::Proximity,
    pub timestamp: DateTime<Utc>,
}

impl BeaconSample {
    pub fn from_beacon(beacon: &Beacon, timestamp: DateTime<Utc>) -> Self {
        Self { major: beacon.major, minor: beacon.minor, proximity: beacon.proximity, timestamp }
    }
}

/// Evenly spaced subsample of exactly `target` items, keeping first and last
///
/// Index `i` of the output maps to `i * (n - 1) / (target - 1)` of the input.
/// Returns the input unchanged when it already fits.
pub fn downsample<T: Clone>(items: &[T], target: usize) -> Vec<T> {
    let n = items.len();
    if n <= target {
        return items.to_vec();
    }
    match target {
        0 => Vec::new(),
        1 => vec![items[0].clone()],
        _ => (0..target).map(|i| items[i * (n - 1) / (target - 1)].clone()).collect(),
    }
}
