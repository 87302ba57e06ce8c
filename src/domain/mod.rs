//! Domain models - regions, beacons, locations and dwell sessions
//!
//! This module contains the canonical value types used throughout the engine:
//! - `types` - `Region`, `Beacon`, `Location`, identifiers and capability flags
//! - `geometry` - circle and polygon containment
//! - `session` - `RegionSession` / `BeaconSession` and trail down-sampling
//! - `state` - the persisted `MonitoredState`

pub mod geometry;
pub mod session;
pub mod state;
pub mod types;

pub use session::{BeaconSession, RegionSession, MAX_SESSION_LOCATIONS};
pub use state::MonitoredState;
pub use types::{
    Beacon, BeaconId, BeaconSignal, Capabilities, Coordinate, GeoError, Location, Proximity,
    RangingReading, Region, RegionGeometry, RegionId, Transition,
};
