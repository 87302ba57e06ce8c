//! Collaborator interfaces consumed by the engine
//!
//! The engine never talks to the OS or the network directly. Whoever composes
//! the engine supplies implementations of these traits:
//! - `RegionService` - backend fetches and event/session posts
//! - `GeofencePlatform` - OS circular fences, last location, capabilities
//! - `BeaconMonitor` - optional beacon ranging primitive

use crate::domain::session::{BeaconSession, RegionSession};
use crate::domain::types::{Beacon, BeaconId, Capabilities, Location, Region, RegionId};
use async_trait::async_trait;
use serde::Serialize;

/// Kind of trigger event posted to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    RegionEnter,
    RegionExit,
    BeaconEnter,
    BeaconExit,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::RegionEnter => "region_enter",
            TriggerKind::RegionExit => "region_exit",
            TriggerKind::BeaconEnter => "beacon_enter",
            TriggerKind::BeaconExit => "beacon_exit",
        }
    }
}

/// A region or beacon trigger for the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub region_id: Option<RegionId>,
    pub beacon_id: Option<BeaconId>,
}

impl TriggerEvent {
    pub fn region(kind: TriggerKind, region_id: &RegionId) -> Self {
        Self { kind, region_id: Some(region_id.clone()), beacon_id: None }
    }

    pub fn beacon(kind: TriggerKind, beacon_id: &BeaconId) -> Self {
        Self { kind, region_id: None, beacon_id: Some(beacon_id.clone()) }
    }
}

/// Backend access for regions, beacons and analytics
#[async_trait]
pub trait RegionService: Send + Sync {
    /// Nearest regions to `location`, ordered by distance, at most `limit`
    async fn fetch_nearest_regions(&self, location: &Location, limit: usize) -> anyhow::Result<Vec<Region>>;

    /// Beacons placed inside a region, at most `limit`
    async fn fetch_beacons(&self, region_id: &RegionId, limit: usize) -> anyhow::Result<Vec<Beacon>>;

    async fn post_event(&self, event: &TriggerEvent) -> anyhow::Result<()>;

    async fn post_region_session(&self, session: &RegionSession) -> anyhow::Result<()>;

    async fn post_beacon_session(&self, session: &BeaconSession) -> anyhow::Result<()>;
}

/// OS geofencing primitive (circular regions only)
#[async_trait]
pub trait GeofencePlatform: Send + Sync {
    async fn register_fence(&self, region: &Region) -> anyhow::Result<()>;

    async fn unregister_fences(&self, region_ids: &[RegionId]) -> anyhow::Result<()>;

    fn last_known_location(&self) -> Option<Location>;

    fn capabilities(&self) -> Capabilities;
}

/// OS/BLE beacon monitoring and ranging primitive
#[async_trait]
pub trait BeaconMonitor: Send + Sync {
    async fn start_ranging(&self, region: &Region, beacons: &[Beacon]) -> anyhow::Result<()>;

    async fn stop_ranging(&self, region: &Region) -> anyhow::Result<()>;
}
