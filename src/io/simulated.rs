//! In-process collaborators for the replay driver and tests
//!
//! `SimulatedBackend` answers nearest-region queries from a fixed catalogue;
//! `SimulatedPlatform` and `SimulatedBeaconMonitor` record what the engine
//! asked the OS to do. All of them can be told to fail.

use crate::domain::geometry::haversine_m;
use crate::domain::session::{BeaconSession, RegionSession};
use crate::domain::types::{Beacon, Capabilities, Coordinate, Location, Region, RegionGeometry, RegionId};
use crate::io::platform::{BeaconMonitor, GeofencePlatform, RegionService, TriggerEvent};
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Representative point used to order regions by distance
fn anchor(region: &Region) -> Coordinate {
    if let Some((center, _)) = region.circle() {
        return center;
    }
    let vertices = match &region.geometry {
        RegionGeometry::Polygon { vertices } => vertices.as_slice(),
        RegionGeometry::Circle { .. } => &[],
    };
    let n = vertices.len().max(1) as f64;
    let (lat, lon) = vertices.iter().fold((0.0, 0.0), |(a, b), v| (a + v.lat, b + v.lon));
    Coordinate::new(lat / n, lon / n)
}

pub struct SimulatedBackend {
    catalogue: Mutex<Vec<Region>>,
    beacons: Mutex<FxHashMap<RegionId, Vec<Beacon>>>,
    events: Mutex<Vec<TriggerEvent>>,
    region_sessions: Mutex<Vec<RegionSession>>,
    beacon_sessions: Mutex<Vec<BeaconSession>>,
    fail_fetches: AtomicBool,
    fail_posts: AtomicBool,
    fetch_count: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new(catalogue: Vec<Region>) -> Self {
        Self {
            catalogue: Mutex::new(catalogue),
            beacons: Mutex::new(FxHashMap::default()),
            events: Mutex::new(Vec::new()),
            region_sessions: Mutex::new(Vec::new()),
            beacon_sessions: Mutex::new(Vec::new()),
            fail_fetches: AtomicBool::new(false),
            fail_posts: AtomicBool::new(false),
            fetch_count: AtomicUsize::new(0),
        }
    }

    pub fn set_catalogue(&self, catalogue: Vec<Region>) {
        *self.catalogue.lock() = catalogue;
    }

    pub fn set_beacons(&self, region_id: &RegionId, beacons: Vec<Beacon>) {
        self.beacons.lock().insert(region_id.clone(), beacons);
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    pub fn posted_events(&self) -> Vec<TriggerEvent> {
        self.events.lock().clone()
    }

    pub fn posted_region_sessions(&self) -> Vec<RegionSession> {
        self.region_sessions.lock().clone()
    }

    pub fn posted_beacon_sessions(&self) -> Vec<BeaconSession> {
        self.beacon_sessions.lock().clone()
    }
}

#[async_trait]
impl RegionService for SimulatedBackend {
    async fn fetch_nearest_regions(&self, location: &Location, limit: usize) -> anyhow::Result<Vec<Region>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        if self.fail_fetches.load(Ordering::Relaxed) {
            bail!("simulated nearest-regions failure");
        }
        let here = location.coordinate();
        let mut regions = self.catalogue.lock().clone();
        regions.sort_by(|a, b| {
            haversine_m(here, anchor(a)).total_cmp(&haversine_m(here, anchor(b)))
        });
        regions.truncate(limit);
        debug!(count = %regions.len(), limit = %limit, "simulated_nearest_regions");
        Ok(regions)
    }

    async fn fetch_beacons(&self, region_id: &RegionId, limit: usize) -> anyhow::Result<Vec<Beacon>> {
        if self.fail_fetches.load(Ordering::Relaxed) {
            bail!("simulated beacons failure for region {region_id}");
        }
        let mut beacons = self.beacons.lock().get(region_id).cloned().unwrap_or_default();
        beacons.truncate(limit);
        Ok(beacons)
    }

    async fn post_event(&self, event: &TriggerEvent) -> anyhow::Result<()> {
        if self.fail_posts.load(Ordering::Relaxed) {
            bail!("simulated post failure");
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn post_region_session(&self, session: &RegionSession) -> anyhow::Result<()> {
        if self.fail_posts.load(Ordering::Relaxed) {
            bail!("simulated post failure");
        }
        self.region_sessions.lock().push(session.clone());
        Ok(())
    }

    async fn post_beacon_session(&self, session: &BeaconSession) -> anyhow::Result<()> {
        if self.fail_posts.load(Ordering::Relaxed) {
            bail!("simulated post failure");
        }
        self.beacon_sessions.lock().push(session.clone());
        Ok(())
    }
}

pub struct SimulatedPlatform {
    fences: Mutex<Vec<RegionId>>,
    last_location: Mutex<Option<Location>>,
    capabilities: Mutex<Capabilities>,
    fail_register: AtomicBool,
}

impl SimulatedPlatform {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            fences: Mutex::new(Vec::new()),
            last_location: Mutex::new(None),
            capabilities: Mutex::new(capabilities),
            fail_register: AtomicBool::new(false),
        }
    }

    pub fn set_last_location(&self, location: Option<Location>) {
        *self.last_location.lock() = location;
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock() = capabilities;
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::Relaxed);
    }

    /// Registered fence ids, sorted
    pub fn fences(&self) -> Vec<RegionId> {
        let mut fences = self.fences.lock().clone();
        fences.sort();
        fences
    }
}

#[async_trait]
impl GeofencePlatform for SimulatedPlatform {
    async fn register_fence(&self, region: &Region) -> anyhow::Result<()> {
        if self.fail_register.load(Ordering::Relaxed) {
            bail!("simulated fence registration failure for {}", region.id);
        }
        let mut fences = self.fences.lock();
        if !fences.contains(&region.id) {
            fences.push(region.id.clone());
        }
        Ok(())
    }

    async fn unregister_fences(&self, region_ids: &[RegionId]) -> anyhow::Result<()> {
        self.fences.lock().retain(|id| !region_ids.contains(id));
        Ok(())
    }

    fn last_known_location(&self) -> Option<Location> {
        *self.last_location.lock()
    }

    fn capabilities(&self) -> Capabilities {
        *self.capabilities.lock()
    }
}

#[derive(Default)]
pub struct SimulatedBeaconMonitor {
    ranging: Mutex<Vec<RegionId>>,
    starts: AtomicUsize,
}

impl SimulatedBeaconMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranging(&self) -> Vec<RegionId> {
        let mut ranging = self.ranging.lock().clone();
        ranging.sort();
        ranging
    }

    /// Number of `start_ranging` calls seen
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BeaconMonitor for SimulatedBeaconMonitor {
    async fn start_ranging(&self, region: &Region, beacons: &[Beacon]) -> anyhow::Result<()> {
        debug!(region_id = %region.id, beacons = %beacons.len(), "simulated_start_ranging");
        self.starts.fetch_add(1, Ordering::Relaxed);
        let mut ranging = self.ranging.lock();
        if !ranging.contains(&region.id) {
            ranging.push(region.id.clone());
        }
        Ok(())
    }

    async fn stop_ranging(&self, region: &Region) -> anyhow::Result<()> {
        self.ranging.lock().retain(|id| id != &region.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn circle(id: &str, lat: f64, lon: f64) -> Region {
        Region {
            id: RegionId::from(id),
            name: id.to_string(),
            major: None,
            geometry: RegionGeometry::Circle { center: Coordinate::new(lat, lon), radius_m: 50.0 },
            distance: 50.0,
        }
    }

    #[tokio::test]
    async fn test_nearest_regions_ordered_and_limited() {
        let backend = SimulatedBackend::new(vec![
            circle("far", 1.0, 1.0),
            circle("near", 0.001, 0.0),
            circle("mid", 0.1, 0.0),
        ]);
        let here = Location::new(0.0, 0.0, Utc::now());

        let regions = backend.fetch_nearest_regions(&here, 2).await.unwrap();
        let ids: Vec<&str> = regions.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_polygons_ordered_by_centroid() {
        let square = |id: &str, lat: f64| Region {
            id: RegionId::from(id),
            name: id.to_string(),
            major: None,
            geometry: RegionGeometry::Polygon {
                vertices: vec![
                    Coordinate::new(lat, 0.0),
                    Coordinate::new(lat, 0.01),
                    Coordinate::new(lat + 0.01, 0.01),
                    Coordinate::new(lat + 0.01, 0.0),
                ].into(),
            },
            distance: 0.0,
        };
        let backend = SimulatedBackend::new(vec![square("far", 0.5), circle("mid", 0.1, 0.0), square("near", 0.0)]);
        let here = Location::new(0.0, 0.0, Utc::now());

        let regions = backend.fetch_nearest_regions(&here, 3).await.unwrap();
        let ids: Vec<&str> = regions.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[tokio::test]
    async fn test_platform_fences() {
        let platform = SimulatedPlatform::new(Capabilities::full());
        platform.register_fence(&circle("a", 0.0, 0.0)).await.unwrap();
        platform.register_fence(&circle("a", 0.0, 0.0)).await.unwrap();
        platform.register_fence(&circle("b", 0.0, 0.0)).await.unwrap();
        platform.unregister_fences(&[RegionId::from("a")]).await.unwrap();
        assert_eq!(platform.fences(), vec![RegionId::from("b")]);
    }
}
