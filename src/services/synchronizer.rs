//! Differential reconciliation against the server's nearest-regions list
//!
//! Planning is pure: `plan_sync` compares the monitored set with a fresh list
//! and returns what to stop and what to start. The engine applies the plan
//! on its worker, stale regions first, so the number of registered fences
//! never exceeds the limit while the plan is applied.
//!
//! Network fetches run on spawned tasks and report back through a
//! `FetchOutcome` channel tagged with the engine generation that issued them.

use crate::domain::state::MonitoredState;
use crate::domain::types::{Beacon, GeoError, Location, Region, RegionGeometry, RegionId};
use crate::io::platform::RegionService;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Result of comparing the monitored set with a fresh server list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncPlan {
    /// Monitored regions absent from the fresh list, sorted by id
    pub stale: Vec<RegionId>,
    /// Fresh regions not yet monitored, in server order
    pub fresh: Vec<Region>,
    /// Regions present on both sides
    pub retained: usize,
    /// Server regions dropped as malformed
    pub rejected: usize,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.stale.is_empty() && self.fresh.is_empty()
    }
}

/// Check that a server region can be monitored
pub fn validate_region(region: &Region) -> Result<(), GeoError> {
    match &region.geometry {
        RegionGeometry::Circle { center, radius_m } => {
            center.validate()?;
            if !radius_m.is_finite() || *radius_m <= 0.0 {
                return Err(GeoError::InvalidDistance(*radius_m));
            }
            Ok(())
        }
        RegionGeometry::Polygon { vertices } => {
            if vertices.len() < 3 {
                return Err(GeoError::MalformedPolygon(region.id.clone()));
            }
            vertices.iter().try_for_each(|v| v.validate())
        }
    }
}

/// Compute the stale/fresh delta
///
/// The fresh list is validated, de-duplicated by id (first occurrence wins)
/// and truncated to `limit` before comparison.
pub fn plan_sync(state: &MonitoredState, fresh_list: &[Region], limit: usize) -> SyncPlan {
    let mut seen: FxHashSet<&RegionId> = FxHashSet::default();
    let mut accepted: Vec<&Region> = Vec::with_capacity(fresh_list.len().min(limit));
    let mut rejected = 0;

    for region in fresh_list {
        if accepted.len() >= limit {
            break;
        }
        if let Err(e) = validate_region(region) {
            warn!(region_id = %region.id, error = %e, "sync_region_rejected");
            rejected += 1;
            continue;
        }
        if seen.insert(&region.id) {
            accepted.push(region);
        }
    }

    let stale: Vec<RegionId> =
        state.region_ids().into_iter().filter(|id| !seen.contains(id)).collect();
    let retained = accepted.iter().filter(|r| state.contains_region(&r.id)).count();
    let fresh: Vec<Region> =
        accepted.into_iter().filter(|r| !state.contains_region(&r.id)).cloned().collect();

    SyncPlan { stale, fresh, retained, rejected }
}

/// Completion of a network fetch issued by the engine
#[derive(Debug)]
pub enum FetchOutcome {
    Regions {
        generation: u64,
        location: Location,
        started: Instant,
        result: anyhow::Result<Vec<Region>>,
    },
    Beacons {
        generation: u64,
        region_id: RegionId,
        result: anyhow::Result<Vec<Beacon>>,
    },
}

/// Fetch the nearest regions without blocking the engine worker
pub fn spawn_region_fetch(
    service: Arc<dyn RegionService>,
    tx: mpsc::Sender<FetchOutcome>,
    generation: u64,
    location: Location,
    limit: usize,
) {
    tokio::spawn(async move {
        let started = Instant::now();
        let result = service.fetch_nearest_regions(&location, limit).await;
        debug!(generation = %generation, ok = %result.is_ok(), "region_fetch_done");
        // The engine may already be gone
        let _ = tx.send(FetchOutcome::Regions { generation, location, started, result }).await;
    });
}

/// Fetch a region's beacons without blocking the engine worker
pub fn spawn_beacon_fetch(
    service: Arc<dyn RegionService>,
    tx: mpsc::Sender<FetchOutcome>,
    generation: u64,
    region_id: RegionId,
    limit: usize,
) {
    tokio::spawn(async move {
        let result = service.fetch_beacons(&region_id, limit).await;
        debug!(region_id = %region_id, ok = %result.is_ok(), "beacon_fetch_done");
        let _ = tx.send(FetchOutcome::Beacons { generation, region_id, result }).await;
    });
}
