//! Nearest-region sync and beacon fetch handling for `GeoEngine`
//!
//! At most one region fetch is in flight. Locations arriving meanwhile are
//! coalesced into `pending_sync` (last one wins) and re-evaluated when the
//! in-flight sync completes. A completed fetch is applied in one pass on the
//! engine worker, so its store mutations are never interleaved with other
//! commands.

use super::GeoEngine;
use crate::domain::geometry::region_contains;
use crate::domain::types::{Beacon, Location, Region, RegionId};
use crate::services::policy::should_sync;
use crate::services::synchronizer::{plan_sync, spawn_beacon_fetch, spawn_region_fetch};
use std::time::Instant;
use tracing::{debug, info, warn};

impl GeoEngine {
    /// Start a sync for `location` when the trigger policy asks for one
    pub(crate) fn maybe_sync(&mut self, location: Location) {
        let capabilities = self.platform.capabilities();
        let wanted = should_sync(
            self.last_sync_origin.as_ref(),
            &location,
            self.config.location_update_threshold_m(),
            capabilities,
            self.state.region_count(),
        );
        if !wanted {
            return;
        }

        if !capabilities.can_monitor_regions() {
            self.metrics.record_sync_skipped();
            debug!(
                precise = %capabilities.precise_location,
                background = %capabilities.background_location,
                "sync_gated"
            );
            return;
        }

        if self.sync_in_flight {
            self.pending_sync = Some(location);
            self.metrics.record_sync_coalesced();
            debug!(lat = %location.lat, lon = %location.lon, "sync_coalesced");
            return;
        }

        self.start_sync(location);
    }

    fn start_sync(&mut self, location: Location) {
        self.sync_in_flight = true;
        self.outstanding_fetches += 1;
        debug!(
            generation = %self.generation,
            lat = %location.lat,
            lon = %location.lon,
            limit = %self.config.regions_limit(),
            "sync_started"
        );
        spawn_region_fetch(
            self.service.clone(),
            self.fetch_tx.clone(),
            self.generation,
            location,
            self.config.regions_limit(),
        );
    }

    pub(crate) async fn complete_sync(
        &mut self,
        generation: u64,
        location: Location,
        started: Instant,
        result: anyhow::Result<Vec<Region>>,
    ) {
        if generation != self.generation {
            self.metrics.record_sync_discarded();
            debug!(generation = %generation, current = %self.generation, "sync_result_discarded");
            return;
        }
        self.sync_in_flight = false;

        match result {
            Ok(regions) => {
                self.apply_sync(&regions).await;
                self.last_sync_origin = Some(location);
                self.metrics.record_sync_completed(started.elapsed().as_millis() as u64);
            }
            Err(e) => {
                // Monitored set left untouched; the next location retries
                self.metrics.record_sync_failed();
                warn!(lat = %location.lat, lon = %location.lon, error = %e, "sync_fetch_failed");
            }
        }

        if let Some(pending) = self.pending_sync.take() {
            self.maybe_sync(pending);
        }
    }

    /// Reconcile the monitored set with a fresh nearest-regions list
    ///
    /// Each stale region has its fence stopped, its exit sequence run and is
    /// then removed, all before any fresh region is registered.
    pub(crate) async fn apply_sync(&mut self, regions: &[Region]) {
        let plan = plan_sync(&self.state, regions, self.config.regions_limit());
        if plan.is_noop() {
            debug!(retained = %plan.retained, "sync_noop");
            return;
        }
        let now = self.clock.now();

        for id in &plan.stale {
            let is_fence = self.state.region(id).is_some_and(|r| !r.is_polygon());
            if is_fence {
                if let Err(e) = self.platform.unregister_fences(std::slice::from_ref(id)).await {
                    warn!(region_id = %id, error = %e, "fence_unregister_failed");
                }
            }
            self.exit_region(id, now).await;
            self.state.remove_region(id);
            self.dirty = true;
            debug!(region_id = %id, "region_unmonitored");
        }

        let location = self.current_location();
        let mut added = 0;
        for region in plan.fresh {
            if !region.is_polygon() {
                if let Err(e) = self.platform.register_fence(&region).await {
                    // Left out of the store so the next sync retries it
                    warn!(region_id = %region.id, error = %e, "fence_register_failed");
                    continue;
                }
            }

            let check = region.is_polygon() || self.config.initial_trigger();
            let inside = check && location.is_some_and(|l| region_contains(&region, l.coordinate()));
            let id = region.id.clone();
            self.state.insert_region(region);
            self.dirty = true;
            added += 1;
            debug!(region_id = %id, inside = %inside, "region_monitored");

            if inside {
                debug!(region_id = %id, "initial_trigger");
                self.enter_region(&id, now);
            }
        }

        info!(
            stale = %plan.stale.len(),
            fresh = %added,
            retained = %plan.retained,
            monitored = %self.state.region_count(),
            "regions_synced"
        );
    }

    /// Fetch and range the beacons of an entered region, when supported
    pub(crate) fn request_beacons(&mut self, region: &Region) {
        if !self.config.beacons_enabled() || self.beacon_monitor.is_none() {
            debug!(region_id = %region.id, "beacon_monitoring_unavailable");
            return;
        }
        if !self.platform.capabilities().can_monitor_beacons() {
            debug!(region_id = %region.id, "beacon_monitoring_gated");
            return;
        }

        self.outstanding_fetches += 1;
        spawn_beacon_fetch(
            self.service.clone(),
            self.fetch_tx.clone(),
            self.generation,
            region.id.clone(),
            self.config.max_beacons_per_region(),
        );
    }

    pub(crate) async fn complete_beacon_fetch(
        &mut self,
        generation: u64,
        region_id: &RegionId,
        result: anyhow::Result<Vec<Beacon>>,
    ) {
        if generation != self.generation {
            debug!(region_id = %region_id, "beacon_fetch_discarded");
            return;
        }
        // The region may have been exited or removed while fetching
        if !self.state.is_region_entered(region_id) {
            debug!(region_id = %region_id, "beacon_fetch_region_not_entered");
            return;
        }
        let Some(region) = self.state.region(region_id).cloned() else {
            return;
        };
        let (Some(main), Some(monitor)) = (region.main_beacon(), self.beacon_monitor.clone()) else {
            return;
        };
        // An exit and re-entry while fetching leaves two fetches for one entry
        if !self.state.beacons_with_major(main.major).is_empty() {
            debug!(region_id = %region_id, "beacon_monitoring_already_started");
            return;
        }

        let fetched = match result {
            Ok(beacons) => beacons,
            Err(e) => {
                warn!(region_id = %region_id, error = %e, "beacon_fetch_failed");
                return;
            }
        };

        let major = main.major;
        let mut beacons = Vec::with_capacity(fetched.len() + 1);
        beacons.push(main);
        for beacon in fetched.into_iter().take(self.config.max_beacons_per_region()) {
            if beacon.major != major || beacon.minor.is_none() {
                debug!(beacon_id = %beacon.id, major = %beacon.major, "beacon_ignored");
                continue;
            }
            beacons.push(beacon);
        }

        self.state.add_beacons(beacons.clone());
        self.dirty = true;

        if let Err(e) = monitor.start_ranging(&region, &beacons).await {
            warn!(region_id = %region_id, error = %e, "start_ranging_failed");
        }
        info!(region_id = %region_id, major = %major, beacons = %beacons.len(), "beacon_monitoring_started");
    }
}
