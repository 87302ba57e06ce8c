//! Monitored regions and beacons with their entered marks
//!
//! `MonitoredState` is the only shared mutable resource of the engine. It is
//! written exclusively by the engine worker and published to readers as a
//! snapshot. All mutations keep two invariants:
//! - every entered region id is a key of `monitored_regions`
//! - every entered beacon id belongs to a beacon in `monitored_beacons`

use crate::domain::types::{Beacon, BeaconId, Region, RegionId};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoredState {
    monitored_regions: FxHashMap<RegionId, Region>,
    entered_regions: FxHashSet<RegionId>,
    monitored_beacons: Vec<Beacon>,
    entered_beacons: FxHashSet<BeaconId>,
}

impl MonitoredState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Regions
    // ---------------------------------------------------------------------

    pub fn region(&self, id: &RegionId) -> Option<&Region> {
        self.monitored_regions.get(id)
    }

    #[inline]
    pub fn contains_region(&self, id: &RegionId) -> bool {
        self.monitored_regions.contains_key(id)
    }

    #[inline]
    pub fn is_region_entered(&self, id: &RegionId) -> bool {
        self.entered_regions.contains(id)
    }

    pub fn region_count(&self) -> usize {
        self.monitored_regions.len()
    }

    /// Monitored regions sorted by id for stable output
    pub fn regions(&self) -> Vec<&Region> {
        let mut regions: Vec<&Region> = self.monitored_regions.values().collect();
        regions.sort_by(|a, b| a.id.cmp(&b.id));
        regions
    }

    pub fn region_ids(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self.monitored_regions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn entered_regions(&self) -> Vec<&Region> {
        self.regions().into_iter().filter(|r| self.entered_regions.contains(&r.id)).collect()
    }

    pub fn entered_region_count(&self) -> usize {
        self.entered_regions.len()
    }

    /// Insert or replace a single monitored region
    pub fn insert_region(&mut self, region: Region) {
        self.monitored_regions.insert(region.id.clone(), region);
    }

    /// Remove a region and its entered mark
    pub fn remove_region(&mut self, id: &RegionId) -> Option<Region> {
        self.entered_regions.remove(id);
        self.monitored_regions.remove(id)
    }

    /// Replace the monitored regions wholesale
    ///
    /// Entered marks survive only for regions still present afterwards.
    pub fn replace_all_regions(&mut self, regions: Vec<Region>) {
        self.monitored_regions = regions.into_iter().map(|r| (r.id.clone(), r)).collect();
        let monitored = &self.monitored_regions;
        self.entered_regions.retain(|id| monitored.contains_key(id));
    }

    /// Mark a region as entered
    ///
    /// Returns true only when this call changed the state. Unknown ids are a
    /// logged no-op (late callback for a fence that has since been removed).
    pub fn mark_region_entered(&mut self, id: &RegionId) -> bool {
        if !self.monitored_regions.contains_key(id) {
            debug!(region_id = %id, "mark_entered_unknown_region");
            return false;
        }
        self.entered_regions.insert(id.clone())
    }

    /// Clear a region's entered mark; true if it was set
    pub fn mark_region_exited(&mut self, id: &RegionId) -> bool {
        self.entered_regions.remove(id)
    }

    // ---------------------------------------------------------------------
    // Beacons
    // ---------------------------------------------------------------------

    pub fn beacon(&self, id: &BeaconId) -> Option<&Beacon> {
        self.monitored_beacons.iter().find(|b| &b.id == id)
    }

    #[inline]
    pub fn contains_beacon(&self, id: &BeaconId) -> bool {
        self.beacon(id).is_some()
    }

    #[inline]
    pub fn is_beacon_entered(&self, id: &BeaconId) -> bool {
        self.entered_beacons.contains(id)
    }

    pub fn beacons(&self) -> &[Beacon] {
        &self.monitored_beacons
    }

    pub fn entered_beacons(&self) -> Vec<&Beacon> {
        self.monitored_beacons.iter().filter(|b| self.entered_beacons.contains(&b.id)).collect()
    }

    /// Beacons sharing a region major
    pub fn beacons_with_major(&self, major: u16) -> Vec<&Beacon> {
        self.monitored_beacons.iter().filter(|b| b.major == major).collect()
    }

    /// Individual (non-main) beacon with the given major/minor
    pub fn beacon_by_minor_mut(&mut self, major: u16, minor: u16) -> Option<&mut Beacon> {
        self.monitored_beacons.iter_mut().find(|b| b.major == major && b.minor == Some(minor))
    }

    /// Append beacons, skipping ids already monitored
    pub fn add_beacons(&mut self, beacons: Vec<Beacon>) {
        for beacon in beacons {
            if !self.contains_beacon(&beacon.id) {
                self.monitored_beacons.push(beacon);
            }
        }
    }

    /// Drop every beacon of a region major, returning how many were removed
    pub fn remove_beacons_with_major(&mut self, major: u16) -> usize {
        let before = self.monitored_beacons.len();
        let entered = &mut self.entered_beacons;
        self.monitored_beacons.retain(|b| {
            if b.major == major {
                entered.remove(&b.id);
                false
            } else {
                true
            }
        });
        before - self.monitored_beacons.len()
    }

    /// Mark a beacon as entered; unknown ids are a logged no-op
    pub fn mark_beacon_entered(&mut self, id: &BeaconId) -> bool {
        if !self.contains_beacon(id) {
            debug!(beacon_id = %id, "mark_entered_unknown_beacon");
            return false;
        }
        self.entered_beacons.insert(id.clone())
    }

    pub fn mark_beacon_exited(&mut self, id: &BeaconId) -> bool {
        self.entered_beacons.remove(id)
    }

    // ---------------------------------------------------------------------
    // Whole state
    // ---------------------------------------------------------------------

    pub fn is_empty(&self) -> bool {
        self.monitored_regions.is_empty() && self.monitored_beacons.is_empty()
    }

    pub fn clear(&mut self) {
        self.monitored_regions.clear();
        self.entered_regions.clear();
        self.monitored_beacons.clear();
        self.entered_beacons.clear();
    }

    /// Check both subset invariants
    pub fn invariants_hold(&self) -> bool {
        let regions_ok = self.entered_regions.iter().all(|id| self.monitored_regions.contains_key(id));
        let beacons_ok = self.entered_beacons.iter().all(|id| self.contains_beacon(id));
        regions_ok && beacons_ok
    }

    /// Drop entered marks that no longer reference monitored entries
    ///
    /// Applied to state restored from storage, which may predate a crash
    /// between two writes.
    pub fn repair(&mut self) -> usize {
        let before = self.entered_regions.len() + self.entered_beacons.len();
        let monitored = &self.monitored_regions;
        self.entered_regions.retain(|id| monitored.contains_key(id));
        let ids: FxHashSet<BeaconId> = self.monitored_beacons.iter().map(|b| b.id.clone()).collect();
        self.entered_beacons.retain(|id| ids.contains(id));
        before - (self.entered_regions.len() + self.entered_beacons.len())
    }
}
