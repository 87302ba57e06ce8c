//! Region and beacon dwell sessions
//!
//! Region sessions collect the location trail while the device is inside a
//! region; beacon sessions collect ranging snapshots while the main region
//! beacon is in range. Closed sessions are returned to the caller, which
//! hands them to the analytics worker (best-effort).

use crate::domain::session::{BeaconSample, BeaconSession, RegionSession};
use crate::domain::types::{Beacon, Location, RegionId};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::debug;

pub struct SessionTracker {
    region_sessions: FxHashMap<RegionId, RegionSession>,
    beacon_sessions: FxHashMap<RegionId, BeaconSession>,
    max_locations: usize,
}

impl SessionTracker {
    pub fn new(max_locations: usize) -> Self {
        Self {
            region_sessions: FxHashMap::default(),
            beacon_sessions: FxHashMap::default(),
            max_locations,
        }
    }

    // ---------------------------------------------------------------------
    // Region sessions
    // ---------------------------------------------------------------------

    /// Open a session for a region, seeded with the last known location
    ///
    /// An already open session for the region is kept as is.
    pub fn start_region(&mut self, region_id: &RegionId, last_location: Option<Location>, now: DateTime<Utc>) {
        if self.region_sessions.contains_key(region_id) {
            debug!(region_id = %region_id, "region_session_already_open");
            return;
        }
        let mut session = RegionSession::new(region_id.clone(), now);
        if let Some(location) = last_location {
            session.locations.push(location);
        }
        debug!(region_id = %region_id, session_id = %session.id, "region_session_started");
        self.region_sessions.insert(region_id.clone(), session);
    }

    /// Append a location to every open region session
    pub fn append_location(&mut self, location: Location) {
        for session in self.region_sessions.values_mut() {
            session.locations.push(location);
        }
    }

    /// Close and remove a region session, capping its trail
    pub fn stop_region(&mut self, region_id: &RegionId, now: DateTime<Utc>) -> Option<RegionSession> {
        let mut session = self.region_sessions.remove(region_id)?;
        let raw_points = session.locations.len();
        session.close(now, self.max_locations);
        debug!(
            region_id = %region_id,
            session_id = %session.id,
            raw_points = %raw_points,
            points = %session.locations.len(),
            "region_session_stopped"
        );
        Some(session)
    }

    pub fn region_session(&self, region_id: &RegionId) -> Option<&RegionSession> {
        self.region_sessions.get(region_id)
    }

    pub fn open_region_sessions(&self) -> usize {
        self.region_sessions.len()
    }

    // ---------------------------------------------------------------------
    // Beacon sessions
    // ---------------------------------------------------------------------

    pub fn start_beacon(&mut self, region_id: &RegionId, now: DateTime<Utc>) {
        if self.beacon_sessions.contains_key(region_id) {
            debug!(region_id = %region_id, "beacon_session_already_open");
            return;
        }
        let session = BeaconSession::new(region_id.clone(), now);
        debug!(region_id = %region_id, session_id = %session.id, "beacon_session_started");
        self.beacon_sessions.insert(region_id.clone(), session);
    }

    /// Record a ranging snapshot; ignored when no session is open for the region
    pub fn append_beacons(&mut self, region_id: &RegionId, beacons: &[Beacon], now: DateTime<Utc>) -> bool {
        let Some(session) = self.beacon_sessions.get_mut(region_id) else {
            return false;
        };
        session.beacons.extend(beacons.iter().map(|b| BeaconSample::from_beacon(b, now)));
        true
    }

    pub fn stop_beacon(&mut self, region_id: &RegionId, now: DateTime<Utc>) -> Option<BeaconSession> {
        let mut session = self.beacon_sessions.remove(region_id)?;
        session.close(now);
        debug!(
            region_id = %region_id,
            session_id = %session.id,
            samples = %session.beacons.len(),
            "beacon_session_stopped"
        );
        Some(session)
    }

    pub fn beacon_session(&self, region_id: &RegionId) -> Option<&BeaconSession> {
        self.beacon_sessions.get(region_id)
    }

    pub fn open_beacon_sessions(&self) -> usize {
        self.beacon_sessions.len()
    }

    /// Close every open session, region sessions first
    pub fn stop_all(&mut self, now: DateTime<Utc>) -> (Vec<RegionSession>, Vec<BeaconSession>) {
        let region_ids: Vec<RegionId> = self.region_sessions.keys().cloned().collect();
        let regions: Vec<RegionSession> = region_ids.iter().filter_map(|id| self.stop_region(id, now)).collect();
        let beacon_ids: Vec<RegionId> = self.beacon_sessions.keys().cloned().collect();
        let beacons: Vec<BeaconSession> = beacon_ids.iter().filter_map(|id| self.stop_beacon(id, now)).collect();
        (regions, beacons)
    }
}
