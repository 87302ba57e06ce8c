//! Transition handlers for the GeoEngine
//!
//! Each handler turns one raw signal into enter/exit decisions. Enter and
//! exit are idempotent: entering an entered region (or exiting one that is
//! not entered) changes nothing and emits nothing. Callbacks for ids that are
//! no longer monitored are counted and ignored.

use super::GeoEngine;
use crate::domain::geometry::region_contains;
use crate::domain::types::{
    BeaconSignal, Location, RangingReading, Region, RegionId, Transition,
};
use crate::io::events::GeoEvent;
use crate::io::platform::{TriggerEvent, TriggerKind};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

impl GeoEngine {
    /// Handle an OS location update
    ///
    /// Malformed locations are discarded before touching any state. Accepted
    /// ones feed open region sessions, drive the manual polygon check and may
    /// trigger a nearest-regions sync.
    pub(crate) async fn handle_location(&mut self, location: Location) {
        if let Err(e) = location.validate() {
            self.metrics.record_location(false);
            warn!(lat = %location.lat, lon = %location.lon, error = %e, "location_rejected");
            return;
        }
        self.metrics.record_location(true);
        self.last_location = Some(location);
        self.publisher.publish(GeoEvent::LocationUpdated { location });

        if self.state.entered_region_count() > 0 {
            self.sessions.append_location(location);
        }

        self.check_polygons(location).await;
        self.maybe_sync(location);
    }

    /// Synthesize enter/exit for polygon regions the OS cannot fence
    async fn check_polygons(&mut self, location: Location) {
        let now = self.clock.now();
        let point = location.coordinate();
        let changes: Vec<(RegionId, bool)> = self
            .state
            .regions()
            .into_iter()
            .filter(|r| r.is_polygon())
            .filter_map(|r| {
                let inside = region_contains(r, point);
                (inside != self.state.is_region_entered(&r.id)).then(|| (r.id.clone(), inside))
            })
            .collect();

        for (id, inside) in changes {
            if inside {
                self.enter_region(&id, now);
            } else {
                self.exit_region(&id, now).await;
            }
        }
    }

    /// Native fence callback carrying one or more region ids
    pub(crate) async fn handle_fence_transition(&mut self, transition: Transition, region_ids: &[RegionId]) {
        let now = self.clock.now();
        for id in region_ids {
            match transition {
                Transition::Enter => {
                    self.enter_region(id, now);
                }
                Transition::Exit => {
                    self.exit_region(id, now).await;
                }
            }
        }
    }

    /// Enter a monitored region; returns true when the state changed
    pub(crate) fn enter_region(&mut self, id: &RegionId, now: DateTime<Utc>) -> bool {
        let Some(region) = self.state.region(id).cloned() else {
            self.metrics.record_stale_callback();
            debug!(region_id = %id, "region_enter_unknown");
            return false;
        };
        if !self.state.mark_region_entered(id) {
            debug!(region_id = %id, "region_already_entered");
            return false;
        }
        self.dirty = true;
        self.metrics.record_region_enter();
        info!(region_id = %id, name = %region.name, polygon = %region.is_polygon(), "region_entered");

        let seed = self.current_location();
        self.sessions.start_region(id, seed, now);
        self.analytics.send_trigger(TriggerEvent::region(TriggerKind::RegionEnter, id));

        if region.major.is_some() {
            self.request_beacons(&region);
        }
        self.publisher.publish(GeoEvent::RegionEntered { region });
        true
    }

    /// Exit an entered region; returns true when the state changed
    pub(crate) async fn exit_region(&mut self, id: &RegionId, now: DateTime<Utc>) -> bool {
        let Some(region) = self.state.region(id).cloned() else {
            self.metrics.record_stale_callback();
            debug!(region_id = %id, "region_exit_unknown");
            return false;
        };
        if !self.state.mark_region_exited(id) {
            debug!(region_id = %id, "region_not_entered");
            return false;
        }
        self.dirty = true;
        self.metrics.record_region_exit();
        info!(region_id = %id, name = %region.name, "region_exited");

        if let Some(session) = self.sessions.stop_region(id, now) {
            self.analytics.send_region_session(session);
        }
        self.analytics.send_trigger(TriggerEvent::region(TriggerKind::RegionExit, id));

        if region.major.is_some() {
            self.stop_beacon_monitoring(&region, now).await;
        }
        self.publisher.publish(GeoEvent::RegionExited { region });
        true
    }

    /// Stop ranging a region's beacons and forget them
    async fn stop_beacon_monitoring(&mut self, region: &Region, now: DateTime<Utc>) {
        let Some(major) = region.major else {
            return;
        };
        if let Some(session) = self.sessions.stop_beacon(&region.id, now) {
            self.analytics.send_beacon_session(session);
        }

        let removed = self.state.remove_beacons_with_major(major);
        if removed == 0 {
            return;
        }
        self.dirty = true;

        if let Some(monitor) = self.beacon_monitor.clone() {
            if let Err(e) = monitor.stop_ranging(region).await {
                warn!(region_id = %region.id, error = %e, "stop_ranging_failed");
            }
        }
        info!(region_id = %region.id, removed = %removed, "beacon_monitoring_stopped");
    }

    /// Beacon monitoring callback
    ///
    /// A signal without minor is the main region beacon and only opens or
    /// closes the region's beacon session. A signal with minor toggles that
    /// beacon's entered mark and notifies listeners.
    pub(crate) fn handle_beacon_transition(&mut self, transition: Transition, signal: &BeaconSignal) {
        let now = self.clock.now();
        let Some(beacon) = self.state.beacon(&signal.unique_id).cloned() else {
            self.metrics.record_stale_callback();
            debug!(beacon_id = %signal.unique_id, major = %signal.major, "beacon_callback_unknown");
            return;
        };

        if signal.minor.is_none() {
            if !beacon.is_main_region_beacon() {
                self.metrics.record_stale_callback();
                debug!(beacon_id = %beacon.id, "main_beacon_signal_mismatch");
                return;
            }
            let region_id = RegionId(beacon.id.0.clone());
            match transition {
                Transition::Enter => self.sessions.start_beacon(&region_id, now),
                Transition::Exit => {
                    if let Some(session) = self.sessions.stop_beacon(&region_id, now) {
                        self.analytics.send_beacon_session(session);
                    }
                }
            }
            return;
        }

        match transition {
            Transition::Enter => {
                if !self.state.mark_beacon_entered(&beacon.id) {
                    debug!(beacon_id = %beacon.id, "beacon_already_entered");
                    return;
                }
                self.dirty = true;
                self.metrics.record_beacon_enter();
                info!(beacon_id = %beacon.id, major = %beacon.major, minor = ?beacon.minor, "beacon_entered");
                self.analytics.send_trigger(TriggerEvent::beacon(TriggerKind::BeaconEnter, &beacon.id));
                self.publisher.publish(GeoEvent::BeaconEntered { beacon });
            }
            Transition::Exit => {
                if !self.state.mark_beacon_exited(&beacon.id) {
                    debug!(beacon_id = %beacon.id, "beacon_not_entered");
                    return;
                }
                self.dirty = true;
                self.metrics.record_beacon_exit();
                info!(beacon_id = %beacon.id, major = %beacon.major, minor = ?beacon.minor, "beacon_exited");
                self.analytics.send_trigger(TriggerEvent::beacon(TriggerKind::BeaconExit, &beacon.id));
                self.publisher.publish(GeoEvent::BeaconExited { beacon });
            }
        }
    }

    /// Fold ranging readings into the region's monitored beacons
    ///
    /// Readings with a missing, negative or non-finite distance are dropped
    /// and never coerced into a tier.
    pub(crate) fn handle_beacons_ranged(&mut self, region_id: &RegionId, readings: &[RangingReading]) {
        let now = self.clock.now();
        let Some(region) = self.state.region(region_id).cloned() else {
            self.metrics.record_stale_callback();
            debug!(region_id = %region_id, "ranging_unknown_region");
            return;
        };
        let Some(major) = region.major else {
            debug!(region_id = %region_id, "ranging_region_without_major");
            return;
        };

        let mut rejected = 0u64;
        let mut ranged = Vec::with_capacity(readings.len());
        for reading in readings {
            let Some(proximity) = self.classifier.classify_reading(reading.distance_m) else {
                rejected += 1;
                continue;
            };
            if reading.major != major {
                debug!(region_id = %region_id, major = %reading.major, "ranged_foreign_major");
                continue;
            }
            match self.state.beacon_by_minor_mut(major, reading.minor) {
                Some(beacon) => {
                    beacon.proximity = proximity;
                    ranged.push(beacon.clone());
                }
                None => debug!(region_id = %region_id, minor = %reading.minor, "ranged_beacon_not_monitored"),
            }
        }

        if rejected > 0 {
            self.metrics.record_ranging_rejected(rejected);
            debug!(region_id = %region_id, rejected = %rejected, "ranging_readings_rejected");
        }
        if !ranged.is_empty() {
            self.dirty = true;
            self.sessions.append_beacons(region_id, &ranged, now);
        }
        self.publisher.publish(GeoEvent::BeaconsRanged { region, beacons: ranged });
    }
}
