//! Tests for the GeoEngine module

use super::*;
use crate::domain::session::MAX_SESSION_LOCATIONS;
use crate::domain::types::{
    Beacon, BeaconId, Capabilities, Coordinate, Proximity, Region, RegionGeometry,
};
use crate::infra::clock::ManualClock;
use crate::io::analytics::AnalyticsMessage;
use crate::io::events::{create_event_channel, GeoEvent, ListenerDispatcher};
use crate::io::platform::TriggerKind;
use crate::io::simulated::{SimulatedBackend, SimulatedBeaconMonitor, SimulatedPlatform};
use crate::io::storage::{MemoryStore, STATE_KEY};
use chrono::{TimeZone, Utc};
use smallvec::smallvec;
use tokio::sync::broadcast;

/// Test harness that keeps channel receivers alive and exposes collaborators
struct TestEngine {
    engine: GeoEngine,
    backend: Arc<SimulatedBackend>,
    platform: Arc<SimulatedPlatform>,
    monitor: Arc<SimulatedBeaconMonitor>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    events_rx: broadcast::Receiver<GeoEvent>,
    analytics_rx: mpsc::Receiver<AnalyticsMessage>,
    #[allow(dead_code)]
    dispatcher: ListenerDispatcher,
}

impl std::ops::Deref for TestEngine {
    type Target = GeoEngine;
    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl std::ops::DerefMut for TestEngine {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.engine
    }
}

impl TestEngine {
    fn events(&mut self) -> Vec<GeoEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn analytics(&mut self) -> Vec<AnalyticsMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.analytics_rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn at(&self, lat: f64, lon: f64) -> Location {
        Location::new(lat, lon, self.clock.now())
    }

    /// Send a location and apply every fetch it caused
    async fn move_to(&mut self, lat: f64, lon: f64) {
        let location = self.at(lat, lon);
        self.engine.handle_command(EngineCommand::LocationUpdated(location)).await;
        self.engine.settle().await;
    }

    async fn fence(&mut self, transition: Transition, id: &str) {
        self.engine
            .handle_command(EngineCommand::FenceTransition {
                transition,
                region_ids: vec![RegionId::from(id)],
            })
            .await;
    }

    fn region_ids(&self) -> Vec<String> {
        self.engine.state().region_ids().into_iter().map(|id| id.0).collect()
    }

    fn fences(&self) -> Vec<String> {
        self.platform.fences().into_iter().map(|id| id.0).collect()
    }
}

fn create_test_engine(catalogue: Vec<Region>) -> TestEngine {
    create_test_engine_with(Config::default(), catalogue, Arc::new(MemoryStore::new()))
}

fn create_test_engine_with(config: Config, catalogue: Vec<Region>, store: Arc<MemoryStore>) -> TestEngine {
    let metrics = Arc::new(Metrics::new());
    let backend = Arc::new(SimulatedBackend::new(catalogue));
    let platform = Arc::new(SimulatedPlatform::new(Capabilities::full()));
    let monitor = Arc::new(SimulatedBeaconMonitor::new());
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));

    let (publisher, dispatcher, _registry) = create_event_channel(1024, metrics.clone());
    let events_rx = publisher.subscribe();
    let (analytics_tx, analytics_rx) = mpsc::channel(1024);
    let analytics = AnalyticsSender::new(analytics_tx, metrics.clone());

    let collaborators = Collaborators {
        service: backend.clone(),
        platform: platform.clone(),
        beacon_monitor: Some(monitor.clone()),
        store: store.clone(),
        clock: clock.clone(),
    };
    let engine = GeoEngine::new(config, collaborators, publisher, analytics, metrics);

    TestEngine { engine, backend, platform, monitor, store, clock, events_rx, analytics_rx, dispatcher }
}

async fn enabled_engine(catalogue: Vec<Region>) -> TestEngine {
    let mut t = create_test_engine(catalogue);
    t.handle_command(EngineCommand::Enable).await;
    t
}

fn circle(id: &str, lat: f64, lon: f64) -> Region {
    Region {
        id: RegionId::from(id),
        name: id.to_string(),
        major: None,
        geometry: RegionGeometry::Circle { center: Coordinate::new(lat, lon), radius_m: 50.0 },
        distance: 50.0,
    }
}

fn beacon_region(id: &str, lat: f64, lon: f64, major: u16) -> Region {
    Region { major: Some(major), ..circle(id, lat, lon) }
}

/// Square polygon from (0,0) to (0.01,0.01), roughly 1.1 km wide
fn square(id: &str) -> Region {
    Region {
        id: RegionId::from(id),
        name: id.to_string(),
        major: None,
        geometry: RegionGeometry::Polygon {
            vertices: smallvec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 0.01),
                Coordinate::new(0.01, 0.01),
                Coordinate::new(0.01, 0.0),
            ],
        },
        distance: 0.0,
    }
}

fn beacon(id: &str, major: u16, minor: u16) -> Beacon {
    Beacon {
        id: BeaconId::from(id),
        name: id.to_string(),
        major,
        minor: Some(minor),
        proximity: Proximity::Unknown,
    }
}

fn count<F: Fn(&GeoEvent) -> bool>(events: &[GeoEvent], f: F) -> usize {
    events.iter().filter(|e| f(e)).count()
}

fn entered(events: &[GeoEvent], id: &str) -> usize {
    count(events, |e| matches!(e, GeoEvent::RegionEntered { region } if region.id.0 == id))
}

fn exited(events: &[GeoEvent], id: &str) -> usize {
    count(events, |e| matches!(e, GeoEvent::RegionExited { region } if region.id.0 == id))
}

// ---------------------------------------------------------------------------
// Location handling and sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disabled_engine_ignores_locations() {
    let mut t = create_test_engine(vec![circle("A", 1.0, 1.0)]);
    t.move_to(0.0, 0.0).await;

    assert_eq!(t.backend.fetch_count(), 0);
    assert!(t.events().is_empty());
    assert_eq!(t.state().region_count(), 0);
}

#[tokio::test]
async fn test_first_location_syncs_and_registers_fences() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0), circle("B", 1.1, 1.0), circle("C", 1.2, 1.0)]).await;
    t.move_to(0.0, 0.0).await;

    assert_eq!(t.backend.fetch_count(), 1);
    assert_eq!(t.region_ids(), vec!["A", "B", "C"]);
    assert_eq!(t.fences(), vec!["A", "B", "C"]);
    assert_eq!(t.state().entered_region_count(), 0);
    assert_eq!(t.metrics.report().syncs_completed, 1);

    let events = t.events();
    assert_eq!(count(&events, |e| matches!(e, GeoEvent::LocationUpdated { .. })), 1);
}

#[tokio::test]
async fn test_invalid_location_rejected() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0)]).await;
    t.move_to(91.0, 0.0).await;
    t.move_to(0.0, f64::NAN).await;

    assert_eq!(t.backend.fetch_count(), 0);
    assert!(t.events().is_empty());
    let summary = t.metrics.report();
    assert_eq!(summary.locations_rejected, 2);
    assert_eq!(summary.locations_accepted, 0);
}

#[tokio::test]
async fn test_small_move_does_not_resync() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0)]).await;
    t.move_to(0.0, 0.0).await;
    // ~11 m
    t.move_to(0.0001, 0.0).await;
    assert_eq!(t.backend.fetch_count(), 1);

    // ~1.1 km
    t.move_to(0.01, 0.0).await;
    assert_eq!(t.backend.fetch_count(), 2);
}

#[tokio::test]
async fn test_differential_sync_abc_to_bcd() {
    let mut t = enabled_engine(vec![
        circle("A", 0.0, 0.0),
        circle("B", 1.0, 1.0),
        circle("C", 1.1, 1.0),
    ])
    .await;

    // Inside A: initial trigger enters it
    t.move_to(0.0, 0.0).await;
    assert_eq!(t.region_ids(), vec!["A", "B", "C"]);
    assert!(t.state().is_region_entered(&RegionId::from("A")));
    t.events();
    t.analytics();

    t.backend.set_catalogue(vec![circle("B", 1.0, 1.0), circle("C", 1.1, 1.0), circle("D", 1.2, 1.0)]);
    // ~220 m away, outside A
    t.move_to(0.002, 0.0).await;

    assert_eq!(t.region_ids(), vec!["B", "C", "D"]);
    assert_eq!(t.fences(), vec!["B", "C", "D"]);
    assert_eq!(t.state().entered_region_count(), 0);
    assert!(t.state().invariants_hold());

    let events = t.events();
    assert_eq!(exited(&events, "A"), 1);

    let analytics = t.analytics();
    assert!(analytics.iter().any(|m| matches!(m, AnalyticsMessage::RegionSession(s) if s.region_id.0 == "A")));
    assert!(analytics.iter().any(|m| matches!(
        m,
        AnalyticsMessage::Trigger(e) if e.kind == TriggerKind::RegionExit
    )));
}

#[tokio::test]
async fn test_sync_respects_regions_limit() {
    let config = Config::default().with_regions_limit(2);
    let catalogue = vec![circle("A", 1.0, 1.0), circle("B", 1.1, 1.0), circle("C", 1.2, 1.0)];
    let mut t = create_test_engine_with(config, catalogue, Arc::new(MemoryStore::new()));
    t.handle_command(EngineCommand::Enable).await;

    t.move_to(0.0, 0.0).await;
    assert_eq!(t.region_ids(), vec!["A", "B"]);
    assert_eq!(t.platform.fences().len(), 2);
}

#[tokio::test]
async fn test_sync_failure_leaves_state_untouched() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0)]).await;
    t.move_to(0.0, 0.0).await;
    assert_eq!(t.region_ids(), vec!["A"]);

    t.backend.set_catalogue(vec![circle("Z", 2.0, 2.0)]);
    t.backend.set_fail_fetches(true);
    t.move_to(0.05, 0.0).await;

    assert_eq!(t.region_ids(), vec!["A"]);
    assert_eq!(t.fences(), vec!["A"]);
    assert_eq!(t.metrics.report().syncs_failed, 1);

    // Next small move retries because the failed sync did not move the origin
    t.backend.set_fail_fetches(false);
    t.move_to(0.0501, 0.0).await;
    assert_eq!(t.region_ids(), vec!["Z"]);
}

#[tokio::test]
async fn test_missing_capability_skips_sync() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0)]).await;
    t.platform.set_capabilities(Capabilities { precise_location: true, background_location: false, bluetooth: true });

    t.move_to(0.0, 0.0).await;
    assert_eq!(t.backend.fetch_count(), 0);
    assert_eq!(t.metrics.report().syncs_skipped, 1);

    // Capability granted mid-session: nothing monitored, so the next update syncs
    t.platform.set_capabilities(Capabilities::full());
    t.move_to(0.00001, 0.0).await;
    assert_eq!(t.backend.fetch_count(), 1);
    assert_eq!(t.region_ids(), vec!["A"]);
}

#[tokio::test]
async fn test_syncs_coalesce_last_location_wins() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0)]).await;

    for lat in [0.0, 0.01, 0.02, 0.03] {
        let location = t.at(lat, 0.0);
        t.handle_command(EngineCommand::LocationUpdated(location)).await;
    }
    assert_eq!(t.metrics.report().syncs_coalesced, 3);

    t.settle().await;
    // The first sync plus one for the last pending location
    assert_eq!(t.backend.fetch_count(), 2);
    assert_eq!(t.last_sync_origin.map(|l| l.lat), Some(0.03));
    assert!(!t.sync_in_flight);
}

// ---------------------------------------------------------------------------
// Region transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_region_enter_is_idempotent() {
    let config = Config::default().with_initial_trigger(false);
    let mut t = create_test_engine_with(config, vec![circle("A", 0.0, 0.0)], Arc::new(MemoryStore::new()));
    t.handle_command(EngineCommand::Enable).await;
    t.move_to(0.0, 0.0).await;
    assert_eq!(t.state().entered_region_count(), 0);
    t.events();

    t.fence(Transition::Enter, "A").await;
    t.fence(Transition::Enter, "A").await;

    let events = t.events();
    assert_eq!(entered(&events, "A"), 1);
    assert_eq!(t.sessions.open_region_sessions(), 1);
    assert_eq!(t.metrics.report().region_enters, 1);

    t.fence(Transition::Exit, "A").await;
    t.fence(Transition::Exit, "A").await;

    let events = t.events();
    assert_eq!(exited(&events, "A"), 1);
    assert_eq!(t.sessions.open_region_sessions(), 0);
    let sessions = t
        .analytics()
        .into_iter()
        .filter(|m| matches!(m, AnalyticsMessage::RegionSession(_)))
        .count();
    assert_eq!(sessions, 1);
}

#[tokio::test]
async fn test_callback_for_unknown_region_is_ignored() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0)]).await;
    t.move_to(0.0, 0.0).await;
    t.events();

    t.fence(Transition::Enter, "ghost").await;
    t.fence(Transition::Exit, "ghost").await;

    assert!(t.events().is_empty());
    assert_eq!(t.state().entered_region_count(), 0);
    assert_eq!(t.metrics.report().stale_callbacks, 2);
    assert!(t.state().invariants_hold());
}

#[tokio::test]
async fn test_polygon_enter_and_exit_from_locations() {
    let mut t = enabled_engine(vec![square("P")]).await;

    t.move_to(0.005, 0.005).await;
    assert!(t.state().is_region_entered(&RegionId::from("P")));
    // Polygons are never registered with the OS
    assert!(t.fences().is_empty());

    t.move_to(0.02, 0.02).await;
    assert!(!t.state().is_region_entered(&RegionId::from("P")));

    // On an edge counts as inside
    t.move_to(0.0, 0.005).await;
    assert!(t.state().is_region_entered(&RegionId::from("P")));
    // Vertex too, without a second enter
    t.move_to(0.0, 0.0).await;
    assert!(t.state().is_region_entered(&RegionId::from("P")));

    let events = t.events();
    assert_eq!(entered(&events, "P"), 2);
    assert_eq!(exited(&events, "P"), 1);
}

#[tokio::test]
async fn test_session_trail_capped_on_exit() {
    let mut t = enabled_engine(vec![circle("A", 0.0, 0.0)]).await;
    t.move_to(0.0, 0.0).await;
    assert!(t.state().is_region_entered(&RegionId::from("A")));
    t.analytics();

    let first = t.at(0.0, 0.0);
    let mut last = first;
    for i in 1..=250 {
        t.clock.advance(chrono::Duration::seconds(1));
        last = t.at(i as f64 * 1e-7, 0.0);
        t.handle_command(EngineCommand::LocationUpdated(last)).await;
    }
    t.fence(Transition::Exit, "A").await;

    let session = t
        .analytics()
        .into_iter()
        .find_map(|m| match m {
            AnalyticsMessage::RegionSession(s) => Some(s),
            _ => None,
        })
        .expect("region session flushed");
    assert_eq!(session.locations.len(), MAX_SESSION_LOCATIONS);
    assert_eq!(session.locations.first(), Some(&first));
    assert_eq!(session.locations.last(), Some(&last));
    assert!(session.end.is_some());
}

// ---------------------------------------------------------------------------
// Beacons
// ---------------------------------------------------------------------------

async fn engine_inside_beacon_region() -> TestEngine {
    let mut t = enabled_engine(vec![beacon_region("A", 0.0, 0.0, 7)]).await;
    t.backend.set_beacons(&RegionId::from("A"), vec![beacon("b1", 7, 1), beacon("b2", 7, 2), beacon("x", 9, 1)]);
    t.move_to(0.0, 0.0).await;
    t
}

#[tokio::test]
async fn test_region_with_major_starts_beacon_monitoring() {
    let mut t = engine_inside_beacon_region().await;

    let ids: Vec<&str> = t.state().beacons().iter().map(|b| b.id.0.as_str()).collect();
    // Main region beacon first, foreign major dropped
    assert_eq!(ids, vec!["A", "b1", "b2"]);
    assert!(t.state().beacons()[0].is_main_region_beacon());
    assert_eq!(t.monitor.ranging(), vec![RegionId::from("A")]);
    t.events();
}

#[tokio::test]
async fn test_beacon_transitions_idempotent() {
    let mut t = engine_inside_beacon_region().await;
    t.events();

    let signal = BeaconSignal { unique_id: BeaconId::from("b1"), major: 7, minor: Some(1) };
    for _ in 0..2 {
        t.handle_command(EngineCommand::BeaconTransition { transition: Transition::Enter, signal: signal.clone() })
            .await;
    }
    assert!(t.state().is_beacon_entered(&BeaconId::from("b1")));

    for _ in 0..2 {
        t.handle_command(EngineCommand::BeaconTransition { transition: Transition::Exit, signal: signal.clone() })
            .await;
    }

    let events = t.events();
    assert_eq!(count(&events, |e| matches!(e, GeoEvent::BeaconEntered { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, GeoEvent::BeaconExited { .. })), 1);
    assert!(!t.state().is_beacon_entered(&BeaconId::from("b1")));
}

#[tokio::test]
async fn test_main_beacon_controls_beacon_session() {
    let mut t = engine_inside_beacon_region().await;
    let main = BeaconSignal { unique_id: BeaconId::from("A"), major: 7, minor: None };

    t.handle_command(EngineCommand::BeaconTransition { transition: Transition::Enter, signal: main.clone() })
        .await;
    assert_eq!(t.sessions.open_beacon_sessions(), 1);
    // Main beacon does not toggle entered beacons
    assert!(t.state().entered_beacons().is_empty());

    t.handle_command(EngineCommand::BeaconsRanged {
        region_id: RegionId::from("A"),
        readings: vec![RangingReading { major: 7, minor: 1, distance_m: Some(1.0) }],
    })
    .await;
    assert_eq!(t.sessions.beacon_session(&RegionId::from("A")).map(|s| s.beacons.len()), Some(1));

    t.analytics();
    t.handle_command(EngineCommand::BeaconTransition { transition: Transition::Exit, signal: main }).await;
    assert_eq!(t.sessions.open_beacon_sessions(), 0);
    assert!(t.analytics().iter().any(|m| matches!(m, AnalyticsMessage::BeaconSession(_))));
}

#[tokio::test]
async fn test_ranging_filters_invalid_distances() {
    let mut t = engine_inside_beacon_region().await;
    t.events();

    t.handle_command(EngineCommand::BeaconsRanged {
        region_id: RegionId::from("A"),
        readings: vec![
            RangingReading { major: 7, minor: 1, distance_m: Some(0.2) },
            RangingReading { major: 7, minor: 2, distance_m: Some(-1.0) },
            RangingReading { major: 7, minor: 2, distance_m: None },
        ],
    })
    .await;

    let b1 = t.state().beacon(&BeaconId::from("b1")).map(|b| b.proximity);
    let b2 = t.state().beacon(&BeaconId::from("b2")).map(|b| b.proximity);
    assert_eq!(b1, Some(Proximity::Immediate));
    assert_eq!(b2, Some(Proximity::Unknown));
    assert_eq!(t.metrics.report().ranging_rejected, 2);

    let events = t.events();
    let ranged = events.iter().find_map(|e| match e {
        GeoEvent::BeaconsRanged { beacons, .. } => Some(beacons.len()),
        _ => None,
    });
    assert_eq!(ranged, Some(1));
}

#[tokio::test]
async fn test_ranging_boundaries_fall_to_farther_tier() {
    let mut t = engine_inside_beacon_region().await;
    t.handle_command(EngineCommand::BeaconsRanged {
        region_id: RegionId::from("A"),
        readings: vec![
            RangingReading { major: 7, minor: 1, distance_m: Some(0.5) },
            RangingReading { major: 7, minor: 2, distance_m: Some(3.0) },
        ],
    })
    .await;
    assert_eq!(t.state().beacon(&BeaconId::from("b1")).map(|b| b.proximity), Some(Proximity::Near));
    assert_eq!(t.state().beacon(&BeaconId::from("b2")).map(|b| b.proximity), Some(Proximity::Far));
}

#[tokio::test]
async fn test_region_exit_stops_beacon_monitoring() {
    let mut t = engine_inside_beacon_region().await;
    let signal = BeaconSignal { unique_id: BeaconId::from("b2"), major: 7, minor: Some(2) };
    t.handle_command(EngineCommand::BeaconTransition { transition: Transition::Enter, signal }).await;

    t.fence(Transition::Exit, "A").await;

    assert!(t.state().beacons().is_empty());
    assert!(t.state().entered_beacons().is_empty());
    assert!(t.monitor.ranging().is_empty());
    assert!(t.state().invariants_hold());
}

#[tokio::test]
async fn test_beacon_fetch_after_exit_is_dropped() {
    let mut t = enabled_engine(vec![beacon_region("A", 0.0, 0.0, 7)]).await;
    t.backend.set_beacons(&RegionId::from("A"), vec![beacon("b1", 7, 1)]);

    // Enter via initial trigger, then exit before the beacon fetch lands
    let here = t.at(0.0, 0.0);
    t.handle_command(EngineCommand::LocationUpdated(here)).await;
    while t.state().region_count() == 0 {
        let outcome = t.fetch_rx.as_mut().unwrap().recv().await.unwrap();
        t.handle_fetch_outcome(outcome).await;
    }
    t.fence(Transition::Exit, "A").await;
    t.settle().await;

    assert!(t.state().beacons().is_empty());
    assert!(t.monitor.ranging().is_empty());
}

#[tokio::test]
async fn test_reentry_during_beacon_fetch_ranges_once() {
    let mut t = enabled_engine(vec![beacon_region("A", 0.0, 0.0, 7)]).await;
    t.backend.set_beacons(&RegionId::from("A"), vec![beacon("b1", 7, 1)]);

    let here = t.at(0.0, 0.0);
    t.handle_command(EngineCommand::LocationUpdated(here)).await;
    while t.state().region_count() == 0 {
        let outcome = t.fetch_rx.as_mut().unwrap().recv().await.unwrap();
        t.handle_fetch_outcome(outcome).await;
    }
    // Exit and re-enter while the first beacon fetch is still out
    t.fence(Transition::Exit, "A").await;
    t.fence(Transition::Enter, "A").await;
    t.settle().await;

    assert!(t.state().is_region_entered(&RegionId::from("A")));
    assert_eq!(t.monitor.start_count(), 1);
    assert_eq!(t.state().beacons().len(), 2);
    assert_eq!(t.monitor.ranging(), vec![RegionId::from("A")]);
}

#[tokio::test]
async fn test_beacons_disabled_by_config() {
    let config = Config::default().with_beacons_enabled(false);
    let mut t = create_test_engine_with(config, vec![beacon_region("A", 0.0, 0.0, 7)], Arc::new(MemoryStore::new()));
    t.handle_command(EngineCommand::Enable).await;
    t.backend.set_beacons(&RegionId::from("A"), vec![beacon("b1", 7, 1)]);
    t.move_to(0.0, 0.0).await;

    assert!(t.state().is_region_entered(&RegionId::from("A")));
    assert!(t.state().beacons().is_empty());
}

// ---------------------------------------------------------------------------
// Enable / disable / reset / persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disable_discards_in_flight_sync() {
    let mut t = enabled_engine(vec![circle("A", 1.0, 1.0)]).await;
    let here = t.at(0.0, 0.0);
    t.handle_command(EngineCommand::LocationUpdated(here)).await;
    assert!(t.sync_in_flight);

    t.handle_command(EngineCommand::Disable).await;
    t.settle().await;

    assert_eq!(t.state().region_count(), 0);
    assert!(t.fences().is_empty());
    assert!(!t.sync_in_flight);
    assert_eq!(t.metrics.report().syncs_discarded, 1);

    // A fresh enable syncs normally
    t.handle_command(EngineCommand::Enable).await;
    t.move_to(0.0, 0.0).await;
    assert_eq!(t.region_ids(), vec!["A"]);
}

#[tokio::test]
async fn test_disable_flushes_sessions_without_exit_events() {
    let mut t = enabled_engine(vec![circle("A", 0.0, 0.0)]).await;
    t.move_to(0.0, 0.0).await;
    assert!(t.state().is_region_entered(&RegionId::from("A")));
    t.events();
    t.analytics();

    t.handle_command(EngineCommand::Disable).await;

    assert!(t.state().is_empty());
    assert!(!t.is_enabled());
    assert_eq!(exited(&t.events(), "A"), 0);
    let analytics = t.analytics();
    assert!(analytics.iter().any(|m| matches!(m, AnalyticsMessage::RegionSession(_))));
    assert!(!analytics.iter().any(|m| matches!(m, AnalyticsMessage::Trigger(_))));
}

#[tokio::test]
async fn test_state_persisted_and_restored() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut t = create_test_engine_with(Config::default(), vec![beacon_region("A", 0.0, 0.0, 7)], store.clone());
        t.handle_command(EngineCommand::Enable).await;
        t.backend.set_beacons(&RegionId::from("A"), vec![beacon("b1", 7, 1), beacon("b2", 7, 2)]);
        t.move_to(0.0, 0.0).await;
        assert_eq!(t.monitor.ranging(), vec![RegionId::from("A")]);
        assert!(t.store.get(STATE_KEY).unwrap().is_some());
    }

    let mut t = create_test_engine_with(Config::default(), Vec::new(), store);
    assert_eq!(t.region_ids(), vec!["A"]);
    assert!(t.state().is_region_entered(&RegionId::from("A")));
    assert_eq!(t.state().beacons().len(), 3);
    assert!(t.monitor.ranging().is_empty());

    // Enabling re-registers fences, resumes ranging and reopens the session
    t.handle_command(EngineCommand::Enable).await;
    t.settle().await;
    assert_eq!(t.fences(), vec!["A"]);
    assert_eq!(t.monitor.ranging(), vec![RegionId::from("A")]);
    assert_eq!(t.monitor.start_count(), 1);
    assert_eq!(t.backend.fetch_count(), 0);
    assert_eq!(t.sessions.open_region_sessions(), 1);

    // Exit after restart flushes the reopened session
    t.fence(Transition::Exit, "A").await;
    t.settle().await;
    let analytics = t.analytics();
    assert!(analytics.iter().any(|m| matches!(m, AnalyticsMessage::RegionSession(s) if s.region_id.0 == "A")));
    assert!(t.monitor.ranging().is_empty());
    assert!(t.state().beacons().is_empty());
}

#[tokio::test]
async fn test_restored_region_without_beacons_fetches_them() {
    let store = Arc::new(MemoryStore::new());
    {
        let config = Config::default().with_beacons_enabled(false);
        let mut t = create_test_engine_with(config, vec![beacon_region("A", 0.0, 0.0, 7)], store.clone());
        t.handle_command(EngineCommand::Enable).await;
        t.move_to(0.0, 0.0).await;
        assert!(t.state().beacons().is_empty());
    }

    let mut t = create_test_engine_with(Config::default(), Vec::new(), store);
    t.backend.set_beacons(&RegionId::from("A"), vec![beacon("b1", 7, 1)]);
    t.handle_command(EngineCommand::Enable).await;
    t.settle().await;

    assert_eq!(t.state().beacons().len(), 2);
    assert_eq!(t.monitor.ranging(), vec![RegionId::from("A")]);
}

#[tokio::test]
async fn test_reset_clears_persisted_state() {
    let mut t = enabled_engine(vec![circle("A", 0.0, 0.0)]).await;
    t.move_to(0.0, 0.0).await;
    assert!(t.store.get(STATE_KEY).unwrap().is_some());

    t.handle_command(EngineCommand::Reset).await;
    assert!(t.store.get(STATE_KEY).unwrap().is_none());
    assert!(t.state().is_empty());
}

#[tokio::test]
async fn test_reader_sees_committed_state() {
    let mut t = enabled_engine(vec![circle("A", 0.0, 0.0), circle("B", 1.0, 1.0)]).await;
    let reader = t.reader();
    assert!(reader.is_enabled());

    t.move_to(0.0, 0.0).await;
    let snapshot = reader.snapshot();
    assert_eq!(snapshot.monitored_regions.len(), 2);
    assert_eq!(reader.entered_regions().iter().map(|r| r.id.0.as_str()).collect::<Vec<_>>(), vec!["A"]);
}
