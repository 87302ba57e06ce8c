//! Region and beacon proximity state engine
//!
//! `GeoEngine` is the single writer of `MonitoredState`. Every input (location
//! updates, native fence callbacks, beacon monitoring and ranging callbacks,
//! enable/disable) arrives as an `EngineCommand` on one channel and is handled
//! to completion before the next one, so the state is never mutated
//! concurrently.
//!
//! Side effects are split by ordering requirement:
//! - store mutations and OS fence/ranging calls are awaited in place
//! - nearest-region and beacon fetches run on spawned tasks and come back as
//!   `FetchOutcome`s, tagged with the generation that issued them
//! - analytics posts and listener events are best-effort and never awaited

mod handlers;
mod reader;
mod sync;
#[cfg(test)]
mod tests;

pub use reader::{StateReader, StateSnapshot};

use crate::domain::state::MonitoredState;
use crate::domain::types::{Beacon, BeaconSignal, Location, RangingReading, Region, RegionId, Transition};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::analytics::AnalyticsSender;
use crate::io::events::EventPublisher;
use crate::io::platform::{BeaconMonitor, GeofencePlatform, RegionService};
use crate::io::storage::{KeyValueStore, StatePersister};
use crate::services::proximity::ProximityClassifier;
use crate::services::sessions::SessionTracker;
use crate::services::synchronizer::FetchOutcome;
use anyhow::anyhow;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// Input to the engine worker
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Start monitoring (fences for restored regions, sync on next location)
    Enable,
    /// Stop monitoring and clear state without posting exit events
    Disable,
    /// Disable and remove persisted state
    Reset,
    LocationUpdated(Location),
    /// Native fence callback for circular regions
    FenceTransition { transition: Transition, region_ids: Vec<RegionId> },
    /// Beacon monitoring callback
    BeaconTransition { transition: Transition, signal: BeaconSignal },
    /// Ranging results for the beacons of one region
    BeaconsRanged { region_id: RegionId, readings: Vec<RangingReading> },
}

impl EngineCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineCommand::Enable => "enable",
            EngineCommand::Disable => "disable",
            EngineCommand::Reset => "reset",
            EngineCommand::LocationUpdated(_) => "location_updated",
            EngineCommand::FenceTransition { .. } => "fence_transition",
            EngineCommand::BeaconTransition { .. } => "beacon_transition",
            EngineCommand::BeaconsRanged { .. } => "beacons_ranged",
        }
    }
}

/// Sender handle for engine commands
///
/// Clone this to share across platform callbacks and host code.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, command: EngineCommand) -> anyhow::Result<()> {
        let name = command.as_str();
        self.tx.send(command).await.map_err(|_| anyhow!("geo engine stopped, dropped {}", name))
    }

    pub async fn enable(&self) -> anyhow::Result<()> {
        self.send(EngineCommand::Enable).await
    }

    pub async fn disable(&self) -> anyhow::Result<()> {
        self.send(EngineCommand::Disable).await
    }

    pub async fn reset(&self) -> anyhow::Result<()> {
        self.send(EngineCommand::Reset).await
    }

    pub async fn location_updated(&self, location: Location) -> anyhow::Result<()> {
        self.send(EngineCommand::LocationUpdated(location)).await
    }

    pub async fn fence_transition(
        &self,
        transition: Transition,
        region_ids: Vec<RegionId>,
    ) -> anyhow::Result<()> {
        self.send(EngineCommand::FenceTransition { transition, region_ids }).await
    }

    pub async fn beacon_transition(
        &self,
        transition: Transition,
        signal: BeaconSignal,
    ) -> anyhow::Result<()> {
        self.send(EngineCommand::BeaconTransition { transition, signal }).await
    }

    pub async fn beacons_ranged(
        &self,
        region_id: RegionId,
        readings: Vec<RangingReading>,
    ) -> anyhow::Result<()> {
        self.send(EngineCommand::BeaconsRanged { region_id, readings }).await
    }
}

/// External collaborators supplied when composing the engine
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn RegionService>,
    pub platform: Arc<dyn GeofencePlatform>,
    /// Absent when the host ships without beacon support
    pub beacon_monitor: Option<Arc<dyn BeaconMonitor>>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

/// Single-writer proximity engine
pub struct GeoEngine {
    /// Monitored and entered regions/beacons (persisted)
    pub(crate) state: MonitoredState,
    /// Open region and beacon dwell sessions
    pub(crate) sessions: SessionTracker,
    pub(crate) classifier: ProximityClassifier,
    pub(crate) config: Config,
    pub(crate) service: Arc<dyn RegionService>,
    pub(crate) platform: Arc<dyn GeofencePlatform>,
    pub(crate) beacon_monitor: Option<Arc<dyn BeaconMonitor>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) persister: StatePersister,
    pub(crate) publisher: EventPublisher,
    pub(crate) analytics: AnalyticsSender,
    pub(crate) metrics: Arc<Metrics>,
    snapshot_tx: watch::Sender<Arc<StateSnapshot>>,
    pub(crate) enabled: bool,
    /// Bumped on disable/reset; fetch outcomes from older generations are dropped
    pub(crate) generation: u64,
    /// Latest accepted location
    pub(crate) last_location: Option<Location>,
    /// Location the last applied sync was fetched for
    pub(crate) last_sync_origin: Option<Location>,
    pub(crate) sync_in_flight: bool,
    /// Latest location that arrived while a sync was in flight
    pub(crate) pending_sync: Option<Location>,
    /// Spawned fetches not yet received
    pub(crate) outstanding_fetches: usize,
    pub(crate) fetch_tx: mpsc::Sender<FetchOutcome>,
    fetch_rx: Option<mpsc::Receiver<FetchOutcome>>,
    /// State changed since the last commit
    pub(crate) dirty: bool,
}

impl GeoEngine {
    /// Create an engine, restoring persisted state from the store
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        publisher: EventPublisher,
        analytics: AnalyticsSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        let persister = StatePersister::new(collaborators.store);
        let state = persister.load();
        info!(
            regions = %state.region_count(),
            entered = %state.entered_region_count(),
            beacons = %state.beacons().len(),
            "state_restored"
        );

        let (snapshot_tx, _) = watch::channel(Arc::new(StateSnapshot::capture(&state, false)));
        let (fetch_tx, fetch_rx) = mpsc::channel(config.command_buffer());
        metrics.set_region_counts(state.region_count(), state.entered_region_count());

        Self {
            state,
            sessions: SessionTracker::new(config.max_session_locations()),
            classifier: ProximityClassifier::new(config.near_threshold_m(), config.far_threshold_m()),
            service: collaborators.service,
            platform: collaborators.platform,
            beacon_monitor: collaborators.beacon_monitor,
            clock: collaborators.clock,
            config,
            persister,
            publisher,
            analytics,
            metrics,
            snapshot_tx,
            enabled: false,
            generation: 0,
            last_location: None,
            last_sync_origin: None,
            sync_in_flight: false,
            pending_sync: None,
            outstanding_fetches: 0,
            fetch_tx,
            fetch_rx: Some(fetch_rx),
            dirty: false,
        }
    }

    /// Reader for UI-facing code
    pub fn reader(&self) -> StateReader {
        StateReader::new(self.snapshot_tx.subscribe())
    }

    pub fn state(&self) -> &MonitoredState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run the engine, consuming commands until the channel closes
    pub async fn run(&mut self, mut command_rx: mpsc::Receiver<EngineCommand>) {
        let Some(mut fetch_rx) = self.fetch_rx.take() else {
            warn!("engine_already_running");
            return;
        };
        let mut metrics_interval =
            interval(Duration::from_secs(self.config.metrics_interval_secs().max(1)));

        info!(
            regions_limit = %self.config.regions_limit(),
            beacons = %self.beacon_monitor.is_some(),
            "geo_engine_started"
        );

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(c) => self.handle_command(c).await,
                        None => break,
                    }
                }
                Some(outcome) = fetch_rx.recv() => {
                    self.handle_fetch_outcome(outcome).await;
                }
                _ = metrics_interval.tick() => {
                    self.metrics.report().log();
                }
            }
        }

        self.fetch_rx = Some(fetch_rx);
        info!("geo_engine_stopped");
    }

    /// Handle one command to completion and commit its mutations
    pub(crate) async fn handle_command(&mut self, command: EngineCommand) {
        debug!(command = %command.as_str(), "engine_command");
        match command {
            EngineCommand::Enable => self.enable().await,
            EngineCommand::Disable => self.disable().await,
            EngineCommand::Reset => self.reset().await,
            command if !self.enabled => {
                debug!(command = %command.as_str(), "engine_disabled_ignoring");
            }
            EngineCommand::LocationUpdated(location) => self.handle_location(location).await,
            EngineCommand::FenceTransition { transition, region_ids } => {
                self.handle_fence_transition(transition, &region_ids).await
            }
            EngineCommand::BeaconTransition { transition, signal } => {
                self.handle_beacon_transition(transition, &signal)
            }
            EngineCommand::BeaconsRanged { region_id, readings } => {
                self.handle_beacons_ranged(&region_id, &readings)
            }
        }
        self.commit();
    }

    /// Handle one fetch outcome and commit its mutations
    pub(crate) async fn handle_fetch_outcome(&mut self, outcome: FetchOutcome) {
        self.outstanding_fetches = self.outstanding_fetches.saturating_sub(1);
        match outcome {
            FetchOutcome::Regions { generation, location, started, result } => {
                self.complete_sync(generation, location, started, result).await
            }
            FetchOutcome::Beacons { generation, region_id, result } => {
                self.complete_beacon_fetch(generation, &region_id, result).await
            }
        }
        self.commit();
    }

    /// Apply every outstanding fetch outcome (used when driving the engine
    /// without `run`)
    pub(crate) async fn settle(&mut self) {
        while self.outstanding_fetches > 0 {
            let outcome = match self.fetch_rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => return,
            };
            match outcome {
                Some(outcome) => self.handle_fetch_outcome(outcome).await,
                None => return,
            }
        }
    }

    async fn enable(&mut self) {
        if self.enabled {
            debug!("engine_already_enabled");
            return;
        }
        self.enabled = true;
        self.dirty = true;
        info!(regions = %self.state.region_count(), "location_updates_enabled");

        // Restored circular regions need their OS fences back
        let restored: Vec<_> =
            self.state.regions().into_iter().filter(|r| !r.is_polygon()).cloned().collect();
        for region in restored {
            if let Err(e) = self.platform.register_fence(&region).await {
                warn!(region_id = %region.id, error = %e, "fence_reregister_failed");
            }
        }
        self.resume_entered_regions().await;

        if let Some(location) = self.platform.last_known_location() {
            self.handle_location(location).await;
        }
    }

    /// Reopen sessions and beacon ranging for regions restored as entered
    async fn resume_entered_regions(&mut self) {
        let now = self.clock.now();
        let seed = self.current_location();
        let entered: Vec<Region> = self.state.entered_regions().into_iter().cloned().collect();
        for region in entered {
            self.sessions.start_region(&region.id, seed, now);
            let Some(main) = region.main_beacon() else {
                continue;
            };
            if self.state.is_beacon_entered(&main.id) {
                self.sessions.start_beacon(&region.id, now);
            }

            let beacons: Vec<Beacon> = self.state.beacons_with_major(main.major).into_iter().cloned().collect();
            if beacons.is_empty() {
                self.request_beacons(&region);
                continue;
            }
            if !self.config.beacons_enabled() || !self.platform.capabilities().can_monitor_beacons() {
                debug!(region_id = %region.id, "beacon_ranging_not_resumed");
                continue;
            }
            if let Some(monitor) = self.beacon_monitor.clone() {
                if let Err(e) = monitor.start_ranging(&region, &beacons).await {
                    warn!(region_id = %region.id, error = %e, "start_ranging_failed");
                }
                info!(region_id = %region.id, beacons = %beacons.len(), "beacon_monitoring_resumed");
            }
        }
    }

    /// Stop every fence and ranging session, flush open sessions, clear state
    ///
    /// No exit events are posted or published: disabling is not a transition.
    async fn disable(&mut self) {
        let now = self.clock.now();
        self.generation += 1;
        self.sync_in_flight = false;
        self.pending_sync = None;
        self.last_location = None;
        self.last_sync_origin = None;

        let fence_ids: Vec<RegionId> =
            self.state.regions().into_iter().filter(|r| !r.is_polygon()).map(|r| r.id.clone()).collect();
        if !fence_ids.is_empty() {
            if let Err(e) = self.platform.unregister_fences(&fence_ids).await {
                warn!(regions = %fence_ids.len(), error = %e, "fence_unregister_failed");
            }
        }

        if let Some(monitor) = self.beacon_monitor.clone() {
            let ranged: Vec<_> = self
                .state
                .regions()
                .into_iter()
                .filter(|r| r.major.is_some_and(|m| !self.state.beacons_with_major(m).is_empty()))
                .cloned()
                .collect();
            for region in ranged {
                if let Err(e) = monitor.stop_ranging(&region).await {
                    warn!(region_id = %region.id, error = %e, "stop_ranging_failed");
                }
            }
        }

        let (region_sessions, beacon_sessions) = self.sessions.stop_all(now);
        for session in region_sessions {
            self.analytics.send_region_session(session);
        }
        for session in beacon_sessions {
            self.analytics.send_beacon_session(session);
        }

        self.state.clear();
        self.enabled = false;
        self.dirty = true;
        info!(generation = %self.generation, "location_updates_disabled");
    }

    async fn reset(&mut self) {
        self.disable().await;
        self.commit();
        self.persister.clear();
        info!("state_reset");
    }

    /// Persist and publish the state if it changed
    pub(crate) fn commit(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.persister.save(&self.state);
        self.metrics.set_region_counts(self.state.region_count(), self.state.entered_region_count());
        let snapshot = StateSnapshot::capture(&self.state, self.enabled);
        self.snapshot_tx.send_replace(Arc::new(snapshot));
        debug_assert!(self.state.invariants_hold());
    }

    /// Most recent location known to the engine or the platform
    pub(crate) fn current_location(&self) -> Option<Location> {
        self.last_location.or_else(|| self.platform.last_known_location())
    }
}
