//! Geo presence - region and beacon proximity engine replay driver
//!
//! Replays a JSON scenario (region catalogue, beacons, timed steps) against
//! the engine wired to simulated collaborators and prints every emitted
//! `GeoEvent` as one JSON line on stdout. Logs go to stderr.
//!
//! Module structure:
//! - `domain/` - Regions, beacons, locations, sessions, monitored state
//! - `io/` - Collaborator traits, analytics, events, storage, simulation
//! - `services/` - Engine, synchronizer, policy, proximity, sessions
//! - `infra/` - Config, Metrics, Clock

use clap::Parser;
use geo_presence::domain::{Beacon, Location, Region};
use geo_presence::infra::{Config, ManualClock, Metrics};
use geo_presence::io::{
    create_analytics_worker, create_event_channel, FileStore, GeoListener, KeyValueStore,
    MemoryStore, Scenario, SimulatedBackend, SimulatedBeaconMonitor, SimulatedPlatform, StepAction,
};
use geo_presence::services::{Collaborators, EngineHandle, GeoEngine};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Replay a proximity scenario and print engine events as JSON lines
#[derive(Parser, Debug)]
#[command(name = "geo-presence", version, about)]
struct Args {
    /// Scenario JSON file
    scenario: String,

    /// Path to TOML configuration file (falls back to GEO_CONFIG, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Pause after each step so spawned fetches can complete
    #[arg(long, default_value_t = 50)]
    step_delay_ms: u64,
}

/// Logs listener callbacks the way a host UI would receive them
struct LogListener;

impl GeoListener for LogListener {
    fn on_location_updated(&self, location: &Location) {
        debug!(lat = %location.lat, lon = %location.lon, "listener_location_updated");
    }

    fn on_region_entered(&self, region: &Region) {
        info!(region_id = %region.id, name = %region.name, "listener_region_entered");
    }

    fn on_region_exited(&self, region: &Region) {
        info!(region_id = %region.id, name = %region.name, "listener_region_exited");
    }

    fn on_beacon_entered(&self, beacon: &Beacon) {
        info!(beacon_id = %beacon.id, "listener_beacon_entered");
    }

    fn on_beacon_exited(&self, beacon: &Beacon) {
        info!(beacon_id = %beacon.id, "listener_beacon_exited");
    }

    fn on_beacons_ranged(&self, region: &Region, beacons: &[Beacon]) {
        debug!(region_id = %region.id, beacons = %beacons.len(), "listener_beacons_ranged");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "geo-presence starting");

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);
    info!(
        config_file = %config.config_file(),
        regions_limit = %config.regions_limit(),
        update_threshold_m = %config.location_update_threshold_m(),
        initial_trigger = %config.initial_trigger(),
        beacons_enabled = %config.beacons_enabled(),
        state_file = ?config.state_file(),
        "config_loaded"
    );

    let scenario = Scenario::from_file(&args.scenario)?;
    info!(
        scenario = %args.scenario,
        regions = %scenario.regions.len(),
        steps = %scenario.steps.len(),
        "scenario_loaded"
    );

    // Simulated collaborators
    let backend = Arc::new(SimulatedBackend::new(scenario.regions.clone()));
    for (region_id, beacons) in &scenario.beacons {
        backend.set_beacons(region_id, beacons.clone());
    }
    let platform = Arc::new(SimulatedPlatform::new(scenario.capabilities));
    let clock = Arc::new(ManualClock::new(scenario.start()));
    let store: Arc<dyn KeyValueStore> = match config.state_file() {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };

    let metrics = Arc::new(Metrics::new());

    // Listener dispatch and JSON-lines printer
    let (publisher, dispatcher, registry) = create_event_channel(config.event_buffer(), metrics.clone());
    registry.subscribe(Arc::new(LogListener));
    let mut events_rx = publisher.subscribe();
    let dispatcher_handle = tokio::spawn(dispatcher.run());
    let printer_handle = tokio::spawn(async move {
        let stdout = std::io::stdout();
        loop {
            match events_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => {
                        let mut out = stdout.lock();
                        let _ = writeln!(out, "{}", line);
                    }
                    Err(e) => warn!(error = %e, "event_serialize_failed"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = %n, "event_printer_lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Analytics worker posts to the simulated backend
    let (analytics, analytics_worker) =
        create_analytics_worker(backend.clone(), metrics.clone(), config.analytics_buffer());
    let analytics_handle = tokio::spawn(analytics_worker.run());

    let collaborators = Collaborators {
        service: backend.clone(),
        platform: platform.clone(),
        beacon_monitor: Some(Arc::new(SimulatedBeaconMonitor::new())),
        store,
        clock: clock.clone(),
    };

    let (command_tx, command_rx) = mpsc::channel(config.command_buffer());
    let handle = EngineHandle::new(command_tx);
    let mut engine = GeoEngine::new(config, collaborators, publisher, analytics, metrics.clone());
    let reader = engine.reader();
    let engine_handle = tokio::spawn(async move {
        engine.run(command_rx).await;
    });

    let step_delay = Duration::from_millis(args.step_delay_ms);
    for step in &scenario.steps {
        let at = scenario.time_of(step);
        clock.set(at);
        match &step.action {
            StepAction::Catalogue { regions } => {
                info!(at_secs = %step.at_secs, regions = %regions.len(), "catalogue_replaced");
                backend.set_catalogue(regions.clone());
            }
            StepAction::Capabilities { capabilities } => {
                info!(at_secs = %step.at_secs, capabilities = ?capabilities, "capabilities_changed");
                platform.set_capabilities(*capabilities);
            }
            action => {
                if let Some(command) = action.command(at) {
                    debug!(at_secs = %step.at_secs, command = %command.as_str(), "step");
                    handle.send(command).await?;
                }
            }
        }
        tokio::time::sleep(step_delay).await;
    }

    // Closing the command channel stops the engine, which drops the event
    // and analytics senders in turn
    drop(handle);
    engine_handle.await?;
    analytics_handle.await?;
    dispatcher_handle.await?;
    printer_handle.await?;

    let snapshot = reader.snapshot();
    info!(
        enabled = %snapshot.enabled,
        monitored = %snapshot.monitored_regions.len(),
        entered = %snapshot.entered_regions.len(),
        beacons = %snapshot.monitored_beacons.len(),
        fetches = %backend.fetch_count(),
        posted_sessions = %backend.posted_region_sessions().len(),
        "replay_complete"
    );
    metrics.report().log();

    info!("geo-presence shutdown complete");
    Ok(())
}
