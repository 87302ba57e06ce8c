//! Engine events for listeners and broadcast observers
//!
//! Every state change the engine wants the host to see goes through
//! `EventPublisher::publish`, which fans out to:
//! - a `tokio::sync::broadcast` channel (out-of-process style observers)
//! - a bounded mpsc channel drained by `ListenerDispatcher` on the host's
//!   UI-equivalent task, which invokes registered `GeoListener`s
//!
//! Listeners are held in an explicit registry; they stay registered until the
//! host calls `unsubscribe` with the id returned by `subscribe`.

use crate::domain::types::{Beacon, Location, Region};
use crate::infra::metrics::Metrics;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Event emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum GeoEvent {
    LocationUpdated { location: Location },
    RegionEntered { region: Region },
    RegionExited { region: Region },
    BeaconEntered { beacon: Beacon },
    BeaconExited { beacon: Beacon },
    BeaconsRanged { region: Region, beacons: Vec<Beacon> },
}

impl GeoEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoEvent::LocationUpdated { .. } => "location_updated",
            GeoEvent::RegionEntered { .. } => "region_entered",
            GeoEvent::RegionExited { .. } => "region_exited",
            GeoEvent::BeaconEntered { .. } => "beacon_entered",
            GeoEvent::BeaconExited { .. } => "beacon_exited",
            GeoEvent::BeaconsRanged { .. } => "beacons_ranged",
        }
    }
}

/// Host callbacks; every method defaults to a no-op
pub trait GeoListener: Send + Sync {
    fn on_location_updated(&self, _location: &Location) {}
    fn on_region_entered(&self, _region: &Region) {}
    fn on_region_exited(&self, _region: &Region) {}
    fn on_beacon_entered(&self, _beacon: &Beacon) {}
    fn on_beacon_exited(&self, _beacon: &Beacon) {}
    fn on_beacons_ranged(&self, _region: &Region, _beacons: &[Beacon]) {}
}

/// Handle returned by `ListenerRegistry::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Explicit subscribe/unsubscribe registry owned by the host
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<RwLock<Vec<(ListenerId, Arc<dyn GeoListener>)>>>,
    next_id: Arc<AtomicU64>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn GeoListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        debug!(listener_id = %id.0, "listener_subscribed");
        id
    }

    /// Remove a listener; false if the id was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        let removed = listeners.len() != before;
        debug!(listener_id = %id.0, removed = %removed, "listener_unsubscribed");
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke every registered listener for one event
    pub fn dispatch(&self, event: &GeoEvent) {
        // Snapshot so listeners may (un)subscribe from inside a callback
        let listeners: Vec<Arc<dyn GeoListener>> =
            self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();

        for listener in listeners {
            match event {
                GeoEvent::LocationUpdated { location } => listener.on_location_updated(location),
                GeoEvent::RegionEntered { region } => listener.on_region_entered(region),
                GeoEvent::RegionExited { region } => listener.on_region_exited(region),
                GeoEvent::BeaconEntered { beacon } => listener.on_beacon_entered(beacon),
                GeoEvent::BeaconExited { beacon } => listener.on_beacon_exited(beacon),
                GeoEvent::BeaconsRanged { region, beacons } => {
                    listener.on_beacons_ranged(region, beacons)
                }
            }
        }
    }
}

/// Producer side used by the engine worker
///
/// Non-blocking: a full listener queue drops the event for listeners (the
/// broadcast side still receives it).
#[derive(Clone)]
pub struct EventPublisher {
    broadcast_tx: broadcast::Sender<GeoEvent>,
    listener_tx: mpsc::Sender<GeoEvent>,
    metrics: Arc<Metrics>,
}

impl EventPublisher {
    pub fn publish(&self, event: GeoEvent) {
        debug!(event = %event.as_str(), "geo_event");
        // No broadcast receivers is not an error
        let _ = self.broadcast_tx.send(event.clone());
        if let Err(e) = self.listener_tx.try_send(event) {
            self.metrics.record_event_dropped();
            warn!(error = %e, "listener_queue_full");
        }
    }

    /// Subscribe to the broadcast equivalent of listener callbacks
    pub fn subscribe(&self) -> broadcast::Receiver<GeoEvent> {
        self.broadcast_tx.subscribe()
    }
}

/// Drains published events and invokes listeners on the task that runs it
pub struct ListenerDispatcher {
    registry: ListenerRegistry,
    rx: mpsc::Receiver<GeoEvent>,
}

impl ListenerDispatcher {
    /// Run until every `EventPublisher` clone is dropped
    pub async fn run(mut self) {
        info!("listener_dispatcher_started");
        while let Some(event) = self.rx.recv().await {
            self.registry.dispatch(&event);
        }
        info!("listener_dispatcher_stopped");
    }

    /// Dispatch everything currently queued without waiting
    pub fn dispatch_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.registry.dispatch(&event);
            count += 1;
        }
        count
    }
}

/// Create the publisher, its dispatcher and the listener registry
pub fn create_event_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (EventPublisher, ListenerDispatcher, ListenerRegistry) {
    let (broadcast_tx, _) = broadcast::channel(buffer_size);
    let (listener_tx, rx) = mpsc::channel(buffer_size);
    let registry = ListenerRegistry::new();
    let publisher = EventPublisher { broadcast_tx, listener_tx, metrics };
    let dispatcher = ListenerDispatcher { registry: registry.clone(), rx };
    (publisher, dispatcher, registry)
}
