//! IO modules - host and network interfaces
//!
//! This module contains every boundary the engine talks across:
//! - `platform` - traits for the region service, OS geofencing and beacon ranging
//! - `analytics` - best-effort trigger and session posting worker
//! - `events` - listener registry and broadcast of engine events
//! - `storage` - key/value persistence of the monitored state
//! - `scenario` - JSON replay scenarios for the simulation driver
//! - `simulated` - in-process collaborators for replay and tests

pub mod analytics;
pub mod events;
pub mod platform;
pub mod scenario;
pub mod simulated;
pub mod storage;

// Re-export commonly used types
pub use analytics::{create_analytics_worker, AnalyticsMessage, AnalyticsSender, AnalyticsWorker};
pub use events::{
    create_event_channel, EventPublisher, GeoEvent, GeoListener, ListenerDispatcher, ListenerId,
    ListenerRegistry,
};
pub use platform::{BeaconMonitor, GeofencePlatform, RegionService, TriggerEvent, TriggerKind};
pub use scenario::{Scenario, Step, StepAction};
pub use simulated::{SimulatedBackend, SimulatedBeaconMonitor, SimulatedPlatform};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StatePersister};
