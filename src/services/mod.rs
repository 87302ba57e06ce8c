//! Services - proximity engine and its building blocks
//!
//! This module contains the engine and the logic it composes:
//! - `engine` - single-writer `GeoEngine`, its command handle and state reader
//! - `synchronizer` - differential reconciliation with the nearest-regions list
//! - `policy` - sync trigger and regions limit rules
//! - `proximity` - beacon distance to proximity tier classification
//! - `sessions` - region and beacon dwell session tracking

pub mod engine;
pub mod policy;
pub mod proximity;
pub mod sessions;
pub mod synchronizer;

// Re-export commonly used types
pub use engine::{
    Collaborators, EngineCommand, EngineHandle, GeoEngine, StateReader, StateSnapshot,
};
pub use proximity::ProximityClassifier;
pub use sessions::SessionTracker;
pub use synchronizer::{plan_sync, SyncPlan};
