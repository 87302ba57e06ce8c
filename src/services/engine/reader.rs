//! Lock-free read access to the monitored state
//!
//! The engine publishes an immutable snapshot after every committed mutation.
//! Readers never block the engine and may observe a slightly stale view.

use crate::domain::state::MonitoredState;
use crate::domain::types::{Beacon, Region};
use std::sync::Arc;
use tokio::sync::watch;

/// Immutable view of the monitored state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub enabled: bool,
    pub monitored_regions: Vec<Region>,
    pub entered_regions: Vec<Region>,
    pub monitored_beacons: Vec<Beacon>,
    pub entered_beacons: Vec<Beacon>,
}

impl StateSnapshot {
    pub fn capture(state: &MonitoredState, enabled: bool) -> Self {
        Self {
            enabled,
            monitored_regions: state.regions().into_iter().cloned().collect(),
            entered_regions: state.entered_regions().into_iter().cloned().collect(),
            monitored_beacons: state.beacons().to_vec(),
            entered_beacons: state.entered_beacons().into_iter().cloned().collect(),
        }
    }
}

/// Cloneable reader handed to UI-facing code
#[derive(Clone)]
pub struct StateReader {
    rx: watch::Receiver<Arc<StateSnapshot>>,
}

impl StateReader {
    pub(crate) fn new(rx: watch::Receiver<Arc<StateSnapshot>>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn monitored_regions(&self) -> Vec<Region> {
        self.rx.borrow().monitored_regions.clone()
    }

    pub fn entered_regions(&self) -> Vec<Region> {
        self.rx.borrow().entered_regions.clone()
    }

    pub fn monitored_beacons(&self) -> Vec<Beacon> {
        self.rx.borrow().monitored_beacons.clone()
    }

    pub fn entered_beacons(&self) -> Vec<Beacon> {
        self.rx.borrow().entered_beacons.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.rx.borrow().enabled
    }

    /// Wait for the next published snapshot; false once the engine is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
