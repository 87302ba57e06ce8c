//! Best-effort analytics posts, processed off the engine worker
//!
//! Trigger events and closed sessions are enqueued with `try_send` so the
//! engine never waits on the network. The worker posts them through the
//! `RegionService` and only logs failures: a lost post never reverts a local
//! transition.

use crate::domain::session::{BeaconSession, RegionSession};
use crate::infra::metrics::Metrics;
use crate::io::platform::{RegionService, TriggerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Message for the analytics worker
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsMessage {
    Trigger(TriggerEvent),
    RegionSession(RegionSession),
    BeaconSession(BeaconSession),
}

/// Sender handle for analytics messages
///
/// Clone this to share across producers. Non-blocking - if the channel is
/// full, messages are dropped and counted.
#[derive(Clone)]
pub struct AnalyticsSender {
    tx: mpsc::Sender<AnalyticsMessage>,
    metrics: Arc<Metrics>,
}

impl AnalyticsSender {
    pub fn new(tx: mpsc::Sender<AnalyticsMessage>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    pub fn send_trigger(&self, event: TriggerEvent) {
        self.send(AnalyticsMessage::Trigger(event));
    }

    pub fn send_region_session(&self, session: RegionSession) {
        self.send(AnalyticsMessage::RegionSession(session));
    }

    pub fn send_beacon_session(&self, session: BeaconSession) {
        self.send(AnalyticsMessage::BeaconSession(session));
    }

    fn send(&self, message: AnalyticsMessage) {
        if let Err(e) = self.tx.try_send(message) {
            self.metrics.record_analytics_dropped();
            warn!(error = %e, "analytics_queue_full");
        }
    }
}

/// Worker that posts analytics messages
pub struct AnalyticsWorker {
    service: Arc<dyn RegionService>,
    rx: mpsc::Receiver<AnalyticsMessage>,
    metrics: Arc<Metrics>,
}

impl AnalyticsWorker {
    pub fn new(
        service: Arc<dyn RegionService>,
        rx: mpsc::Receiver<AnalyticsMessage>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { service, rx, metrics }
    }

    /// Run the worker, posting messages until the channel closes
    pub async fn run(mut self) {
        info!("analytics_worker_started");
        while let Some(message) = self.rx.recv().await {
            self.post(message).await;
        }
        info!("analytics_worker_stopped");
    }

    async fn post(&self, message: AnalyticsMessage) {
        let result = match &message {
            AnalyticsMessage::Trigger(event) => self.service.post_event(event).await,
            AnalyticsMessage::RegionSession(session) => self.service.post_region_session(session).await,
            AnalyticsMessage::BeaconSession(session) => self.service.post_beacon_session(session).await,
        };

        match (result, &message) {
            (Ok(()), AnalyticsMessage::Trigger(event)) => {
                debug!(kind = %event.kind.as_str(), "trigger_posted");
            }
            (Ok(()), AnalyticsMessage::RegionSession(session)) => {
                debug!(region_id = %session.region_id, points = %session.locations.len(), "region_session_posted");
            }
            (Ok(()), AnalyticsMessage::BeaconSession(session)) => {
                debug!(region_id = %session.region_id, samples = %session.beacons.len(), "beacon_session_posted");
            }
            (Err(e), AnalyticsMessage::Trigger(event)) => {
                self.metrics.record_analytics_failed();
                warn!(
                    kind = %event.kind.as_str(),
                    region_id = ?event.region_id,
                    beacon_id = ?event.beacon_id,
                    error = %e,
                    "trigger_post_failed"
                );
            }
            (Err(e), AnalyticsMessage::RegionSession(session)) => {
                self.metrics.record_analytics_failed();
                warn!(region_id = %session.region_id, session_id = %session.id, error = %e, "region_session_post_failed");
            }
            (Err(e), AnalyticsMessage::BeaconSession(session)) => {
                self.metrics.record_analytics_failed();
                warn!(region_id = %session.region_id, session_id = %session.id, error = %e, "beacon_session_post_failed");
            }
        }
    }
}

/// Create an analytics channel and worker
///
/// Returns the sender (for the engine) and the worker (to be spawned)
pub fn create_analytics_worker(
    service: Arc<dyn RegionService>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (AnalyticsSender, AnalyticsWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let sender = AnalyticsSender::new(tx, metrics.clone());
    let worker = AnalyticsWorker::new(service, rx, metrics);
    (sender, worker)
}
