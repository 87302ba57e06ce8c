//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for every recording operation so the engine worker, the sync
//! tasks and the analytics worker never contend on a mutex. Reporting is the
//! only operation that resets anything (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not drive engine decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Sync duration bucket boundaries (milliseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const SYNC_BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Upper bounds used for percentiles (last bucket uses 2x the previous bound)
const SYNC_BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
    [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

#[inline]
fn bucket_index(duration_ms: u64) -> usize {
    SYNC_BUCKET_BOUNDS.partition_point(|&bound| bound < duration_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return SYNC_BUCKET_UPPER_BOUNDS[i];
        }
    }
    SYNC_BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Location updates accepted into the engine (monotonic)
    locations_accepted: AtomicU64,
    /// Location updates discarded as malformed (monotonic)
    locations_rejected: AtomicU64,
    region_enters: AtomicU64,
    region_exits: AtomicU64,
    beacon_enters: AtomicU64,
    beacon_exits: AtomicU64,
    /// Differential syncs applied to the store (monotonic)
    syncs_completed: AtomicU64,
    /// Syncs whose fetch failed, store left untouched (monotonic)
    syncs_failed: AtomicU64,
    /// Sync requests folded into an in-flight sync (monotonic)
    syncs_coalesced: AtomicU64,
    /// Syncs skipped for missing capability (monotonic)
    syncs_skipped: AtomicU64,
    /// Sync results discarded after disable/reset (monotonic)
    syncs_discarded: AtomicU64,
    /// Transition callbacks for ids no longer monitored (monotonic)
    stale_callbacks: AtomicU64,
    /// Ranging readings rejected for invalid distance (monotonic)
    ranging_rejected: AtomicU64,
    /// Listener events dropped due to channel full (monotonic)
    events_dropped: AtomicU64,
    /// Analytics messages dropped due to channel full (monotonic)
    analytics_dropped: AtomicU64,
    /// Analytics posts that failed (monotonic)
    analytics_failed: AtomicU64,
    /// Sync duration histogram (reset on report)
    sync_buckets: [AtomicU64; NUM_BUCKETS],
    sync_duration_sum_ms: AtomicU64,
    sync_duration_max_ms: AtomicU64,
    /// Monitored region gauge (set by the engine after each mutation)
    monitored_regions: AtomicU64,
    /// Entered region gauge
    entered_regions: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            locations_accepted: AtomicU64::new(0),
            locations_rejected: AtomicU64::new(0),
            region_enters: AtomicU64::new(0),
            region_exits: AtomicU64::new(0),
            beacon_enters: AtomicU64::new(0),
            beacon_exits: AtomicU64::new(0),
            syncs_completed: AtomicU64::new(0),
            syncs_failed: AtomicU64::new(0),
            syncs_coalesced: AtomicU64::new(0),
            syncs_skipped: AtomicU64::new(0),
            syncs_discarded: AtomicU64::new(0),
            stale_callbacks: AtomicU64::new(0),
            ranging_rejected: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            analytics_dropped: AtomicU64::new(0),
            analytics_failed: AtomicU64::new(0),
            sync_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sync_duration_sum_ms: AtomicU64::new(0),
            sync_duration_max_ms: AtomicU64::new(0),
            monitored_regions: AtomicU64::new(0),
            entered_regions: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_location(&self, accepted: bool) {
        if accepted {
            self.locations_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.locations_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_region_enter(&self) {
        self.region_enters.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_region_exit(&self) {
        self.region_exits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_beacon_enter(&self) {
        self.beacon_enters.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_beacon_exit(&self) {
        self.beacon_exits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an applied sync and its fetch-to-apply duration
    #[inline]
    pub fn record_sync_completed(&self, duration_ms: u64) {
        self.syncs_completed.fetch_add(1, Ordering::Relaxed);
        self.sync_duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.sync_buckets[bucket_index(duration_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.sync_duration_max_ms, duration_ms);
    }

    #[inline]
    pub fn record_sync_failed(&self) {
        self.syncs_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sync_coalesced(&self) {
        self.syncs_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sync_skipped(&self) {
        self.syncs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sync_discarded(&self) {
        self.syncs_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_callback(&self) {
        self.stale_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ranging_rejected(&self, count: u64) {
        self.ranging_rejected.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analytics_dropped(&self) {
        self.analytics_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analytics_failed(&self) {
        self.analytics_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the monitored/entered region gauges
    #[inline]
    pub fn set_region_counts(&self, monitored: usize, entered: usize) {
        self.monitored_regions.store(monitored as u64, Ordering::Relaxed);
        self.entered_regions.store(entered as u64, Ordering::Relaxed);
    }

    /// Calculate and return a summary, then reset the sync duration histogram
    pub fn report(&self) -> MetricsSummary {
        let sync_buckets = swap_buckets(&self.sync_buckets);
        let sync_sum = self.sync_duration_sum_ms.swap(0, Ordering::Relaxed);
        let sync_max = self.sync_duration_max_ms.swap(0, Ordering::Relaxed);
        let syncs_in_period: u64 = sync_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        MetricsSummary {
            period_secs: elapsed.as_secs_f64(),
            locations_accepted: self.locations_accepted.load(Ordering::Relaxed),
            locations_rejected: self.locations_rejected.load(Ordering::Relaxed),
            region_enters: self.region_enters.load(Ordering::Relaxed),
            region_exits: self.region_exits.load(Ordering::Relaxed),
            beacon_enters: self.beacon_enters.load(Ordering::Relaxed),
            beacon_exits: self.beacon_exits.load(Ordering::Relaxed),
            syncs_completed: self.syncs_completed.load(Ordering::Relaxed),
            syncs_failed: self.syncs_failed.load(Ordering::Relaxed),
            syncs_coalesced: self.syncs_coalesced.load(Ordering::Relaxed),
            syncs_skipped: self.syncs_skipped.load(Ordering::Relaxed),
            syncs_discarded: self.syncs_discarded.load(Ordering::Relaxed),
            stale_callbacks: self.stale_callbacks.load(Ordering::Relaxed),
            ranging_rejected: self.ranging_rejected.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            analytics_dropped: self.analytics_dropped.load(Ordering::Relaxed),
            analytics_failed: self.analytics_failed.load(Ordering::Relaxed),
            sync_buckets,
            sync_avg_ms: if syncs_in_period > 0 { sync_sum / syncs_in_period } else { 0 },
            sync_max_ms: sync_max,
            sync_p99_ms: percentile_from_buckets(&sync_buckets, 0.99),
            monitored_regions: self.monitored_regions.load(Ordering::Relaxed),
            entered_regions: self.entered_regions.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    /// Seconds since the previous report
    pub period_secs: f64,
    pub locations_accepted: u64,
    pub locations_rejected: u64,
    pub region_enters: u64,
    pub region_exits: u64,
    pub beacon_enters: u64,
    pub beacon_exits: u64,
    pub syncs_completed: u64,
    pub syncs_failed: u64,
    pub syncs_coalesced: u64,
    pub syncs_skipped: u64,
    pub syncs_discarded: u64,
    pub stale_callbacks: u64,
    pub ranging_rejected: u64,
    pub events_dropped: u64,
    pub analytics_dropped: u64,
    pub analytics_failed: u64,
    /// Sync duration histogram for this period
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 ms
    pub sync_buckets: [u64; NUM_BUCKETS],
    pub sync_avg_ms: u64,
    pub sync_max_ms: u64,
    pub sync_p99_ms: u64,
    pub monitored_regions: u64,
    pub entered_regions: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            locations = %self.locations_accepted,
            rejected = %self.locations_rejected,
            monitored = %self.monitored_regions,
            entered = %self.entered_regions,
            region_enters = %self.region_enters,
            region_exits = %self.region_exits,
            beacon_enters = %self.beacon_enters,
            beacon_exits = %self.beacon_exits,
            syncs = %self.syncs_completed,
            sync_failed = %self.syncs_failed,
            sync_coalesced = %self.syncs_coalesced,
            sync_p99_ms = %self.sync_p99_ms,
            stale = %self.stale_callbacks,
            dropped = %(self.events_dropped + self.analytics_dropped),
            "metrics"
        );
    }
}
