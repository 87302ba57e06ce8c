//! Monitoring policy gates: regions limit and sync trigger

use crate::domain::geometry::haversine_m;
use crate::domain::types::{Capabilities, Location};
use tracing::warn;

/// Regions monitored when nothing is configured
pub const DEFAULT_REGIONS_LIMIT: usize = 10;
/// Hard cap on concurrently registered OS fences
pub const MAX_REGIONS_LIMIT: usize = 100;
/// Beacons fetched per region
pub const MAX_BEACONS_PER_REGION: usize = 50;
/// Displacement that triggers a new nearest-regions sync
pub const DEFAULT_UPDATE_THRESHOLD_M: f64 = 100.0;

/// Resolve the configured regions limit
///
/// - unset: default
/// - `<= 0` or unparsable: default, with a warning
/// - above the OS cap: the cap, with a warning
pub fn effective_regions_limit(configured: Option<&str>) -> usize {
    let Some(raw) = configured else {
        return DEFAULT_REGIONS_LIMIT;
    };

    let value = match raw.trim().parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            warn!(value = %raw, default = DEFAULT_REGIONS_LIMIT, "regions_limit_unparsable");
            return DEFAULT_REGIONS_LIMIT;
        }
    };

    if value <= 0 {
        warn!(value = %value, default = DEFAULT_REGIONS_LIMIT, "regions_limit_not_positive");
        return DEFAULT_REGIONS_LIMIT;
    }

    let value = value as u64;
    if value > MAX_REGIONS_LIMIT as u64 {
        warn!(value = %value, cap = MAX_REGIONS_LIMIT, "regions_limit_clamped");
        return MAX_REGIONS_LIMIT;
    }

    value as usize
}

/// Decide whether an accepted location should trigger a nearest-regions sync
///
/// True when:
/// 1. no sync has happened yet (`last_sync_origin` is None), or
/// 2. the device moved at least `threshold_m` since the last sync origin, or
/// 3. monitoring is possible but nothing is monitored (e.g. the capability
///    was granted after the last sync ran while gated).
pub fn should_sync(
    last_sync_origin: Option<&Location>,
    location: &Location,
    threshold_m: f64,
    capabilities: Capabilities,
    monitored_regions: usize,
) -> bool {
    let Some(origin) = last_sync_origin else {
        return true;
    };

    if haversine_m(origin.coordinate(), location.coordinate()) >= threshold_m {
        return true;
    }

    capabilities.can_monitor_regions() && monitored_regions == 0
}
