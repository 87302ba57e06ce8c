//! Replay scenarios for the simulation driver
//!
//! A scenario is a JSON document with the server-side region catalogue, the
//! beacons of each beacon region and a list of timed steps. Steps carry an
//! offset in seconds from the scenario start, which drives the engine clock.
//!
//! ```json
//! {
//!   "regions": [{ "id": "A", "name": "Store", "major": 7,
//!                 "geometry": { "type": "circle", "center": { "lat": 0.0, "lon": 0.0 }, "radius_m": 50.0 },
//!                 "distance": 50.0 }],
//!   "beacons": { "A": [{ "id": "b1", "name": "Till", "major": 7, "minor": 1 }] },
//!   "steps": [
//!     { "at_secs": 0, "action": "enable" },
//!     { "at_secs": 1, "action": "location", "lat": 0.0, "lon": 0.0 }
//!   ]
//! }
//! ```

use crate::domain::types::{
    Beacon, BeaconId, BeaconSignal, Capabilities, Location, RangingReading, Region, RegionId,
    Transition,
};
use crate::services::engine::EngineCommand;
use anyhow::Context;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Scenario start; defaults to the Unix epoch so replays are reproducible
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default = "Capabilities::full")]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub beacons: FxHashMap<RegionId, Vec<Beacon>>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub at_secs: i64,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Enable,
    Disable,
    Reset,
    Location {
        lat: f64,
        lon: f64,
    },
    Fence {
        transition: Transition,
        region_ids: Vec<RegionId>,
    },
    Beacon {
        transition: Transition,
        unique_id: BeaconId,
        major: u16,
        #[serde(default)]
        minor: Option<u16>,
    },
    Ranged {
        region_id: RegionId,
        readings: Vec<RangingReading>,
    },
    /// Replace the server catalogue from this point on
    Catalogue {
        regions: Vec<Region>,
    },
    /// Change granted capabilities from this point on
    Capabilities {
        capabilities: Capabilities,
    },
}

impl Scenario {
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let mut scenario: Scenario = serde_json::from_str(content)?;
        scenario.steps.sort_by_key(|s| s.at_secs);
        Ok(scenario)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start.unwrap_or_default()
    }

    /// Wall-clock time of a step
    pub fn time_of(&self, step: &Step) -> DateTime<Utc> {
        self.start() + chrono::Duration::seconds(step.at_secs)
    }
}

impl StepAction {
    /// Engine command for this step, if it is one
    ///
    /// Catalogue and capability changes act on the simulated collaborators
    /// and have no command.
    pub fn command(&self, at: DateTime<Utc>) -> Option<EngineCommand> {
        let command = match self {
            StepAction::Enable => EngineCommand::Enable,
            StepAction::Disable => EngineCommand::Disable,
            StepAction::Reset => EngineCommand::Reset,
            StepAction::Location { lat, lon } => {
                EngineCommand::LocationUpdated(Location::new(*lat, *lon, at))
            }
            StepAction::Fence { transition, region_ids } => EngineCommand::FenceTransition {
                transition: *transition,
                region_ids: region_ids.clone(),
            },
            StepAction::Beacon { transition, unique_id, major, minor } => {
                EngineCommand::BeaconTransition {
                    transition: *transition,
                    signal: BeaconSignal { unique_id: unique_id.clone(), major: *major, minor: *minor },
                }
            }
            StepAction::Ranged { region_id, readings } => EngineCommand::BeaconsRanged {
                region_id: region_id.clone(),
                readings: readings.clone(),
            },
            StepAction::Catalogue { .. } | StepAction::Capabilities { .. } => return None,
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::RegionGeometry;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCENARIO: &str = r#"{
        "regions": [
            { "id": "A", "name": "Store", "major": 7,
              "geometry": { "type": "circle", "center": { "lat": 0.0, "lon": 0.0 }, "radius_m": 50.0 },
              "distance": 50.0 },
            { "id": "P", "name": "Park",
              "geometry": { "type": "polygon", "vertices": [
                  { "lat": 0.0, "lon": 0.0 }, { "lat": 0.0, "lon": 0.01 }, { "lat": 0.01, "lon": 0.0 } ] },
              "distance": 0.0 }
        ],
        "beacons": { "A": [{ "id": "b1", "name": "Till", "major": 7, "minor": 1, "proximity": "unknown" }] },
        "steps": [
            { "at_secs": 5, "action": "location", "lat": 0.0, "lon": 0.0 },
            { "at_secs": 0, "action": "enable" },
            { "at_secs": 6, "action": "fence", "transition": "exit", "region_ids": ["A"] },
            { "at_secs": 7, "action": "ranged", "region_id": "A",
              "readings": [{ "major": 7, "minor": 1, "distance_m": 0.4 }, { "major": 7, "minor": 2 }] },
            { "at_secs": 8, "action": "catalogue", "regions": [] }
        ]
    }"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();

        assert_eq!(scenario.regions.len(), 2);
        assert!(matches!(scenario.regions[1].geometry, RegionGeometry::Polygon { .. }));
        assert_eq!(scenario.beacons[&RegionId::from("A")].len(), 1);
        assert_eq!(scenario.capabilities, Capabilities::full());

        // Sorted by offset
        assert_eq!(scenario.steps[0].action, StepAction::Enable);
        assert_eq!(scenario.steps[1].at_secs, 5);
    }

    #[test]
    fn test_step_commands() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let at = scenario.time_of(&scenario.steps[1]);
        assert_eq!(at.timestamp(), 5);

        match scenario.steps[1].action.command(at) {
            Some(EngineCommand::LocationUpdated(location)) => {
                assert_eq!(location.timestamp, at);
            }
            other => panic!("unexpected command {other:?}"),
        }

        match scenario.steps[3].action.command(at) {
            Some(EngineCommand::BeaconsRanged { readings, .. }) => {
                assert_eq!(readings[1].distance_m, None);
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert_eq!(scenario.steps[4].action.command(at), None);
    }

    #[test]
    fn test_from_file_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = Scenario::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse scenario"));
    }
}
