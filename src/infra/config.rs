//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. GEO_CONFIG environment variable
//! 3. Default: config/dev.toml
//!
//! `GEO_REGIONS_LIMIT` overrides `[monitoring] regions_limit` when set.

use crate::domain::session::MAX_SESSION_LOCATIONS;
use crate::services::policy::{
    effective_regions_limit, DEFAULT_REGIONS_LIMIT, DEFAULT_UPDATE_THRESHOLD_M,
    MAX_BEACONS_PER_REGION,
};
use crate::services::proximity::{DEFAULT_FAR_THRESHOLD_M, DEFAULT_NEAR_THRESHOLD_M};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const CONFIG_ENV: &str = "GEO_CONFIG";
pub const REGIONS_LIMIT_ENV: &str = "GEO_REGIONS_LIMIT";

/// Regions limit as written in the file: `10` or `"10"`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RegionsLimitValue {
    Number(i64),
    Text(String),
}

impl RegionsLimitValue {
    fn as_raw(&self) -> String {
        match self {
            RegionsLimitValue::Number(n) => n.to_string(),
            RegionsLimitValue::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub regions_limit: Option<RegionsLimitValue>,
    /// Displacement (metres) that triggers a new nearest-regions sync
    #[serde(default = "default_update_threshold")]
    pub location_update_threshold_m: f64,
    /// Synthesize an enter when a new circular fence already contains the device
    #[serde(default = "default_true")]
    pub initial_trigger: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            regions_limit: None,
            location_update_threshold_m: default_update_threshold(),
            initial_trigger: true,
        }
    }
}

fn default_update_threshold() -> f64 {
    DEFAULT_UPDATE_THRESHOLD_M
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_near_threshold")]
    pub near_threshold_m: f64,
    #[serde(default = "default_far_threshold")]
    pub far_threshold_m: f64,
    #[serde(default = "default_max_per_region")]
    pub max_per_region: usize,
}

impl Default for BeaconsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            near_threshold_m: default_near_threshold(),
            far_threshold_m: default_far_threshold(),
            max_per_region: default_max_per_region(),
        }
    }
}

fn default_near_threshold() -> f64 {
    DEFAULT_NEAR_THRESHOLD_M
}

fn default_far_threshold() -> f64 {
    DEFAULT_FAR_THRESHOLD_M
}

fn default_max_per_region() -> usize {
    MAX_BEACONS_PER_REGION
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_max_locations")]
    pub max_locations: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { max_locations: default_max_locations() }
    }
}

fn default_max_locations() -> usize {
    MAX_SESSION_LOCATIONS
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// JSON file holding the monitored state; in-memory when absent
    #[serde(default)]
    pub state_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_buffer")]
    pub command_buffer: usize,
    #[serde(default = "default_buffer")]
    pub analytics_buffer: usize,
    #[serde(default = "default_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_buffer: default_buffer(),
            analytics_buffer: default_buffer(),
            event_buffer: default_buffer(),
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

fn default_buffer() -> usize {
    256
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub beacons: BeaconsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Main configuration struct used throughout the engine
#[derive(Debug, Clone)]
pub struct Config {
    regions_limit: usize,
    location_update_threshold_m: f64,
    initial_trigger: bool,
    beacons_enabled: bool,
    near_threshold_m: f64,
    far_threshold_m: f64,
    max_beacons_per_region: usize,
    max_session_locations: usize,
    state_file: Option<String>,
    command_buffer: usize,
    analytics_buffer: usize,
    event_buffer: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regions_limit: DEFAULT_REGIONS_LIMIT,
            location_update_threshold_m: DEFAULT_UPDATE_THRESHOLD_M,
            initial_trigger: true,
            beacons_enabled: true,
            near_threshold_m: DEFAULT_NEAR_THRESHOLD_M,
            far_threshold_m: DEFAULT_FAR_THRESHOLD_M,
            max_beacons_per_region: MAX_BEACONS_PER_REGION,
            max_session_locations: MAX_SESSION_LOCATIONS,
            state_file: None,
            command_buffer: default_buffer(),
            analytics_buffer: default_buffer(),
            event_buffer: default_buffer(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var(CONFIG_ENV) {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", source))?;
        Ok(Self::from_toml(toml_config, source))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        let raw_limit = toml_config.monitoring.regions_limit.as_ref().map(RegionsLimitValue::as_raw);

        let mut threshold = toml_config.monitoring.location_update_threshold_m;
        if !threshold.is_finite() || threshold <= 0.0 {
            warn!(value = %threshold, default = DEFAULT_UPDATE_THRESHOLD_M, "update_threshold_invalid");
            threshold = DEFAULT_UPDATE_THRESHOLD_M;
        }

        Self {
            regions_limit: effective_regions_limit(raw_limit.as_deref()),
            location_update_threshold_m: threshold,
            initial_trigger: toml_config.monitoring.initial_trigger,
            beacons_enabled: toml_config.beacons.enabled,
            near_threshold_m: toml_config.beacons.near_threshold_m,
            far_threshold_m: toml_config.beacons.far_threshold_m,
            max_beacons_per_region: toml_config.beacons.max_per_region.max(1),
            max_session_locations: toml_config.sessions.max_locations.max(2),
            state_file: toml_config.storage.state_file,
            command_buffer: toml_config.engine.command_buffer.max(1),
            analytics_buffer: toml_config.engine.analytics_buffer.max(1),
            event_buffer: toml_config.engine.event_buffer.max(1),
            metrics_interval_secs: toml_config.engine.metrics_interval_secs,
            config_file: source.to_string(),
        }
    }

    /// Load a specific file, falling back to defaults, then apply env overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let config = match Self::from_file(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        };
        config.with_regions_limit_override(env::var(REGIONS_LIMIT_ENV).ok().as_deref())
    }

    /// Apply a raw regions limit override (e.g. from the environment)
    pub fn with_regions_limit_override(mut self, raw: Option<&str>) -> Self {
        if let Some(raw) = raw {
            self.regions_limit = effective_regions_limit(Some(raw));
        }
        self
    }

    pub fn regions_limit(&self) -> usize {
        self.regions_limit
    }

    pub fn location_update_threshold_m(&self) -> f64 {
        self.location_update_threshold_m
    }

    pub fn initial_trigger(&self) -> bool {
        self.initial_trigger
    }

    pub fn beacons_enabled(&self) -> bool {
        self.beacons_enabled
    }

    pub fn near_threshold_m(&self) -> f64 {
        self.near_threshold_m
    }

    pub fn far_threshold_m(&self) -> f64 {
        self.far_threshold_m
    }

    pub fn max_beacons_per_region(&self) -> usize {
        self.max_beacons_per_region
    }

    pub fn max_session_locations(&self) -> usize {
        self.max_session_locations
    }

    pub fn state_file(&self) -> Option<&str> {
        self.state_file.as_deref()
    }

    pub fn command_buffer(&self) -> usize {
        self.command_buffer
    }

    pub fn analytics_buffer(&self) -> usize {
        self.analytics_buffer
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for tests
    pub fn with_regions_limit(mut self, limit: usize) -> Self {
        self.regions_limit = limit;
        self
    }

    pub fn with_initial_trigger(mut self, enabled: bool) -> Self {
        self.initial_trigger = enabled;
        self
    }

    pub fn with_beacons_enabled(mut self, enabled: bool) -> Self {
        self.beacons_enabled = enabled;
        self
    }

    pub fn with_state_file(mut self, path: Option<String>) -> Self {
        self.state_file = path;
        self
    }
}
