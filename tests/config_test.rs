//! Integration tests for configuration loading

use geo_presence::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[monitoring]
regions_limit = "25"
location_update_threshold_m = 250.0
initial_trigger = false

[beacons]
enabled = false
near_threshold_m = 1.0
far_threshold_m = 5.0
max_per_region = 20

[sessions]
max_locations = 50

[storage]
state_file = "/tmp/geo_state.json"

[engine]
command_buffer = 64
analytics_buffer = 32
event_buffer = 128
metrics_interval_secs = 30
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.regions_limit(), 25);
    assert_eq!(config.location_update_threshold_m(), 250.0);
    assert!(!config.initial_trigger());
    assert!(!config.beacons_enabled());
    assert_eq!(config.near_threshold_m(), 1.0);
    assert_eq!(config.far_threshold_m(), 5.0);
    assert_eq!(config.max_beacons_per_region(), 20);
    assert_eq!(config.max_session_locations(), 50);
    assert_eq!(config.state_file(), Some("/tmp/geo_state.json"));
    assert_eq!(config.command_buffer(), 64);
    assert_eq!(config.analytics_buffer(), 32);
    assert_eq!(config.event_buffer(), 128);
    assert_eq!(config.metrics_interval_secs(), 30);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_regions_limit_clamped_from_file() {
    for (raw, expected) in [("0", 10), ("-5", 10), ("500", 100), ("\"abc\"", 10), ("\"7\"", 7)] {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "[monitoring]\nregions_limit = {}\n", raw).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.regions_limit(), expected, "regions_limit = {}", raw);
    }
}

#[test]
fn test_partial_file_keeps_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "[beacons]\nmax_per_region = 5\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.max_beacons_per_region(), 5);
    assert_eq!(config.regions_limit(), 10);
    assert_eq!(config.location_update_threshold_m(), 100.0);
    assert!(config.initial_trigger());
    assert_eq!(config.max_session_locations(), 100);
    assert_eq!(config.state_file(), None);
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "[monitoring\nregions_limit = 3").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.location_update_threshold_m(), 100.0);
    assert_eq!(config.near_threshold_m(), 0.5);
    assert_eq!(config.far_threshold_m(), 3.0);
    assert!(config.beacons_enabled());
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.regions_limit(), 10);
    assert_eq!(config.state_file(), None);
}
