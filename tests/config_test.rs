//! Integration tests for configuration loading

use std::io::Write;
use tempfile::NamedTempFile;
use visitor_counter::infra::Config;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[device]
id = "VAS-017"

[detection]
distance_cm = 25.0
timeout_ms = 2000
debounce_ms = 300

[transmission]
interval_ms = 0

[features]
lora = false
buzzer = false

[bridge]
device = "/dev/ttyACM1"
baud = 57600

[uplink]
host = "broker.local"
topic_prefix = "site-a"
username = "counter"
password = "secret"

[metrics]
interval_secs = 30
prometheus_port = 0
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.device_id(), "VAS-017");
    assert_eq!(config.detection_distance_cm(), 25.0);
    assert_eq!(config.detection_timeout_ms(), 2000);
    assert_eq!(config.debounce_ms(), 300);
    assert_eq!(config.transmission_interval_ms(), 0);
    assert!(!config.features().lora);
    assert!(config.features().leds);
    assert_eq!(config.bridge_device(), "/dev/ttyACM1");
    assert_eq!(config.bridge_baud(), 57600);
    assert_eq!(config.uplink_host(), "broker.local");
    assert_eq!(config.uplink_port(), 1883);
    assert_eq!(config.uplink_topic_prefix(), "site-a");
    assert_eq!(config.uplink_username(), Some("counter"));
    assert_eq!(config.metrics_interval_secs(), 30);
    assert_eq!(config.prometheus_port(), 0);

    // Feature toggles flow into the component settings
    assert!(!config.feedback_settings().buzzer_enabled);
    assert!(!config.telemetry_settings().enabled);
    assert_eq!(config.telemetry_settings().device_id, "VAS-017");
    assert_eq!(config.detector_settings().debounce_ms, 300);
}

#[test]
fn test_repo_dev_config_matches_defaults() {
    let config = Config::from_file("config/dev.toml").unwrap();
    let defaults = Config::default();

    assert_eq!(config.device_id(), defaults.device_id());
    assert_eq!(config.detector_settings(), defaults.detector_settings());
    assert_eq!(config.feedback_settings(), defaults.feedback_settings());
    assert_eq!(config.sensor_limits(), defaults.sensor_limits());
    assert_eq!(config.lora().sync_word, 0x12);
    assert_eq!(config.pins().led_status, defaults.pins().led_status);
}

#[test]
fn test_invalid_values_rejected() {
    let temp_file = write_config(
        r#"
[lora]
spreading_factor = 13
"#,
    );

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("spreading factor 13"));
}

#[test]
fn test_detection_outside_sensor_range_rejected() {
    let temp_file = write_config(
        r#"
[detection]
distance_cm = 500.0
"#,
    );

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_unparseable_file_is_error() {
    let temp_file = write_config("[device\nid = ");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.device_id(), "VAS-001");
    assert_eq!(config.transmission_interval_ms(), 5000);
    assert_eq!(config.uplink_host(), "localhost");
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_resolve_config_path_from_args() {
    let args = vec!["visitor-counter".to_string(), "--config".to_string(), "a.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "a.toml");

    let args = vec!["visitor-counter".to_string(), "--config=b.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "b.toml");
}
