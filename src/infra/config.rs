//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every field defaults to the stock device configuration, so a partial
//! file only needs the values that differ.

use crate::domain::types::SensorLimits;
use crate::services::crossing_detector::DetectorSettings;
use crate::services::feedback::FeedbackSettings;
use crate::services::telemetry::TelemetrySettings;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Bandwidths the SX127x radio accepts (Hz)
const LORA_BANDWIDTHS_HZ: [u32; 10] =
    [7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("device id must not be empty")]
    EmptyDeviceId,
    #[error("min valid distance {min} cm must be below max valid distance {max} cm")]
    InvalidRange { min: f64, max: f64 },
    #[error("detection distance {distance} cm is outside the valid range {min}..{max} cm")]
    DetectionOutOfRange { distance: f64, min: f64, max: f64 },
    #[error("detection timeout must be greater than zero")]
    ZeroDetectionTimeout,
    #[error("control poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("lora tx power {0} dBm outside 5..=20")]
    TxPower(u8),
    #[error("lora spreading factor {0} outside 7..=12")]
    SpreadingFactor(u8),
    #[error("lora coding rate 4/{0} outside 4/5..=4/8")]
    CodingRate(u8),
    #[error("lora bandwidth {0} Hz is not a supported value")]
    Bandwidth(u32),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Identifier reported in every payload (change per device)
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { id: "VAS-001".to_string() }
    }
}

/// Pin assignments on the sensor bridge
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinsConfig {
    pub trig_1: u8,
    pub echo_1: u8,
    pub trig_2: u8,
    pub echo_2: u8,
    pub buzzer: u8,
    pub button: u8,
    pub lora_nss: u8,
    pub lora_reset: u8,
    pub led_entry: u8,
    pub led_exit: u8,
    pub led_status: u8,
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            trig_1: 3,
            echo_1: 4,
            trig_2: 5,
            echo_2: 6,
            buzzer: 8,
            button: 7,
            lora_nss: 10,
            lora_reset: 9,
            led_entry: 2,
            // A0 / A1 on an Uno-class board
            led_exit: 14,
            led_status: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Objects closer than this trigger the sensor (cm)
    pub distance_cm: f64,
    /// Maximum wait for the second sensor (ms)
    pub timeout_ms: u64,
    /// Per-sensor retrigger suppression (ms)
    pub debounce_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { distance_cm: 10.0, timeout_ms: 3000, debounce_ms: 500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuzzerConfig {
    pub enabled: bool,
    pub duration_ms: u64,
}

impl Default for BuzzerConfig {
    fn default() -> Self {
        Self { enabled: true, duration_ms: 200 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// How long the entry/exit lamp stays lit after a crossing (ms)
    pub indicator_ms: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { indicator_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    /// 915 MHz for US, 868 MHz for Europe, 433 MHz for Asia
    pub frequency_hz: u64,
    pub tx_power_dbm: u8,
    pub spreading_factor: u8,
    pub signal_bandwidth_hz: u32,
    /// Denominator of the 4/x coding rate
    pub coding_rate: u8,
    /// 0x12 private network, 0x34 LoRaWAN
    pub sync_word: u8,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 915_000_000,
            tx_power_dbm: 20,
            spreading_factor: 7,
            signal_bandwidth_hz: 125_000,
            coding_rate: 5,
            sync_word: 0x12,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Heartbeat period (ms), 0 sends only on crossings
    pub interval_ms: u64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Raise the default log filter to debug
    pub debug_mode: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { debug_mode: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub ultrasonic_timeout_us: u32,
    pub min_valid_cm: f64,
    pub max_valid_cm: f64,
    /// Mounting height from the floor, informational only (cm)
    pub mounting_height_cm: u32,
    /// Distance between the two sensors, informational only (cm)
    pub spacing_cm: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            ultrasonic_timeout_us: 30_000,
            min_valid_cm: 2.0,
            max_valid_cm: 400.0,
            mounting_height_cm: 100,
            spacing_cm: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub lora: bool,
    pub buzzer: bool,
    pub leds: bool,
    pub reset_button: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self { lora: true, buzzer: true, leds: true, reset_button: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control loop period (ms)
    pub poll_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 50 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub device: String,
    pub baud: u32,
    /// A sensor sample older than this reads as invalid (ms)
    pub stale_after_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { device: "/dev/ttyUSB0".to_string(), baud: 115_200, stale_after_ms: 500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic_prefix: "visitors".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, prometheus_port: 9100 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub device: DeviceConfig,
    pub pins: PinsConfig,
    pub detection: DetectionConfig,
    pub buzzer: BuzzerConfig,
    pub feedback: FeedbackConfig,
    pub lora: LoraConfig,
    pub transmission: TransmissionConfig,
    pub logging: LoggingConfig,
    pub sensor: SensorConfig,
    pub features: FeaturesConfig,
    pub control: ControlConfig,
    pub bridge: BridgeConfig,
    pub uplink: UplinkConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    device_id: String,
    pins: PinsConfig,
    detection_distance_cm: f64,
    detection_timeout_ms: u64,
    debounce_ms: u64,
    buzzer_enabled: bool,
    buzzer_duration_ms: u64,
    indicator_ms: u64,
    lora: LoraConfig,
    transmission_interval_ms: u64,
    debug_mode: bool,
    sensor: SensorConfig,
    features: FeaturesConfig,
    poll_interval_ms: u64,
    bridge_device: String,
    bridge_baud: u32,
    bridge_stale_after_ms: u64,
    uplink: UplinkConfig,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            device_id: toml_config.device.id,
            pins: toml_config.pins,
            detection_distance_cm: toml_config.detection.distance_cm,
            detection_timeout_ms: toml_config.detection.timeout_ms,
            debounce_ms: toml_config.detection.debounce_ms,
            buzzer_enabled: toml_config.buzzer.enabled,
            buzzer_duration_ms: toml_config.buzzer.duration_ms,
            indicator_ms: toml_config.feedback.indicator_ms,
            lora: toml_config.lora,
            transmission_interval_ms: toml_config.transmission.interval_ms,
            debug_mode: toml_config.logging.debug_mode,
            sensor: toml_config.sensor,
            features: toml_config.features,
            poll_interval_ms: toml_config.control.poll_interval_ms,
            bridge_device: toml_config.bridge.device,
            bridge_baud: toml_config.bridge.baud,
            bridge_stale_after_ms: toml_config.bridge.stale_after_ms,
            uplink: toml_config.uplink,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

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

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Check thresholds and radio parameters for values the device cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }

        let (min, max) = (self.sensor.min_valid_cm, self.sensor.max_valid_cm);
        if min >= max {
            return Err(ConfigError::InvalidRange { min, max });
        }

        let distance = self.detection_distance_cm;
        if distance <= min || distance > max {
            return Err(ConfigError::DetectionOutOfRange { distance, min, max });
        }

        if self.detection_timeout_ms == 0 {
            return Err(ConfigError::ZeroDetectionTimeout);
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        let lora = &self.lora;
        if !(5..=20).contains(&lora.tx_power_dbm) {
            return Err(ConfigError::TxPower(lora.tx_power_dbm));
        }
        if !(7..=12).contains(&lora.spreading_factor) {
            return Err(ConfigError::SpreadingFactor(lora.spreading_factor));
        }
        if !(5..=8).contains(&lora.coding_rate) {
            return Err(ConfigError::CodingRate(lora.coding_rate));
        }
        if !LORA_BANDWIDTHS_HZ.contains(&lora.signal_bandwidth_hz) {
            return Err(ConfigError::Bandwidth(lora.signal_bandwidth_hz));
        }

        Ok(())
    }

    pub fn sensor_limits(&self) -> SensorLimits {
        SensorLimits {
            timeout_us: self.sensor.ultrasonic_timeout_us,
            min_valid_cm: self.sensor.min_valid_cm,
            max_valid_cm: self.sensor.max_valid_cm,
        }
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            detection_distance_cm: self.detection_distance_cm,
            detection_timeout_ms: self.detection_timeout_ms,
            debounce_ms: self.debounce_ms,
        }
    }

    pub fn feedback_settings(&self) -> FeedbackSettings {
        FeedbackSettings {
            buzzer_enabled: self.features.buzzer && self.buzzer_enabled,
            leds_enabled: self.features.leds,
            buzzer_duration_ms: self.buzzer_duration_ms,
            indicator_ms: self.indicator_ms,
        }
    }

    pub fn telemetry_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            enabled: self.features.lora,
            device_id: self.device_id.clone(),
            interval_ms: self.transmission_interval_ms,
        }
    }

    // Getters for all config fields
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn pins(&self) -> &PinsConfig {
        &self.pins
    }

    pub fn detection_distance_cm(&self) -> f64 {
        self.detection_distance_cm
    }

    pub fn detection_timeout_ms(&self) -> u64 {
        self.detection_timeout_ms
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn buzzer_enabled(&self) -> bool {
        self.buzzer_enabled
    }

    pub fn buzzer_duration_ms(&self) -> u64 {
        self.buzzer_duration_ms
    }

    pub fn indicator_ms(&self) -> u64 {
        self.indicator_ms
    }

    pub fn lora(&self) -> &LoraConfig {
        &self.lora
    }

    pub fn transmission_interval_ms(&self) -> u64 {
        self.transmission_interval_ms
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn sensor(&self) -> &SensorConfig {
        &self.sensor
    }

    pub fn features(&self) -> &FeaturesConfig {
        &self.features
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn bridge_device(&self) -> &str {
        &self.bridge_device
    }

    pub fn bridge_baud(&self) -> u32 {
        self.bridge_baud
    }

    pub fn bridge_stale_after_ms(&self) -> u64 {
        self.bridge_stale_after_ms
    }

    pub fn uplink_host(&self) -> &str {
        &self.uplink.host
    }

    pub fn uplink_port(&self) -> u16 {
        self.uplink.port
    }

    pub fn uplink_topic_prefix(&self) -> &str {
        &self.uplink.topic_prefix
    }

    pub fn uplink_username(&self) -> Option<&str> {
        self.uplink.username.as_deref()
    }

    pub fn uplink_password(&self) -> Option<&str> {
        self.uplink.password.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to change the heartbeat period
    #[cfg(test)]
    pub fn with_transmission_interval_ms(mut self, ms: u64) -> Self {
        self.transmission_interval_ms = ms;
        self
    }

    /// Builder method for tests to change the detection threshold
    #[cfg(test)]
    pub fn with_detection_distance_cm(mut self, cm: f64) -> Self {
        self.detection_distance_cm = cm;
        self
    }
}
