//! IO modules - external system interfaces
//!
//! - `sensor` - Rangefinder interface
//! - `button` - Reset button edge detection
//! - `radio` - Radio transmit interface
//! - `payload` - Telemetry payload envelope
//! - `bridge` - Serial bridge to the sensor microcontroller
//! - `mqtt_radio` - MQTT uplink implementing the radio interface
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod bridge;
pub mod button;
pub mod mqtt_radio;
pub mod payload;
pub mod prometheus;
pub mod radio;
pub mod sensor;

pub use bridge::{BridgeHandles, SerialBridge};
pub use button::{ButtonInput, EdgeButton};
pub use mqtt_radio::MqttRadio;
pub use payload::{PayloadKind, TelemetryPayload};
pub use prometheus::start_metrics_server;
pub use radio::{LinkError, RadioLink};
pub use sensor::DistanceSensor;
