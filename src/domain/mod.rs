//! Domain models - core doorway types
//!
//! This module contains the canonical data types used throughout the system:
//! - `DistanceReading` - one poll of one rangefinder
//! - `TriggerEvent` - a sensor beam newly interrupted
//! - `CrossingEvent` - a classified entry or exit
//! - `LinkHealth` - radio link status as seen by telemetry

pub mod types;

pub use types::{
    CrossingEvent, Direction, Distance, DistanceReading, LinkHealth, Millis, SensorId,
    TriggerEvent,
};
