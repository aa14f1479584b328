//! Services - detection, counting and reporting
//!
//! - `crossing_detector` - Two-sensor edge, debounce and pairing state machine
//! - `visitor_counter` - Count state
//! - `feedback` - Buzzer and lamps
//! - `telemetry` - Event and heartbeat payloads over the radio
//! - `monitor` - Owns the above and runs the control cycle

pub mod crossing_detector;
pub mod feedback;
pub mod monitor;
pub mod telemetry;
pub mod visitor_counter;

pub use crossing_detector::{CrossingDetector, DetectorSettings, Observation};
pub use feedback::{FeedbackController, FeedbackPins, FeedbackSettings};
pub use monitor::DoorwayMonitor;
pub use telemetry::{TelemetryReporter, TelemetrySettings};
pub use visitor_counter::{CountChange, VisitorCounter};
