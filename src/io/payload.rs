//! Application payload envelope
//!
//! Every payload is a compact JSON object with the fields in a fixed order:
//! `device`, `event`, `count`, `ts`. The base station relies on that layout
//! being identical across devices and payload kinds.

use crate::domain::types::{Direction, Millis};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Entry,
    Exit,
    Heartbeat,
}

impl From<Direction> for PayloadKind {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Entry => PayloadKind::Entry,
            Direction::Exit => PayloadKind::Exit,
        }
    }
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Entry => "entry",
            PayloadKind::Exit => "exit",
            PayloadKind::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryPayload {
    /// Configured device identifier
    pub device: String,
    pub event: PayloadKind,
    /// Visitor count after the event
    pub count: u32,
    /// Device clock at the event (ms)
    pub ts: Millis,
}

impl TelemetryPayload {
    pub fn new(device: &str, event: PayloadKind, count: u32, ts: Millis) -> Self {
        Self { device: device.to_string(), event, count, ts }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
