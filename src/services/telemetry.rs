//! Telemetry reporting over the radio link
//!
//! Two independent triggers:
//! - every crossing is sent immediately with the new count
//! - a heartbeat with the current count goes out on each interval boundary
//!   (interval 0 disables heartbeats)
//!
//! A failed send drops the payload and marks the link down. Nothing is
//! queued or retried here; the device keeps counting either way.

use crate::domain::types::{CrossingEvent, LinkHealth, Millis};
use crate::io::payload::{PayloadKind, TelemetryPayload};
use crate::io::radio::RadioLink;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySettings {
    /// Radio feature toggle
    pub enabled: bool,
    pub device_id: String,
    /// Heartbeat period (ms), 0 disables heartbeats
    pub interval_ms: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self { enabled: true, device_id: "VAS-001".to_string(), interval_ms: 5000 }
    }
}

pub struct TelemetryReporter {
    settings: TelemetrySettings,
    radio: Option<Box<dyn RadioLink>>,
    /// Next heartbeat boundary, None when heartbeats are off
    next_heartbeat_at: Option<Millis>,
    link: LinkHealth,
    sent: u64,
    dropped: u64,
}

impl TelemetryReporter {
    /// `start` anchors the heartbeat schedule; the first heartbeat goes out
    /// one interval after it.
    pub fn new(
        settings: TelemetrySettings,
        radio: Option<Box<dyn RadioLink>>,
        start: Millis,
    ) -> Self {
        let active = settings.enabled && radio.is_some();
        let next_heartbeat_at =
            (active && settings.interval_ms > 0).then(|| start + settings.interval_ms);

        info!(
            enabled = %active,
            device_id = %settings.device_id,
            interval_ms = %settings.interval_ms,
            "telemetry_initialized"
        );

        Self { settings, radio, next_heartbeat_at, link: LinkHealth::Unknown, sent: 0, dropped: 0 }
    }

    fn is_active(&self) -> bool {
        self.settings.enabled && self.radio.is_some()
    }

    /// Send the crossing with the count it produced.
    /// Returns the link health when a send was attempted.
    pub fn on_crossing(&mut self, event: &CrossingEvent, count: u32) -> Option<LinkHealth> {
        if !self.is_active() {
            return None;
        }
        let payload = TelemetryPayload::new(
            &self.settings.device_id,
            PayloadKind::from(event.direction),
            count,
            event.timestamp,
        );
        Some(self.transmit(&payload))
    }

    /// Send a heartbeat if an interval boundary has been reached.
    /// Returns the link health when a send was attempted.
    pub fn on_tick(&mut self, now: Millis, count: u32) -> Option<LinkHealth> {
        let due = self.next_heartbeat_at?;
        if now < due {
            return None;
        }

        // One heartbeat per tick, realigned to the next future boundary
        let interval = self.settings.interval_ms;
        let missed = (now - due) / interval;
        if missed > 0 {
            debug!(missed = %missed, now = %now, "heartbeat_boundaries_skipped");
        }
        self.next_heartbeat_at = Some(due + (missed + 1) * interval);

        let payload =
            TelemetryPayload::new(&self.settings.device_id, PayloadKind::Heartbeat, count, now);
        Some(self.transmit(&payload))
    }

    fn transmit(&mut self, payload: &TelemetryPayload) -> LinkHealth {
        let Some(radio) = self.radio.as_mut() else {
            return self.link;
        };

        let result = payload
            .encode()
            .map_err(|e| format!("encode failed: {e}"))
            .and_then(|bytes| radio.send(&bytes).map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                self.sent += 1;
                self.link = LinkHealth::Up;
                debug!(
                    event = %payload.event.as_str(),
                    count = %payload.count,
                    ts = %payload.ts,
                    "telemetry_sent"
                );
            }
            Err(e) => {
                self.dropped += 1;
                self.link = LinkHealth::Down;
                warn!(
                    event = %payload.event.as_str(),
                    count = %payload.count,
                    error = %e,
                    "telemetry_send_failed"
                );
            }
        }

        self.link
    }

    pub fn device_id(&self) -> &str {
        &self.settings.device_id
    }

    pub fn link_health(&self) -> LinkHealth {
        self.link
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn next_heartbeat_at(&self) -> Option<Millis> {
        self.next_heartbeat_at
    }
}
