//! Directional crossing detection
//!
//! Turns two independent streams of distance readings into classified
//! entry/exit crossings:
//! 1. Edge detection - a trigger fires only when a beam goes from clear to
//!    blocked, so someone standing in the beam counts once.
//! 2. Debounce - a retrigger on the same sensor inside `debounce_ms` of the
//!    last accepted trigger is dropped.
//! 3. Pairing - each sensor holds at most one pending trigger. A trigger that
//!    finds an unexpired pending trigger on the other sensor completes a
//!    crossing; the sensor that fired first gives the direction.
//! 4. Expiry - a pending trigger older than `detection_timeout_ms` is dropped
//!    without emitting anything.
//!
//! Sensor one first is an entry, sensor two first is an exit. Triggers with
//! identical timestamps resolve to an entry: two sensors cannot tell the
//! direction of a truly simultaneous crossing, so the outcome is fixed instead.

use crate::domain::types::{
    CrossingEvent, Direction, DistanceReading, Millis, SensorId, TriggerEvent,
};
use tracing::{debug, info};

/// Thresholds for the detection state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    /// A reading closer than this counts as presence (cm)
    pub detection_distance_cm: f64,
    /// Pairing window for the second sensor (ms)
    pub detection_timeout_ms: u64,
    /// Retrigger suppression per sensor (ms)
    pub debounce_ms: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self { detection_distance_cm: 10.0, detection_timeout_ms: 3000, debounce_ms: 500 }
    }
}

/// What a single reading did to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No clear -> blocked edge
    NoEdge,
    /// Edge suppressed by debounce
    Debounced(TriggerEvent),
    /// Trigger accepted and waiting for the other sensor
    Pending(TriggerEvent),
    /// Trigger accepted and paired into a crossing
    Crossing(CrossingEvent),
}

impl Observation {
    pub fn crossing(self) -> Option<CrossingEvent> {
        match self {
            Observation::Crossing(event) => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SensorSlot {
    /// Last known presence state
    present: bool,
    /// Timestamp of the last trigger that passed debounce
    last_accepted: Option<Millis>,
    /// Trigger waiting for a partner on the other sensor
    pending: Option<Millis>,
}

/// Two-sensor crossing state machine
#[derive(Debug)]
pub struct CrossingDetector {
    settings: DetectorSettings,
    slots: [SensorSlot; 2],
}

impl CrossingDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings, slots: [SensorSlot::default(); 2] }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Feed one reading, returning a crossing when this reading completes one
    pub fn observe(&mut self, reading: &DistanceReading) -> Option<CrossingEvent> {
        self.classify(reading).crossing()
    }

    /// Feed one reading and report exactly what it caused
    pub fn classify(&mut self, reading: &DistanceReading) -> Observation {
        let present = reading.distance.is_within(self.settings.detection_distance_cm);
        let slot = &mut self.slots[reading.sensor.index()];
        let was_present = slot.present;
        slot.present = present;

        if !present || was_present {
            return Observation::NoEdge;
        }

        let trigger = TriggerEvent { sensor: reading.sensor, timestamp: reading.timestamp };

        if let Some(last) = slot.last_accepted {
            let since_last = trigger.timestamp.saturating_sub(last);
            if since_last < self.settings.debounce_ms {
                debug!(
                    sensor = %trigger.sensor,
                    ts = %trigger.timestamp,
                    since_last_ms = %since_last,
                    "trigger_debounced"
                );
                return Observation::Debounced(trigger);
            }
        }
        slot.last_accepted = Some(trigger.timestamp);

        self.accept(trigger)
    }

    fn accept(&mut self, trigger: TriggerEvent) -> Observation {
        let other = trigger.sensor.other();
        let partner = self.slots[other.index()]
            .pending
            .filter(|&ts| trigger.timestamp.saturating_sub(ts) <= self.settings.detection_timeout_ms);

        let Some(partner_ts) = partner else {
            if let Some(previous) = self.slots[trigger.sensor.index()].pending {
                debug!(sensor = %trigger.sensor, previous_ts = %previous, "pending_trigger_replaced");
            }
            self.slots[trigger.sensor.index()].pending = Some(trigger.timestamp);
            debug!(sensor = %trigger.sensor, ts = %trigger.timestamp, "trigger_pending");
            return Observation::Pending(trigger);
        };

        let first = if partner_ts < trigger.timestamp {
            other
        } else if trigger.timestamp < partner_ts {
            trigger.sensor
        } else {
            // Simultaneous: fixed tie-break
            SensorId::One
        };

        let direction = match first {
            SensorId::One => Direction::Entry,
            SensorId::Two => Direction::Exit,
        };
        let event = CrossingEvent { direction, timestamp: partner_ts.max(trigger.timestamp) };

        self.slots[0].pending = None;
        self.slots[1].pending = None;

        info!(
            direction = %direction.as_str(),
            ts = %event.timestamp,
            gap_ms = %trigger.timestamp.abs_diff(partner_ts),
            "crossing_detected"
        );

        Observation::Crossing(event)
    }

    /// Drop pending triggers whose pairing window has passed.
    /// Returns how many were discarded.
    pub fn expire(&mut self, now: Millis) -> usize {
        let timeout = self.settings.detection_timeout_ms;
        let mut expired = 0;

        for sensor in SensorId::ALL {
            let slot = &mut self.slots[sensor.index()];
            if let Some(ts) = slot.pending {
                if now.saturating_sub(ts) > timeout {
                    slot.pending = None;
                    expired += 1;
                    debug!(sensor = %sensor, trigger_ts = %ts, now = %now, "pending_trigger_expired");
                }
            }
        }

        expired
    }

    /// Timestamp of the trigger waiting on `sensor`, if any
    pub fn pending(&self, sensor: SensorId) -> Option<Millis> {
        self.slots[sensor.index()].pending
    }

    /// Whether `sensor` currently sees something in its beam
    pub fn is_present(&self, sensor: SensorId) -> bool {
        self.slots[sensor.index()].present
    }
}

impl Default for CrossingDetector {
    fn default() -> Self {
        Self::new(DetectorSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(sensor: SensorId, ts: Millis) -> DistanceReading {
        DistanceReading::cm(sensor, 5.0, ts)
    }

    fn clear(sensor: SensorId, ts: Millis) -> DistanceReading {
        DistanceReading::cm(sensor, 150.0, ts)
    }

    /// Beam blocked then cleared at `ts`, returning what the block caused
    fn pulse(detector: &mut CrossingDetector, sensor: SensorId, ts: Millis) -> Observation {
        let observation = detector.classify(&blocked(sensor, ts));
        detector.classify(&clear(sensor, ts));
        observation
    }

    #[test]
    fn test_entry_sensor_one_then_two() {
        let mut detector = CrossingDetector::default();

        assert!(matches!(pulse(&mut detector, SensorId::One, 0), Observation::Pending(_)));
        let result = pulse(&mut detector, SensorId::Two, 200);

        assert_eq!(
            result,
            Observation::Crossing(CrossingEvent { direction: Direction::Entry, timestamp: 200 })
        );
        assert_eq!(detector.pending(SensorId::One), None);
        assert_eq!(detector.pending(SensorId::Two), None);
    }

    #[test]
    fn test_exit_sensor_two_then_one() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::Two, 0);
        let event = pulse(&mut detector, SensorId::One, 100).crossing();

        assert_eq!(event, Some(CrossingEvent { direction: Direction::Exit, timestamp: 100 }));
    }

    #[test]
    fn test_level_does_not_retrigger() {
        let mut detector = CrossingDetector::default();

        assert!(matches!(
            detector.classify(&blocked(SensorId::One, 0)),
            Observation::Pending(_)
        ));
        // Person lingers in the beam for several polls
        for ts in [50, 100, 600, 1200] {
            assert_eq!(detector.classify(&blocked(SensorId::One, ts)), Observation::NoEdge);
        }
    }

    #[test]
    fn test_debounce_discards_retrigger() {
        let mut detector = CrossingDetector::default();

        assert!(matches!(pulse(&mut detector, SensorId::One, 0), Observation::Pending(_)));
        assert!(matches!(pulse(&mut detector, SensorId::One, 300), Observation::Debounced(_)));

        // The original pending trigger is untouched
        assert_eq!(detector.pending(SensorId::One), Some(0));
    }

    #[test]
    fn test_debounce_boundary_accepts() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::One, 0);
        let result = pulse(&mut detector, SensorId::One, 500);

        assert!(matches!(result, Observation::Pending(t) if t.timestamp == 500));
        assert_eq!(detector.pending(SensorId::One), Some(500));
    }

    #[test]
    fn test_debounced_trigger_never_pairs() {
        let mut detector = CrossingDetector::default();

        // Entry completes, then sensor two chatters right after
        pulse(&mut detector, SensorId::One, 0);
        assert!(pulse(&mut detector, SensorId::Two, 200).crossing().is_some());
        assert!(matches!(pulse(&mut detector, SensorId::Two, 400), Observation::Debounced(_)));

        assert_eq!(detector.pending(SensorId::Two), None);
    }

    #[test]
    fn test_unpaired_trigger_produces_nothing() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::One, 0);
        for ts in (0..=3001).step_by(50) {
            assert_eq!(detector.classify(&clear(SensorId::Two, ts)), Observation::NoEdge);
        }
        assert_eq!(detector.expire(3001), 1);
        assert_eq!(detector.pending(SensorId::One), None);
    }

    #[test]
    fn test_late_partner_starts_new_pending() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::One, 0);
        let result = pulse(&mut detector, SensorId::Two, 3001);

        assert!(matches!(result, Observation::Pending(_)));
        assert_eq!(detector.pending(SensorId::Two), Some(3001));
    }

    #[test]
    fn test_partner_at_window_edge_pairs() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::Two, 1000);
        let event = pulse(&mut detector, SensorId::One, 4000).crossing();

        assert_eq!(event, Some(CrossingEvent { direction: Direction::Exit, timestamp: 4000 }));
    }

    #[test]
    fn test_expire_keeps_fresh_pending() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::Two, 1000);
        assert_eq!(detector.expire(4000), 0);
        assert_eq!(detector.pending(SensorId::Two), Some(1000));
        assert_eq!(detector.expire(4001), 1);
    }

    #[test]
    fn test_simultaneous_triggers_resolve_to_entry() {
        for _ in 0..10 {
            let mut detector = CrossingDetector::default();
            detector.classify(&blocked(SensorId::One, 1000));
            let event = detector.observe(&blocked(SensorId::Two, 1000));
            assert_eq!(
                event,
                Some(CrossingEvent { direction: Direction::Entry, timestamp: 1000 })
            );

            // Order of observation does not change the outcome
            let mut detector = CrossingDetector::default();
            detector.classify(&blocked(SensorId::Two, 1000));
            let event = detector.observe(&blocked(SensorId::One, 1000));
            assert_eq!(
                event,
                Some(CrossingEvent { direction: Direction::Entry, timestamp: 1000 })
            );
        }
    }

    #[test]
    fn test_invalid_reading_counts_as_absent() {
        let mut detector = CrossingDetector::default();

        detector.classify(&blocked(SensorId::One, 0));
        assert_eq!(
            detector.classify(&DistanceReading::invalid(SensorId::One, 50)),
            Observation::NoEdge
        );
        assert!(!detector.is_present(SensorId::One));

        // Dropout mid-presence is absorbed by debounce
        assert!(matches!(
            detector.classify(&blocked(SensorId::One, 100)),
            Observation::Debounced(_)
        ));
    }

    #[test]
    fn test_invalid_never_triggers() {
        let mut detector = CrossingDetector::default();
        for ts in 0..20 {
            let reading = DistanceReading::invalid(SensorId::Two, ts * 100);
            assert_eq!(detector.classify(&reading), Observation::NoEdge);
        }
        assert_eq!(detector.pending(SensorId::Two), None);
    }

    #[test]
    fn test_repeated_sensor_replaces_pending() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::One, 0);
        pulse(&mut detector, SensorId::One, 1000);
        assert_eq!(detector.pending(SensorId::One), Some(1000));

        // Sensor two at 3500 is within the window of the replacement only
        let event = pulse(&mut detector, SensorId::Two, 3500).crossing();
        assert_eq!(event, Some(CrossingEvent { direction: Direction::Entry, timestamp: 3500 }));
    }

    #[test]
    fn test_back_to_back_crossings() {
        let mut detector = CrossingDetector::default();

        pulse(&mut detector, SensorId::One, 0);
        let first = pulse(&mut detector, SensorId::Two, 300).crossing();
        pulse(&mut detector, SensorId::Two, 1000);
        let second = pulse(&mut detector, SensorId::One, 1400).crossing();

        assert_eq!(first.map(|e| e.direction), Some(Direction::Entry));
        assert_eq!(second.map(|e| e.direction), Some(Direction::Exit));
    }
}
