//! Doorway monitor: the control loop owner
//!
//! Holds every stateful component and runs one cycle per poll:
//! 1. both sensors are measured before anything is paired
//! 2. readings go through the detector in sensor order
//! 3. crossings update the count, local feedback and telemetry
//! 4. a fresh reset-button press clears the count
//! 5. time-based work runs: pending expiry, feedback timers, heartbeats

use crate::domain::types::{CrossingEvent, Direction, DistanceReading, LinkHealth, Millis};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::button::ButtonInput;
use crate::io::radio::RadioLink;
use crate::io::sensor::DistanceSensor;
use crate::services::crossing_detector::{CrossingDetector, DetectorSettings, Observation};
use crate::services::feedback::{FeedbackController, FeedbackPins};
use crate::services::telemetry::TelemetryReporter;
use crate::services::visitor_counter::{CountChange, VisitorCounter};
use embedded_hal::digital::OutputPin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

pub struct DoorwayMonitor<P: OutputPin> {
    detector: CrossingDetector,
    counter: VisitorCounter,
    feedback: FeedbackController<P>,
    telemetry: TelemetryReporter,
    /// Absent when the reset feature is off
    reset_button: Option<Box<dyn ButtonInput>>,
    metrics: Arc<Metrics>,
}

impl<P: OutputPin> DoorwayMonitor<P> {
    pub fn new(
        detector: DetectorSettings,
        feedback: FeedbackController<P>,
        telemetry: TelemetryReporter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            detector: CrossingDetector::new(detector),
            counter: VisitorCounter::new(),
            feedback,
            telemetry,
            reset_button: None,
            metrics,
        }
    }

    /// Wire the monitor from configuration. Feature toggles decide which
    /// collaborators are kept; the radio and button are dropped when disabled.
    pub fn from_config(
        config: &Config,
        pins: FeedbackPins<P>,
        radio: Option<Box<dyn RadioLink>>,
        reset_button: Option<Box<dyn ButtonInput>>,
        start: Millis,
        metrics: Arc<Metrics>,
    ) -> Self {
        let features = config.features();
        let feedback = FeedbackController::new(config.feedback_settings(), pins);
        let radio = radio.filter(|_| features.lora);
        let telemetry = TelemetryReporter::new(config.telemetry_settings(), radio, start);

        let mut monitor = Self::new(config.detector_settings(), feedback, telemetry, metrics);
        if features.reset_button {
            monitor.reset_button = reset_button;
        }
        monitor
    }

    pub fn with_reset_button(mut self, button: Box<dyn ButtonInput>) -> Self {
        self.reset_button = Some(button);
        self
    }

    /// Startup self-test on the local outputs
    pub fn announce_ready(&mut self, now: Millis) {
        self.feedback.announce_ready(now);
        info!(
            device_id = %self.telemetry.device_id(),
            count = %self.counter.current(),
            "monitor_ready"
        );
    }

    /// Measure both sensors and the button, then run one cycle
    pub fn run_cycle<A, B>(
        &mut self,
        now: Millis,
        sensor_1: &mut A,
        sensor_2: &mut B,
    ) -> Vec<CrossingEvent>
    where
        A: DistanceSensor + ?Sized,
        B: DistanceSensor + ?Sized,
    {
        let started = Instant::now();

        let readings = [sensor_1.measure(now), sensor_2.measure(now)];
        let reset_pressed = self.reset_button.as_mut().is_some_and(|b| b.pressed());
        let crossings = self.step(now, readings, reset_pressed);

        self.metrics.record_cycle(started.elapsed().as_micros() as u64);
        crossings
    }

    /// One control cycle over readings already taken.
    /// `readings` must be in sensor order (one, then two).
    pub fn step(
        &mut self,
        now: Millis,
        readings: [DistanceReading; 2],
        reset_pressed: bool,
    ) -> Vec<CrossingEvent> {
        let mut crossings = Vec::new();

        for reading in &readings {
            self.metrics.record_reading(reading.distance.is_valid());
            match self.detector.classify(reading) {
                Observation::NoEdge => {}
                Observation::Debounced(_) => self.metrics.record_trigger_debounced(),
                Observation::Pending(_) => self.metrics.record_trigger_accepted(),
                Observation::Crossing(event) => {
                    self.metrics.record_trigger_accepted();
                    self.handle_crossing(&event, now);
                    crossings.push(event);
                }
            }
        }

        if reset_pressed {
            self.counter.reset();
            self.metrics.record_reset();
            self.metrics.set_count(0);
        }

        let expired = self.detector.expire(now);
        if expired > 0 {
            self.metrics.record_triggers_expired(expired as u64);
        }

        self.feedback.on_tick(now);
        let health = self.telemetry.on_tick(now, self.counter.current());
        self.update_link(health);

        crossings
    }

    fn handle_crossing(&mut self, event: &CrossingEvent, now: Millis) {
        match event.direction {
            Direction::Entry => self.metrics.record_entry(),
            Direction::Exit => self.metrics.record_exit(),
        }
        if self.counter.apply(event) == CountChange::Underflow {
            self.metrics.record_underflow();
        }
        let count = self.counter.current();
        self.metrics.set_count(count);

        info!(
            direction = %event.direction.as_str(),
            count = %count,
            ts = %event.timestamp,
            "count_updated"
        );

        self.feedback.on_crossing(event, now);
        let health = self.telemetry.on_crossing(event, count);
        self.update_link(health);
    }

    /// Forward the result of a transmission attempt to the lamp and metrics
    fn update_link(&mut self, health: Option<LinkHealth>) {
        let Some(health) = health else {
            return;
        };
        self.metrics.record_payload(health == LinkHealth::Up);
        self.metrics.set_link_health(health);
        self.feedback.set_link_health(health);
    }

    /// Poll on a fixed interval until `shutdown` flips to true.
    ///
    /// Time passed to the components is milliseconds since the loop started.
    pub async fn run<A, B>(
        &mut self,
        sensor_1: &mut A,
        sensor_2: &mut B,
        poll_interval_ms: u64,
        mut shutdown: watch::Receiver<bool>,
    ) where
        A: DistanceSensor + ?Sized,
        B: DistanceSensor + ?Sized,
    {
        let epoch = Instant::now();
        let mut ticker = interval(Duration::from_millis(poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.announce_ready(0);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = epoch.elapsed().as_millis() as Millis;
                    self.run_cycle(now, sensor_1, sensor_2);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            count = %self.counter.current(),
            entries = %self.counter.entries(),
            exits = %self.counter.exits(),
            "monitor_stopped"
        );
    }

    pub fn count(&self) -> u32 {
        self.counter.current()
    }

    pub fn counter(&self) -> &VisitorCounter {
        &self.counter
    }

    pub fn detector(&self) -> &CrossingDetector {
        &self.detector
    }

    pub fn feedback(&self) -> &FeedbackController<P> {
        &self.feedback
    }

    pub fn telemetry(&self) -> &TelemetryReporter {
        &self.telemetry
    }

    pub fn link_health(&self) -> LinkHealth {
        self.telemetry.link_health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SensorId;
    use crate::services::feedback::FeedbackSettings;
    use crate::services::telemetry::TelemetrySettings;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    struct NullPin;

    impl ErrorType for NullPin {
        type Error = Infallible;
    }

    impl OutputPin for NullPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn monitor() -> (DoorwayMonitor<NullPin>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let pins = FeedbackPins {
            buzzer: NullPin,
            led_entry: NullPin,
            led_exit: NullPin,
            led_status: NullPin,
        };
        let feedback = FeedbackController::new(FeedbackSettings::default(), pins);
        let telemetry = TelemetryReporter::new(TelemetrySettings::default(), None, 0);
        let monitor =
            DoorwayMonitor::new(DetectorSettings::default(), feedback, telemetry, metrics.clone());
        (monitor, metrics)
    }

    fn clear(now: Millis) -> [DistanceReading; 2] {
        [
            DistanceReading::cm(SensorId::One, 100.0, now),
            DistanceReading::cm(SensorId::Two, 100.0, now),
        ]
    }

    fn blocked(sensor: SensorId, now: Millis) -> [DistanceReading; 2] {
        let mut readings = clear(now);
        readings[sensor.index()] = DistanceReading::cm(sensor, 5.0, now);
        readings
    }

    #[test]
    fn test_step_counts_entry() {
        let (mut monitor, metrics) = monitor();

        monitor.step(0, blocked(SensorId::One, 0), false);
        monitor.step(100, clear(100), false);
        let crossings = monitor.step(200, blocked(SensorId::Two, 200), false);

        assert_eq!(crossings, vec![CrossingEvent { direction: Direction::Entry, timestamp: 200 }]);
        assert_eq!(monitor.count(), 1);
        assert_eq!(metrics.count(), 1);
        assert_eq!(metrics.entries_total(), 1);
    }

    #[test]
    fn test_both_sensors_in_one_cycle_pair() {
        let (mut monitor, _) = monitor();
        let readings = [
            DistanceReading::cm(SensorId::One, 5.0, 50),
            DistanceReading::cm(SensorId::Two, 5.0, 50),
        ];

        let crossings = monitor.step(50, readings, false);

        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].direction, Direction::Entry);
    }

    #[test]
    fn test_reset_press_clears_count() {
        let (mut monitor, metrics) = monitor();

        monitor.step(0, blocked(SensorId::One, 0), false);
        monitor.step(100, blocked(SensorId::Two, 100), false);
        assert_eq!(monitor.count(), 1);

        monitor.step(200, clear(200), true);
        assert_eq!(monitor.count(), 0);
        assert_eq!(metrics.count(), 0);
        assert_eq!(metrics.report().resets_total, 1);
    }

    #[test]
    fn test_tick_expires_stale_pending() {
        let (mut monitor, metrics) = monitor();

        monitor.step(0, blocked(SensorId::One, 0), false);
        monitor.step(3000, blocked(SensorId::One, 3000), false);
        assert_eq!(monitor.detector().pending(SensorId::One), Some(0));

        monitor.step(3001, blocked(SensorId::One, 3001), false);
        assert_eq!(monitor.detector().pending(SensorId::One), None);
        assert_eq!(metrics.report().triggers_expired_total, 1);
    }
}
