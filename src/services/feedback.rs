//! Local feedback: buzzer, entry/exit lamps and the link status lamp
//!
//! Reactive only. The sole timing state is when the current beep and the
//! current indicator lamp should switch off. Outputs are best-effort: a pin
//! that fails to switch is logged and otherwise ignored.

use crate::domain::types::{CrossingEvent, Direction, LinkHealth, Millis};
use embedded_hal::digital::OutputPin;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackSettings {
    pub buzzer_enabled: bool,
    pub leds_enabled: bool,
    pub buzzer_duration_ms: u64,
    /// How long the entry/exit lamp stays lit (ms)
    pub indicator_ms: u64,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self { buzzer_enabled: true, leds_enabled: true, buzzer_duration_ms: 200, indicator_ms: 1000 }
    }
}

/// Output pins driven by the controller
pub struct FeedbackPins<P> {
    pub buzzer: P,
    pub led_entry: P,
    pub led_exit: P,
    pub led_status: P,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Buzzer,
    LedEntry,
    LedExit,
    LedStatus,
}

impl Output {
    fn index(self) -> usize {
        match self {
            Output::Buzzer => 0,
            Output::LedEntry => 1,
            Output::LedExit => 2,
            Output::LedStatus => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Output::Buzzer => "buzzer",
            Output::LedEntry => "led_entry",
            Output::LedExit => "led_exit",
            Output::LedStatus => "led_status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indicator {
    Direction(Direction),
    /// Both direction lamps, used by the startup self-test
    All,
}

pub struct FeedbackController<P: OutputPin> {
    settings: FeedbackSettings,
    pins: FeedbackPins<P>,
    /// Last level written to each output
    levels: [bool; 4],
    buzzer_until: Option<Millis>,
    indicator: Option<(Indicator, Millis)>,
    link: LinkHealth,
}

impl<P: OutputPin> FeedbackController<P> {
    pub fn new(settings: FeedbackSettings, pins: FeedbackPins<P>) -> Self {
        let mut controller = Self {
            settings,
            pins,
            levels: [true; 4],
            buzzer_until: None,
            indicator: None,
            link: LinkHealth::Unknown,
        };
        // Force every output to a known dark state
        for output in [Output::Buzzer, Output::LedEntry, Output::LedExit, Output::LedStatus] {
            controller.set(output, false);
        }
        controller
    }

    /// Startup self-test: one beep and both direction lamps
    pub fn announce_ready(&mut self, now: Millis) {
        let until = now + self.settings.buzzer_duration_ms;
        self.start_beep(until);
        if self.settings.leds_enabled {
            self.show(Indicator::All, until);
        }
    }

    pub fn on_crossing(&mut self, event: &CrossingEvent, now: Millis) {
        self.start_beep(now + self.settings.buzzer_duration_ms);
        if self.settings.leds_enabled {
            self.show(Indicator::Direction(event.direction), now + self.settings.indicator_ms);
        }
    }

    /// Switch off whatever has run its course
    pub fn on_tick(&mut self, now: Millis) {
        if self.buzzer_until.is_some_and(|until| now >= until) {
            self.buzzer_until = None;
            self.set(Output::Buzzer, false);
        }

        if self.indicator.is_some_and(|(_, until)| now >= until) {
            self.indicator = None;
            self.set(Output::LedEntry, false);
            self.set(Output::LedExit, false);
        }
    }

    pub fn set_link_health(&mut self, health: LinkHealth) {
        if health == self.link {
            return;
        }
        info!(from = %self.link.as_str(), to = %health.as_str(), "link_health_changed");
        self.link = health;

        if self.settings.leds_enabled {
            self.set(Output::LedStatus, health == LinkHealth::Up);
        }
    }

    pub fn link_health(&self) -> LinkHealth {
        self.link
    }

    pub fn buzzer_active(&self) -> bool {
        self.buzzer_until.is_some()
    }

    /// Direction currently shown on the indicator lamps
    pub fn lit_indicator(&self) -> Option<Direction> {
        match self.indicator {
            Some((Indicator::Direction(direction), _)) => Some(direction),
            _ => None,
        }
    }

    fn start_beep(&mut self, until: Millis) {
        if !self.settings.buzzer_enabled {
            return;
        }
        self.buzzer_until = Some(until);
        self.set(Output::Buzzer, true);
    }

    fn show(&mut self, indicator: Indicator, until: Millis) {
        let (entry, exit) = match indicator {
            Indicator::Direction(Direction::Entry) => (true, false),
            Indicator::Direction(Direction::Exit) => (false, true),
            Indicator::All => (true, true),
        };
        self.indicator = Some((indicator, until));
        self.set(Output::LedEntry, entry);
        self.set(Output::LedExit, exit);
    }

    /// Write an output only when its level changes
    fn set(&mut self, output: Output, on: bool) {
        if self.levels[output.index()] == on {
            return;
        }
        self.levels[output.index()] = on;

        let pin = match output {
            Output::Buzzer => &mut self.pins.buzzer,
            Output::LedEntry => &mut self.pins.led_entry,
            Output::LedExit => &mut self.pins.led_exit,
            Output::LedStatus => &mut self.pins.led_status,
        };
        let result = if on { pin.set_high() } else { pin.set_low() };
        if let Err(e) = result {
            debug!(output = %output.name(), on = %on, error = ?e, "output_drive_failed");
        }
    }
}
