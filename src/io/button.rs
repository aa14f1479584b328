//! Reset button input
//!
//! The button is wired with a pull-up, so the line reads low while pressed.
//! Only the released -> pressed edge counts as a press.

use embedded_hal::digital::InputPin;
use tracing::debug;

pub trait ButtonInput {
    /// True once per fresh press
    fn pressed(&mut self) -> bool;
}

impl<B: ButtonInput + ?Sized> ButtonInput for Box<B> {
    fn pressed(&mut self) -> bool {
        (**self).pressed()
    }
}

/// Edge detector over an active-low input pin
pub struct EdgeButton<P: InputPin> {
    pin: P,
    was_down: bool,
}

impl<P: InputPin> EdgeButton<P> {
    pub fn new(pin: P) -> Self {
        Self { pin, was_down: false }
    }
}

impl<P: InputPin> ButtonInput for EdgeButton<P> {
    fn pressed(&mut self) -> bool {
        let down = match self.pin.is_low() {
            Ok(low) => low,
            Err(e) => {
                debug!(error = ?e, "button_read_failed");
                false
            }
        };
        let fresh = down && !self.was_down;
        self.was_down = down;
        fresh
    }
}
