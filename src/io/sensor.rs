//! Rangefinder interface

use crate::domain::types::{DistanceReading, Millis};

/// Single-shot distance query.
///
/// Implementations bound the measurement by the ultrasonic timeout and return
/// an invalid reading on timeout or out-of-range echoes, never an error.
pub trait DistanceSensor {
    fn measure(&mut self, now: Millis) -> DistanceReading;
}

impl<S: DistanceSensor + ?Sized> DistanceSensor for Box<S> {
    fn measure(&mut self, now: Millis) -> DistanceReading {
        (**self).measure(now)
    }
}
