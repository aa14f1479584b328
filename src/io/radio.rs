//! Radio transmit interface
//!
//! The application hands finished payloads to a `RadioLink`; framing below
//! the payload, modulation and the driver's own timeout live behind it.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Driver queue full or transmitter still busy with the previous packet
    #[error("radio busy")]
    Busy,
    /// No route to the base station
    #[error("radio unreachable: {0}")]
    Unreachable(String),
}

pub trait RadioLink {
    /// Transmit one application payload. Bounded by the driver's own timeout.
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError>;
}

impl<R: RadioLink + ?Sized> RadioLink for Box<R> {
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        (**self).send(payload)
    }
}
