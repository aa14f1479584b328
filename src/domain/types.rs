//! Shared types for the doorway engine

use serde::{Deserialize, Serialize};

/// Logical clock value in milliseconds since the monitor started
pub type Millis = u64;

/// Round-trip echo conversion: 0.034 cm/µs speed of sound, halved
const CM_PER_ECHO_US: f64 = 0.034 / 2.0;

/// One of the two rangefinders flanking the doorway
///
/// Sensor one sits on the outside of the door, sensor two on the inside, so a
/// one-then-two sequence is someone walking in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorId {
    One,
    Two,
}

impl SensorId {
    pub const ALL: [SensorId; 2] = [SensorId::One, SensorId::Two];

    /// Slot index for per-sensor arrays
    #[inline]
    pub fn index(self) -> usize {
        match self {
            SensorId::One => 0,
            SensorId::Two => 1,
        }
    }

    /// The sensor on the other side of the doorway
    #[inline]
    pub fn other(self) -> SensorId {
        match self {
            SensorId::One => SensorId::Two,
            SensorId::Two => SensorId::One,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            SensorId::One => 1,
            SensorId::Two => 2,
        }
    }
}

impl TryFrom<u8> for SensorId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SensorId::One),
            2 => Ok(SensorId::Two),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Valid echo window for a rangefinder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorLimits {
    /// Longest echo accepted before the read counts as a timeout (µs)
    pub timeout_us: u32,
    /// Closest distance the sensor reports reliably (cm)
    pub min_valid_cm: f64,
    /// Farthest distance the sensor reports reliably (cm)
    pub max_valid_cm: f64,
}

impl Default for SensorLimits {
    fn default() -> Self {
        Self { timeout_us: 30_000, min_valid_cm: 2.0, max_valid_cm: 400.0 }
    }
}

/// Measured distance, or `Invalid` for a timeout or out-of-range echo
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distance {
    Cm(f64),
    Invalid,
}

impl Distance {
    /// Whether something stands closer than the detection threshold.
    /// An invalid read never counts as present.
    #[inline]
    pub fn is_within(&self, threshold_cm: f64) -> bool {
        matches!(self, Distance::Cm(cm) if *cm < threshold_cm)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Distance::Cm(_))
    }
}

/// A single poll of one rangefinder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceReading {
    pub sensor: SensorId,
    pub distance: Distance,
    pub timestamp: Millis,
}

impl DistanceReading {
    pub fn new(sensor: SensorId, distance: Distance, timestamp: Millis) -> Self {
        Self { sensor, distance, timestamp }
    }

    pub fn cm(sensor: SensorId, cm: f64, timestamp: Millis) -> Self {
        Self::new(sensor, Distance::Cm(cm), timestamp)
    }

    pub fn invalid(sensor: SensorId, timestamp: Millis) -> Self {
        Self::new(sensor, Distance::Invalid, timestamp)
    }

    /// Build a reading from a raw echo round-trip time.
    ///
    /// An echo of 0 µs means the sensor never heard its pulse back.
    pub fn from_echo(
        sensor: SensorId,
        echo_us: u32,
        timestamp: Millis,
        limits: &SensorLimits,
    ) -> Self {
        if echo_us == 0 || echo_us > limits.timeout_us {
            return Self::invalid(sensor, timestamp);
        }

        let cm = f64::from(echo_us) * CM_PER_ECHO_US;
        if cm < limits.min_valid_cm || cm > limits.max_valid_cm {
            return Self::invalid(sensor, timestamp);
        }

        Self::cm(sensor, cm, timestamp)
    }
}

/// A sensor beam newly interrupted (absent -> present edge)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub sensor: SensorId,
    pub timestamp: Millis,
}

/// Walking direction through the doorway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }
}

/// A classified doorway crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossingEvent {
    pub direction: Direction,
    /// Timestamp of the second (later) trigger of the pair
    pub timestamp: Millis,
}

/// Radio link status as observed by the telemetry layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkHealth {
    /// Nothing has been transmitted yet
    #[default]
    Unknown,
    Up,
    Down,
}

impl LinkHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkHealth::Unknown => "unknown",
            LinkHealth::Up => "up",
            LinkHealth::Down => "down",
        }
    }

    /// Gauge value for metrics (0=unknown, 1=up, 2=down)
    pub fn as_gauge(&self) -> u64 {
        match self {
            LinkHealth::Unknown => 0,
            LinkHealth::Up => 1,
            LinkHealth::Down => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_id_from_u8() {
        assert_eq!(SensorId::try_from(1), Ok(SensorId::One));
        assert_eq!(SensorId::try_from(2), Ok(SensorId::Two));
        assert_eq!(SensorId::try_from(3), Err(3));
        assert_eq!(SensorId::One.other(), SensorId::Two);
    }

    #[test]
    fn test_from_echo_converts_round_trip() {
        let limits = SensorLimits::default();
        // 1000 µs round trip = 17 cm
        let reading = DistanceReading::from_echo(SensorId::One, 1000, 42, &limits);
        match reading.distance {
            Distance::Cm(cm) => assert!((cm - 17.0).abs() < 1e-9),
            Distance::Invalid => panic!("expected valid reading"),
        }
        assert_eq!(reading.timestamp, 42);
    }

    #[test]
    fn test_from_echo_timeout_is_invalid() {
        let limits = SensorLimits::default();
        let none = DistanceReading::from_echo(SensorId::Two, 0, 0, &limits);
        let late = DistanceReading::from_echo(SensorId::Two, 30_001, 0, &limits);
        assert_eq!(none.distance, Distance::Invalid);
        assert_eq!(late.distance, Distance::Invalid);
    }

    #[test]
    fn test_from_echo_out_of_range_is_invalid() {
        let limits = SensorLimits::default();
        // 100 µs = 1.7 cm, under the 2 cm floor
        let close = DistanceReading::from_echo(SensorId::One, 100, 0, &limits);
        // 29000 µs = 493 cm, over the 400 cm ceiling
        let far = DistanceReading::from_echo(SensorId::One, 29_000, 0, &limits);
        assert_eq!(close.distance, Distance::Invalid);
        assert_eq!(far.distance, Distance::Invalid);
    }

    #[test]
    fn test_invalid_is_never_present() {
        assert!(!Distance::Invalid.is_within(10.0));
        assert!(Distance::Cm(5.0).is_within(10.0));
        assert!(!Distance::Cm(10.0).is_within(10.0));
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Entry).unwrap(), "\"entry\"");
        assert_eq!(Direction::Exit.as_str(), "exit");
    }
}
