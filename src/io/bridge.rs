//! Serial sensor bridge
//!
//! A microcontroller on a serial line does the pulse timing and pin I/O. The
//! host talks to it with newline-terminated ASCII:
//! - `E<sensor> <echo_us>` inbound echo round-trip for sensor 1 or 2 (0 = no echo)
//! - `B<level>` inbound raw button line level (0 low, 1 high)
//! - `O<pin> <0|1>` outbound output pin drive
//!
//! The bridge task owns the port. The control loop only sees the handles:
//! latest samples through watch channels and pin writes through a bounded
//! queue, so nothing on the loop ever waits on serial I/O.

use crate::domain::types::{DistanceReading, Millis, SensorId, SensorLimits};
use crate::infra::config::Config;
use crate::io::sensor::DistanceSensor;
use anyhow::Context;
use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, OutputPin};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, trace, warn};

/// Queued pin writes before the bridge reports busy
const COMMAND_QUEUE_LEN: usize = 64;

/// A line longer than this without a newline is garbage
const MAX_LINE_LEN: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("malformed bridge line: {0:?}")]
    Malformed(String),
    #[error("bridge command queue full")]
    Busy,
    #[error("bridge task stopped")]
    Closed,
}

impl embedded_hal::digital::Error for BridgeError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// One decoded inbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeLine {
    Echo { sensor: SensorId, echo_us: u32 },
    Button { high: bool },
}

pub fn parse_line(line: &str) -> Result<BridgeLine, BridgeError> {
    let malformed = || BridgeError::Malformed(line.to_string());
    let line = line.trim();

    if let Some(rest) = line.strip_prefix('E') {
        let (sensor, echo) = rest.split_once(' ').ok_or_else(malformed)?;
        let sensor = sensor.parse::<u8>().ok().and_then(|n| SensorId::try_from(n).ok());
        let echo_us = echo.trim().parse::<u32>().ok();
        return match (sensor, echo_us) {
            (Some(sensor), Some(echo_us)) => Ok(BridgeLine::Echo { sensor, echo_us }),
            _ => Err(malformed()),
        };
    }

    if let Some(level) = line.strip_prefix('B') {
        return match level {
            "0" => Ok(BridgeLine::Button { high: false }),
            "1" => Ok(BridgeLine::Button { high: true }),
            _ => Err(malformed()),
        };
    }

    Err(malformed())
}

/// Outbound pin write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinCommand {
    pub pin: u8,
    pub high: bool,
}

impl PinCommand {
    pub fn encode(&self) -> String {
        format!("O{} {}\n", self.pin, u8::from(self.high))
    }
}

#[derive(Debug, Clone, Copy)]
struct EchoSample {
    echo_us: u32,
    received_at: Instant,
}

/// Serial port owner; run it as its own task
pub struct SerialBridge {
    device: String,
    echo_tx: [watch::Sender<Option<EchoSample>>; 2],
    button_tx: watch::Sender<bool>,
    cmd_rx: mpsc::Receiver<PinCommand>,
    /// Bytes received but not yet terminated by a newline
    read_buffer: Vec<u8>,
}

/// Loop-side view of the bridge
pub struct BridgeHandles {
    pub sensor_1: BridgeSensor,
    pub sensor_2: BridgeSensor,
    pub button: BridgeButton,
    cmd_tx: mpsc::Sender<PinCommand>,
}

impl BridgeHandles {
    /// Output pin driven through the bridge
    pub fn output(&self, pin: u8) -> BridgePin {
        BridgePin { pin, tx: self.cmd_tx.clone() }
    }
}

impl SerialBridge {
    pub fn new(config: &Config) -> (Self, BridgeHandles) {
        let limits = config.sensor_limits();
        let stale_after = Duration::from_millis(config.bridge_stale_after_ms());

        let (echo_1_tx, echo_1_rx) = watch::channel(None);
        let (echo_2_tx, echo_2_rx) = watch::channel(None);
        // Pull-up: released reads high
        let (button_tx, button_rx) = watch::channel(true);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_LEN);

        let bridge = Self {
            device: config.bridge_device().to_string(),
            echo_tx: [echo_1_tx, echo_2_tx],
            button_tx,
            cmd_rx,
            read_buffer: Vec::with_capacity(MAX_LINE_LEN),
        };

        let handles = BridgeHandles {
            sensor_1: BridgeSensor { sensor: SensorId::One, rx: echo_1_rx, limits, stale_after },
            sensor_2: BridgeSensor { sensor: SensorId::Two, rx: echo_2_rx, limits, stale_after },
            button: BridgeButton { rx: button_rx },
            cmd_tx,
        };

        (bridge, handles)
    }

    /// Open the configured serial device
    pub fn open_port(config: &Config) -> anyhow::Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(config.bridge_device(), config.bridge_baud())
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("Failed to open bridge device {}", config.bridge_device()))?;
        info!(device = %config.bridge_device(), baud = %config.bridge_baud(), "bridge_port_opened");
        Ok(port)
    }

    /// Pump the port until shutdown or until the port goes away
    pub async fn run<S>(mut self, port: S, mut shutdown: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!(device = %self.device, "bridge_started");

        let (mut reader, mut writer) = tokio::io::split(port);
        let mut buf = [0u8; 64];

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("bridge_shutdown");
                        return;
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    if let Err(e) = writer.write_all(cmd.encode().as_bytes()).await {
                        warn!(pin = %cmd.pin, error = %e, "bridge_write_error");
                    }
                }
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            error!(device = %self.device, "bridge_port_closed");
                            return;
                        }
                        Ok(n) => self.ingest(&buf[..n]),
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            error!(device = %self.device, error = %e, "bridge_read_error");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Append raw bytes and dispatch every complete line
    fn ingest(&mut self, bytes: &[u8]) {
        self.read_buffer.extend_from_slice(bytes);

        while let Some(end) = self.read_buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.read_buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                self.dispatch(line);
            }
        }

        if self.read_buffer.len() > MAX_LINE_LEN {
            debug!(discarded = self.read_buffer.len(), "bridge_line_overflow");
            self.read_buffer.clear();
        }
    }

    fn dispatch(&mut self, line: &str) {
        match parse_line(line) {
            Ok(BridgeLine::Echo { sensor, echo_us }) => {
                trace!(sensor = %sensor, echo_us = %echo_us, "bridge_echo");
                let sample = EchoSample { echo_us, received_at: Instant::now() };
                self.echo_tx[sensor.index()].send_replace(Some(sample));
            }
            Ok(BridgeLine::Button { high }) => {
                self.button_tx.send_if_modified(|level| {
                    let changed = *level != high;
                    *level = high;
                    changed
                });
            }
            Err(e) => warn!(error = %e, "bridge_line_malformed"),
        }
    }
}

/// Latest echo for one sensor, converted on demand
pub struct BridgeSensor {
    sensor: SensorId,
    rx: watch::Receiver<Option<EchoSample>>,
    limits: SensorLimits,
    stale_after: Duration,
}

impl BridgeSensor {
    fn reading_at(&self, now: Millis, clock: Instant) -> DistanceReading {
        let sample = *self.rx.borrow();
        match sample {
            Some(s) if clock.saturating_duration_since(s.received_at) <= self.stale_after => {
                DistanceReading::from_echo(self.sensor, s.echo_us, now, &self.limits)
            }
            _ => DistanceReading::invalid(self.sensor, now),
        }
    }
}

impl DistanceSensor for BridgeSensor {
    fn measure(&mut self, now: Millis) -> DistanceReading {
        self.reading_at(now, Instant::now())
    }
}

/// Raw button line as reported by the bridge
pub struct BridgeButton {
    rx: watch::Receiver<bool>,
}

impl ErrorType for BridgeButton {
    type Error = BridgeError;
}

impl InputPin for BridgeButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(*self.rx.borrow())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!*self.rx.borrow())
    }
}

/// Output pin on the bridge; writes never block
pub struct BridgePin {
    pin: u8,
    tx: mpsc::Sender<PinCommand>,
}

impl BridgePin {
    fn write(&mut self, high: bool) -> Result<(), BridgeError> {
        self.tx.try_send(PinCommand { pin: self.pin, high }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BridgeError::Busy,
            mpsc::error::TrySendError::Closed(_) => BridgeError::Closed,
        })
    }
}

impl ErrorType for BridgePin {
    type Error = BridgeError;
}

impl OutputPin for BridgePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Distance;

    #[test]
    fn test_parse_echo_line() {
        assert_eq!(
            parse_line("E1 580"),
            Ok(BridgeLine::Echo { sensor: SensorId::One, echo_us: 580 })
        );
        assert_eq!(
            parse_line("E2 0\r"),
            Ok(BridgeLine::Echo { sensor: SensorId::Two, echo_us: 0 })
        );
    }

    #[test]
    fn test_parse_button_line() {
        assert_eq!(parse_line("B0"), Ok(BridgeLine::Button { high: false }));
        assert_eq!(parse_line("B1"), Ok(BridgeLine::Button { high: true }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in ["", "E3 100", "E1", "E1 -5", "E1 abc", "B2", "X1 1", "O8 1"] {
            assert!(
                matches!(parse_line(line), Err(BridgeError::Malformed(_))),
                "accepted {line:?}"
            );
        }
    }

    #[test]
    fn test_pin_command_encoding() {
        assert_eq!(PinCommand { pin: 8, high: true }.encode(), "O8 1\n");
        assert_eq!(PinCommand { pin: 14, high: false }.encode(), "O14 0\n");
    }

    #[test]
    fn test_ingest_handles_split_lines() {
        let (mut bridge, handles) = SerialBridge::new(&Config::default());

        bridge.ingest(b"E1 5");
        assert!(handles.sensor_1.rx.borrow().is_none());

        bridge.ingest(b"80\nE2 0\n");
        assert_eq!(handles.sensor_1.rx.borrow().map(|s| s.echo_us), Some(580));
        assert_eq!(handles.sensor_2.rx.borrow().map(|s| s.echo_us), Some(0));
    }

    #[test]
    fn test_ingest_skips_bad_lines() {
        let (mut bridge, mut handles) = SerialBridge::new(&Config::default());

        bridge.ingest(b"garbage\nB0\n");
        assert_eq!(handles.button.is_low(), Ok(true));
    }

    #[test]
    fn test_overlong_line_discarded() {
        let (mut bridge, handles) = SerialBridge::new(&Config::default());

        bridge.ingest(&[b'x'; MAX_LINE_LEN + 1]);
        assert!(bridge.read_buffer.is_empty());

        bridge.ingest(b"E1 580\n");
        assert!(handles.sensor_1.rx.borrow().is_some());
    }

    #[test]
    fn test_sensor_reading_from_sample() {
        let (mut bridge, handles) = SerialBridge::new(&Config::default());
        bridge.ingest(b"E1 580\n");

        let now = Instant::now();
        let reading = handles.sensor_1.reading_at(42, now);
        assert_eq!(reading.sensor, SensorId::One);
        assert_eq!(reading.timestamp, 42);
        match reading.distance {
            Distance::Cm(cm) => assert!((cm - 9.86).abs() < 0.01),
            Distance::Invalid => panic!("expected a distance"),
        }
    }

    #[test]
    fn test_stale_sample_reads_invalid() {
        let (mut bridge, handles) = SerialBridge::new(&Config::default());
        bridge.ingest(b"E2 580\n");

        let later = Instant::now() + Duration::from_millis(501);
        assert_eq!(handles.sensor_2.reading_at(7, later).distance, Distance::Invalid);
    }

    #[test]
    fn test_no_sample_reads_invalid() {
        let (_bridge, mut handles) = SerialBridge::new(&Config::default());
        assert_eq!(handles.sensor_1.measure(0).distance, Distance::Invalid);
    }

    #[test]
    fn test_button_starts_released() {
        let (_bridge, mut handles) = SerialBridge::new(&Config::default());
        assert_eq!(handles.button.is_high(), Ok(true));
    }

    #[test]
    fn test_pin_write_when_bridge_gone() {
        let (bridge, handles) = SerialBridge::new(&Config::default());
        let mut pin = handles.output(8);
        drop(bridge);

        assert_eq!(pin.set_high(), Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn test_run_over_duplex_stream() {
        let (bridge, handles) = SerialBridge::new(&Config::default());
        let (host_side, mut device_side) = tokio::io::duplex(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(bridge.run(host_side, shutdown_rx));

        let mut pin = handles.output(8);
        pin.set_high().unwrap();

        let mut buf = [0u8; 16];
        let n = device_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"O8 1\n");

        let mut echo_rx = handles.sensor_1.rx.clone();
        device_side.write_all(b"E1 580\n").await.unwrap();
        echo_rx.changed().await.unwrap();
        assert_eq!(echo_rx.borrow().map(|s| s.echo_us), Some(580));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
