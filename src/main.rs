//! Visitor counter - doorway crossing detection with radio telemetry
//!
//! Module structure:
//! - `domain/` - Readings, triggers, crossings
//! - `io/` - Sensor bridge, radio uplink, button, metrics endpoint
//! - `services/` - Detector, counter, feedback, telemetry, monitor
//! - `infra/` - Config and metrics

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use visitor_counter::infra::{Config, Metrics};
use visitor_counter::io::{
    start_metrics_server, ButtonInput, EdgeButton, MqttRadio, RadioLink, SerialBridge,
};
use visitor_counter::services::{DoorwayMonitor, FeedbackPins};

/// Two-beam doorway visitor counter
#[derive(Parser, Debug)]
#[command(
    name = "visitor-counter",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"),
    about
)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // An explicit path must load; the implicit one may fall back to defaults
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load(&[]),
    };

    // RUST_LOG wins over the config's debug switch
    let default_level = if config.debug_mode() { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let started_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    info!(
        version = %env!("CARGO_PKG_VERSION"),
        git = %env!("GIT_HASH"),
        started_at = %started_at,
        "visitor_counter_starting"
    );

    let features = config.features();
    info!(
        config_file = %config.config_file(),
        device_id = %config.device_id(),
        detection_distance_cm = %config.detection_distance_cm(),
        detection_timeout_ms = %config.detection_timeout_ms(),
        debounce_ms = %config.debounce_ms(),
        transmission_interval_ms = %config.transmission_interval_ms(),
        poll_interval_ms = %config.poll_interval_ms(),
        bridge_device = %config.bridge_device(),
        lora = %features.lora,
        buzzer = %features.buzzer,
        leds = %features.leds,
        reset_button = %features.reset_button,
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Sensor bridge owns the serial port; the loop only holds handles
    let port = SerialBridge::open_port(&config).context("Sensor bridge unavailable")?;
    let (bridge, handles) = SerialBridge::new(&config);
    tokio::spawn(bridge.run(port, shutdown_rx.clone()));

    let radio: Option<Box<dyn RadioLink>> =
        features.lora.then(|| Box::new(MqttRadio::new(&config)) as Box<dyn RadioLink>);

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let device_id = config.device_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_metrics_server(prometheus_port, prom_metrics, device_id, prom_shutdown).await
            {
                error!(error = %e, "prometheus_server_error");
            }
        });
    }

    let reporter_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
        }
    });

    let pins = config.pins();
    let feedback_pins = FeedbackPins {
        buzzer: handles.output(pins.buzzer),
        led_entry: handles.output(pins.led_entry),
        led_exit: handles.output(pins.led_exit),
        led_status: handles.output(pins.led_status),
    };
    let mut sensor_1 = handles.sensor_1;
    let mut sensor_2 = handles.sensor_2;
    let button: Box<dyn ButtonInput> = Box::new(EdgeButton::new(handles.button));

    let mut monitor =
        DoorwayMonitor::from_config(&config, feedback_pins, radio, Some(button), 0, metrics);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    monitor.run(&mut sensor_1, &mut sensor_2, config.poll_interval_ms(), shutdown_rx).await;

    info!("visitor_counter_shutdown_complete");
    Ok(())
}
