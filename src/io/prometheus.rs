//! Prometheus metrics HTTP endpoint
//!
//! `GET /metrics` renders the counters in Prometheus text format,
//! `GET /health` answers `ok` while the process is up.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a counter or gauge labelled with the device id
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    device: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    device: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{device=\"{device}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{device=\"{device}\"}} {count}");
}

fn format_prometheus_metrics(metrics: &Metrics, device: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_count_metrics(&mut output, device, &summary);
    write_detection_metrics(&mut output, device, &summary);
    write_link_metrics(&mut output, device, &summary);
    write_cycle_metrics(&mut output, device, &summary);

    output
}

fn write_count_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_count",
        "Current visitor count",
        MetricType::Gauge,
        device,
        summary.count,
    );
    write_metric(
        output,
        "visitor_entries_total",
        "Entries detected",
        MetricType::Counter,
        device,
        summary.entries_total,
    );
    write_metric(
        output,
        "visitor_exits_total",
        "Exits detected",
        MetricType::Counter,
        device,
        summary.exits_total,
    );
    write_metric(
        output,
        "visitor_underflows_total",
        "Exits absorbed at count zero",
        MetricType::Counter,
        device,
        summary.underflows_total,
    );
    write_metric(
        output,
        "visitor_resets_total",
        "Count resets from the button",
        MetricType::Counter,
        device,
        summary.resets_total,
    );
}

fn write_detection_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_readings_total",
        "Sensor readings taken",
        MetricType::Counter,
        device,
        summary.readings_total,
    );
    write_metric(
        output,
        "visitor_sensor_faults_total",
        "Readings that timed out or fell out of range",
        MetricType::Counter,
        device,
        summary.sensor_faults_total,
    );
    write_metric(
        output,
        "visitor_triggers_accepted_total",
        "Beam triggers that passed debounce",
        MetricType::Counter,
        device,
        summary.triggers_accepted_total,
    );
    write_metric(
        output,
        "visitor_triggers_debounced_total",
        "Beam triggers suppressed by debounce",
        MetricType::Counter,
        device,
        summary.triggers_debounced_total,
    );
    write_metric(
        output,
        "visitor_triggers_expired_total",
        "Pending triggers that timed out without a partner",
        MetricType::Counter,
        device,
        summary.triggers_expired_total,
    );
}

fn write_link_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_payloads_sent_total",
        "Telemetry payloads sent",
        MetricType::Counter,
        device,
        summary.payloads_sent_total,
    );
    write_metric(
        output,
        "visitor_payloads_dropped_total",
        "Telemetry payloads dropped on send failure",
        MetricType::Counter,
        device,
        summary.payloads_dropped_total,
    );
    write_metric(
        output,
        "visitor_link_health",
        "Radio link health (0=unknown, 1=up, 2=down)",
        MetricType::Gauge,
        device,
        summary.link_health,
    );
}

fn write_cycle_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_cycles_total",
        "Control cycles run",
        MetricType::Counter,
        device,
        summary.cycles_total,
    );
    write_histogram(
        output,
        "visitor_cycle_latency_us",
        "Control cycle latency in microseconds since the last report",
        device,
        &summary.cycle_lat_buckets,
        summary.cycle_lat_avg_us,
    );
    write_metric(
        output,
        "visitor_cycle_latency_p99_us",
        "99th percentile control cycle latency",
        MetricType::Gauge,
        device,
        summary.cycle_lat_p99_us,
    );
    write_metric(
        output,
        "visitor_cycle_latency_max_us",
        "Maximum control cycle latency",
        MetricType::Gauge,
        device,
        summary.cycle_lat_max_us,
    );
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    device: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut response =
                text_response(StatusCode::OK, format_prometheus_metrics(&metrics, &device));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            response
        }
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Serve the endpoint until shutdown
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    device_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let device_id = Arc::new(device_id);

    info!(port = %port, device = %device_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let device_id = device_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), device_id.clone())
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
