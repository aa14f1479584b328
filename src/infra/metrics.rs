//! Lock-free metrics collection and periodic reporting
//!
//! The control loop records into atomics; the reporter task and the
//! Prometheus endpoint read them from other tasks. Reporting swaps the
//! per-interval counters back to zero.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must not drive any counting logic.

use crate::domain::types::LinkHealth;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for control cycle latency (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Sensor readings taken (monotonic)
    readings_total: AtomicU64,
    /// Readings that came back invalid (timeout or out of range)
    sensor_faults_total: AtomicU64,
    /// Triggers that passed debounce
    triggers_accepted_total: AtomicU64,
    /// Triggers suppressed by debounce
    triggers_debounced_total: AtomicU64,
    /// Pending triggers that expired without a partner
    triggers_expired_total: AtomicU64,
    entries_total: AtomicU64,
    exits_total: AtomicU64,
    /// Exits absorbed at count zero
    underflows_total: AtomicU64,
    resets_total: AtomicU64,
    payloads_sent_total: AtomicU64,
    payloads_dropped_total: AtomicU64,
    /// Current visitor count (gauge)
    count: AtomicU64,
    /// Link health gauge (0=unknown, 1=up, 2=down)
    link_health: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    cycles_total: AtomicU64,
    cycle_latency_sum_us: AtomicU64,
    cycle_latency_max_us: AtomicU64,
    cycle_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            readings_total: AtomicU64::new(0),
            sensor_faults_total: AtomicU64::new(0),
            triggers_accepted_total: AtomicU64::new(0),
            triggers_debounced_total: AtomicU64::new(0),
            triggers_expired_total: AtomicU64::new(0),
            entries_total: AtomicU64::new(0),
            exits_total: AtomicU64::new(0),
            underflows_total: AtomicU64::new(0),
            resets_total: AtomicU64::new(0),
            payloads_sent_total: AtomicU64::new(0),
            payloads_dropped_total: AtomicU64::new(0),
            count: AtomicU64::new(0),
            link_health: AtomicU64::new(LinkHealth::Unknown.as_gauge()),
            cycles_since_report: AtomicU64::new(0),
            cycles_total: AtomicU64::new(0),
            cycle_latency_sum_us: AtomicU64::new(0),
            cycle_latency_max_us: AtomicU64::new(0),
            cycle_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_reading(&self, valid: bool) {
        self.readings_total.fetch_add(1, Ordering::Relaxed);
        if !valid {
            self.sensor_faults_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_trigger_accepted(&self) {
        self.triggers_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trigger_debounced(&self) {
        self.triggers_debounced_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_triggers_expired(&self, n: u64) {
        self.triggers_expired_total.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_entry(&self) {
        self.entries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exit(&self) {
        self.exits_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_underflow(&self) {
        self.underflows_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reset(&self) {
        self.resets_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_payload(&self, sent: bool) {
        if sent {
            self.payloads_sent_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.payloads_dropped_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_count(&self, count: u32) {
        self.count.store(u64::from(count), Ordering::Relaxed);
    }

    #[inline]
    pub fn set_link_health(&self, health: LinkHealth) {
        self.link_health.store(health.as_gauge(), Ordering::Relaxed);
    }

    /// Record one control cycle and how long it took
    #[inline]
    pub fn record_cycle(&self, latency_us: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.cycle_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.cycle_latency_max_us, latency_us);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn entries_total(&self) -> u64 {
        self.entries_total.load(Ordering::Relaxed)
    }

    pub fn exits_total(&self) -> u64 {
        self.exits_total.load(Ordering::Relaxed)
    }

    /// Take a snapshot, resetting the per-interval cycle statistics
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Take a snapshot without disturbing the reporter's interval
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            if reset {
                *last = now;
            }
            elapsed
        };

        let take = |value: &AtomicU64| {
            if reset {
                value.swap(0, Ordering::Relaxed)
            } else {
                value.load(Ordering::Relaxed)
            }
        };
        let cycles = take(&self.cycles_since_report);
        let latency_sum = take(&self.cycle_latency_sum_us);
        let latency_max = take(&self.cycle_latency_max_us);
        let cycle_lat_buckets = if reset {
            swap_buckets(&self.cycle_latency_buckets)
        } else {
            std::array::from_fn(|i| self.cycle_latency_buckets[i].load(Ordering::Relaxed))
        };

        let cycles_per_sec = if elapsed_secs > 0.0 { cycles as f64 / elapsed_secs } else { 0.0 };
        let avg_latency = if cycles > 0 { latency_sum / cycles } else { 0 };

        MetricsSummary {
            readings_total: self.readings_total.load(Ordering::Relaxed),
            sensor_faults_total: self.sensor_faults_total.load(Ordering::Relaxed),
            triggers_accepted_total: self.triggers_accepted_total.load(Ordering::Relaxed),
            triggers_debounced_total: self.triggers_debounced_total.load(Ordering::Relaxed),
            triggers_expired_total: self.triggers_expired_total.load(Ordering::Relaxed),
            entries_total: self.entries_total.load(Ordering::Relaxed),
            exits_total: self.exits_total.load(Ordering::Relaxed),
            underflows_total: self.underflows_total.load(Ordering::Relaxed),
            resets_total: self.resets_total.load(Ordering::Relaxed),
            payloads_sent_total: self.payloads_sent_total.load(Ordering::Relaxed),
            payloads_dropped_total: self.payloads_dropped_total.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            link_health: self.link_health.load(Ordering::Relaxed),
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_per_sec,
            cycle_lat_avg_us: avg_latency,
            cycle_lat_max_us: latency_max,
            cycle_lat_p50_us: percentile_from_buckets(&cycle_lat_buckets, 0.50),
            cycle_lat_p99_us: percentile_from_buckets(&cycle_lat_buckets, 0.99),
            cycle_lat_buckets,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the Prometheus endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub readings_total: u64,
    pub sensor_faults_total: u64,
    pub triggers_accepted_total: u64,
    pub triggers_debounced_total: u64,
    pub triggers_expired_total: u64,
    pub entries_total: u64,
    pub exits_total: u64,
    pub underflows_total: u64,
    pub resets_total: u64,
    pub payloads_sent_total: u64,
    pub payloads_dropped_total: u64,
    pub count: u64,
    /// Link health gauge (0=unknown, 1=up, 2=down)
    pub link_health: u64,
    pub cycles_total: u64,
    pub cycles_per_sec: f64,
    pub cycle_lat_avg_us: u64,
    pub cycle_lat_max_us: u64,
    pub cycle_lat_p50_us: u64,
    pub cycle_lat_p99_us: u64,
    /// Control cycle latency histogram
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub cycle_lat_buckets: [u64; NUM_BUCKETS],
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            count = %self.count,
            entries = %self.entries_total,
            exits = %self.exits_total,
            sensor_faults = %self.sensor_faults_total,
            debounced = %self.triggers_debounced_total,
            expired = %self.triggers_expired_total,
            payloads_sent = %self.payloads_sent_total,
            payloads_dropped = %self.payloads_dropped_total,
            cycles_per_sec = format!("{:.1}", self.cycles_per_sec),
            cycle_p99_us = %self.cycle_lat_p99_us,
            "metrics"
        );
    }
}
