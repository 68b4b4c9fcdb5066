//! Lock-free counters for the sensing loop and its consumers
//!
//! Hot-path updates are single atomic ops. `report()` swaps the periodic
//! counters (tick latency) to zero and reads the monotonic ones.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistics only; no
//! control decision reads them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Tick latency bucket boundaries (microseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

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

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector shared by all tasks
pub struct Metrics {
    /// Total loop ticks (monotonic)
    ticks_total: AtomicU64,
    /// Ticks since last report (reset on report)
    ticks_since_report: AtomicU64,
    /// Sum of tick latencies (reset on report)
    tick_latency_sum_us: AtomicU64,
    /// Max tick latency (reset on report)
    tick_latency_max_us: AtomicU64,
    /// Tick latency histogram (reset on report)
    tick_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sensor reads that failed or returned an invalid range
    sensor_faults: AtomicU64,
    tickets_opened: AtomicU64,
    tickets_closed: AtomicU64,
    /// Departures cancelled because presence came back inside the grace window
    exits_cancelled: AtomicU64,
    gate_opens: AtomicU64,
    gate_closes: AtomicU64,
    /// Open requests refused because the lot was full
    gate_denials: AtomicU64,
    actuator_faults: AtomicU64,
    display_faults: AtomicU64,
    notifications_enqueued: AtomicU64,
    notifications_dropped: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    dashboard_requests: AtomicU64,
    dashboard_errors: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_since_report: AtomicU64::new(0),
            tick_latency_sum_us: AtomicU64::new(0),
            tick_latency_max_us: AtomicU64::new(0),
            tick_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sensor_faults: AtomicU64::new(0),
            tickets_opened: AtomicU64::new(0),
            tickets_closed: AtomicU64::new(0),
            exits_cancelled: AtomicU64::new(0),
            gate_opens: AtomicU64::new(0),
            gate_closes: AtomicU64::new(0),
            gate_denials: AtomicU64::new(0),
            actuator_faults: AtomicU64::new(0),
            display_faults: AtomicU64::new(0),
            notifications_enqueued: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            dashboard_requests: AtomicU64::new(0),
            dashboard_errors: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one completed loop tick
    #[inline]
    pub fn record_tick(&self, latency_us: u64) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.ticks_since_report.fetch_add(1, Ordering::Relaxed);
        self.tick_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.tick_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.tick_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_sensor_faults(&self, count: u64) {
        if count > 0 {
            self.sensor_faults.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_ticket_opened(&self) {
        self.tickets_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ticket_closed(&self) {
        self.tickets_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exit_cancelled(&self) {
        self.exits_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_open(&self) {
        self.gate_opens.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_close(&self) {
        self.gate_closes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_denied(&self) {
        self.gate_denials.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_actuator_fault(&self) {
        self.actuator_faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_display_fault(&self) {
        self.display_faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_enqueued(&self) {
        self.notifications_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dashboard_request(&self) {
        self.dashboard_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dashboard_error(&self) {
        self.dashboard_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sensor_faults(&self) -> u64 {
        self.sensor_faults.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn gate_denials(&self) -> u64 {
        self.gate_denials.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dashboard_requests(&self) -> u64 {
        self.dashboard_requests.load(Ordering::Relaxed)
    }

    /// Snapshot all counters and reset the periodic ones
    pub fn report(&self) -> MetricsSummary {
        let ticks = self.ticks_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.tick_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.tick_latency_max_us.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.tick_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ticks_per_sec = if elapsed.as_secs_f64() > 0.0 {
            ticks as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_per_sec,
            tick_avg_us: if ticks > 0 { latency_sum / ticks } else { 0 },
            tick_max_us: latency_max,
            tick_p99_us: percentile_from_buckets(&buckets, 0.99),
            sensor_faults: self.sensor_faults.load(Ordering::Relaxed),
            tickets_opened: self.tickets_opened.load(Ordering::Relaxed),
            tickets_closed: self.tickets_closed.load(Ordering::Relaxed),
            exits_cancelled: self.exits_cancelled.load(Ordering::Relaxed),
            gate_opens: self.gate_opens.load(Ordering::Relaxed),
            gate_closes: self.gate_closes.load(Ordering::Relaxed),
            gate_denials: self.gate_denials.load(Ordering::Relaxed),
            actuator_faults: self.actuator_faults.load(Ordering::Relaxed),
            display_faults: self.display_faults.load(Ordering::Relaxed),
            notifications_enqueued: self.notifications_enqueued.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            dashboard_requests: self.dashboard_requests.load(Ordering::Relaxed),
            dashboard_errors: self.dashboard_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_sec: f64,
    pub tick_avg_us: u64,
    pub tick_max_us: u64,
    pub tick_p99_us: u64,
    pub sensor_faults: u64,
    pub tickets_opened: u64,
    pub tickets_closed: u64,
    pub exits_cancelled: u64,
    pub gate_opens: u64,
    pub gate_closes: u64,
    pub gate_denials: u64,
    pub actuator_faults: u64,
    pub display_faults: u64,
    pub notifications_enqueued: u64,
    pub notifications_dropped: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub dashboard_requests: u64,
    pub dashboard_errors: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_sec = format!("{:.1}", self.ticks_per_sec),
            tick_avg_us = %self.tick_avg_us,
            tick_max_us = %self.tick_max_us,
            tick_p99_us = %self.tick_p99_us,
            sensor_faults = %self.sensor_faults,
            tickets_opened = %self.tickets_opened,
            tickets_closed = %self.tickets_closed,
            exits_cancelled = %self.exits_cancelled,
            gate_opens = %self.gate_opens,
            gate_denials = %self.gate_denials,
            notify_sent = %self.notifications_sent,
            notify_dropped = %self.notifications_dropped,
            notify_failed = %self.notifications_failed,
            dashboard_requests = %self.dashboard_requests,
            "metrics"
        );
    }
}
