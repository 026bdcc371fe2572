//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the event loop, the alert session tasks and the
//! notification worker can all record without locking. All atomics use
//! Relaxed ordering: these are statistical counters only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
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

/// Swap all buckets to zero and return their values
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

    // Last bucket reports 2x the previous bound
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

/// Journey outcomes counted by the metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Arrived,
    Missed,
    Emergency,
    Cancelled,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Commands and position events handled by the journey loop (monotonic)
    events_total: AtomicU64,
    events_since_report: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Position fixes evaluated against the destination
    samples_total: AtomicU64,
    /// Fixes older than the latest one, ignored
    stale_samples_total: AtomicU64,
    /// "Permission denied" / "no fix" reports from the source
    fix_unavailable_total: AtomicU64,
    /// Position events dropped because the loop queue was full
    position_events_dropped: AtomicU64,
    alert_sessions_started: AtomicU64,
    alert_sessions_expired: AtomicU64,
    alert_sessions_stopped: AtomicU64,
    pulses_sent: AtomicU64,
    /// Actuator rejected the pulse (unsupported hardware etc.)
    pulses_failed: AtomicU64,
    notifications_enqueued: AtomicU64,
    notifications_dropped: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    notify_queue_delay_max_us: AtomicU64,
    journeys_started: AtomicU64,
    journeys_arrived: AtomicU64,
    journeys_missed: AtomicU64,
    journeys_emergency: AtomicU64,
    journeys_cancelled: AtomicU64,
    /// Rider actions or updates rejected for the current phase
    invalid_transitions: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            samples_total: AtomicU64::new(0),
            stale_samples_total: AtomicU64::new(0),
            fix_unavailable_total: AtomicU64::new(0),
            position_events_dropped: AtomicU64::new(0),
            alert_sessions_started: AtomicU64::new(0),
            alert_sessions_expired: AtomicU64::new(0),
            alert_sessions_stopped: AtomicU64::new(0),
            pulses_sent: AtomicU64::new(0),
            pulses_failed: AtomicU64::new(0),
            notifications_enqueued: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            notify_queue_delay_max_us: AtomicU64::new(0),
            journeys_started: AtomicU64::new(0),
            journeys_arrived: AtomicU64::new(0),
            journeys_missed: AtomicU64::new(0),
            journeys_emergency: AtomicU64::new(0),
            journeys_cancelled: AtomicU64::new(0),
            invalid_transitions: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an event was processed with given latency (lock-free)
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_sample(&self) {
        self.stale_samples_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_unavailable(&self) {
        self.fix_unavailable_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_event_dropped(&self) {
        self.position_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_started(&self) {
        self.alert_sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_expired(&self) {
        self.alert_sessions_expired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_stopped(&self) {
        self.alert_sessions_stopped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pulse(&self, ok: bool) {
        if ok {
            self.pulses_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.pulses_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_notification_enqueued(&self) {
        self.notifications_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatcher result and how long the command waited in the queue
    #[inline]
    pub fn record_notification_result(&self, ok: bool, queue_delay_us: u64) {
        if ok {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
        update_atomic_max(&self.notify_queue_delay_max_us, queue_delay_us);
    }

    #[inline]
    pub fn record_journey_started(&self) {
        self.journeys_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_journey_outcome(&self, outcome: OutcomeKind) {
        let counter = match outcome {
            OutcomeKind::Arrived => &self.journeys_arrived,
            OutcomeKind::Missed => &self.journeys_missed,
            OutcomeKind::Emergency => &self.journeys_emergency,
            OutcomeKind::Cancelled => &self.journeys_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_transition(&self) {
        self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pulses_sent(&self) -> u64 {
        self.pulses_sent.load(Ordering::Relaxed)
    }

    pub fn pulses_failed(&self) -> u64 {
        self.pulses_failed.load(Ordering::Relaxed)
    }

    pub fn notifications_enqueued(&self) -> u64 {
        self.notifications_enqueued.load(Ordering::Relaxed)
    }

    /// Generate a report and reset the windowed counters
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };

        let events = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let secs = elapsed.as_secs_f64();
        let events_per_sec = if secs > 0.0 { events as f64 / secs } else { 0.0 };
        let avg_process_latency_us = if events > 0 { latency_sum / events } else { 0 };

        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);

        MetricsSummary {
            events_total: load(&self.events_total),
            events_per_sec,
            avg_process_latency_us,
            max_process_latency_us: latency_max,
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            samples_total: load(&self.samples_total),
            stale_samples_total: load(&self.stale_samples_total),
            fix_unavailable_total: load(&self.fix_unavailable_total),
            position_events_dropped: load(&self.position_events_dropped),
            alert_sessions_started: load(&self.alert_sessions_started),
            alert_sessions_expired: load(&self.alert_sessions_expired),
            alert_sessions_stopped: load(&self.alert_sessions_stopped),
            pulses_sent: load(&self.pulses_sent),
            pulses_failed: load(&self.pulses_failed),
            notifications_enqueued: load(&self.notifications_enqueued),
            notifications_dropped: load(&self.notifications_dropped),
            notifications_sent: load(&self.notifications_sent),
            notifications_failed: load(&self.notifications_failed),
            notify_queue_delay_max_us: load(&self.notify_queue_delay_max_us),
            journeys_started: load(&self.journeys_started),
            journeys_arrived: load(&self.journeys_arrived),
            journeys_missed: load(&self.journeys_missed),
            journeys_emergency: load(&self.journeys_emergency),
            journeys_cancelled: load(&self.journeys_cancelled),
            invalid_transitions: load(&self.invalid_transitions),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p99_us: u64,
    pub samples_total: u64,
    pub stale_samples_total: u64,
    pub fix_unavailable_total: u64,
    pub position_events_dropped: u64,
    pub alert_sessions_started: u64,
    pub alert_sessions_expired: u64,
    pub alert_sessions_stopped: u64,
    pub pulses_sent: u64,
    pub pulses_failed: u64,
    pub notifications_enqueued: u64,
    pub notifications_dropped: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notify_queue_delay_max_us: u64,
    pub journeys_started: u64,
    pub journeys_arrived: u64,
    pub journeys_missed: u64,
    pub journeys_emergency: u64,
    pub journeys_cancelled: u64,
    pub invalid_transitions: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            p99_us = %self.lat_p99_us,
            samples = %self.samples_total,
            stale = %self.stale_samples_total,
            alerts = %self.alert_sessions_started,
            pulses = %self.pulses_sent,
            pulses_failed = %self.pulses_failed,
            notified = %self.notifications_sent,
            notify_failed = %self.notifications_failed,
            journeys = %self.journeys_started,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        let summary = metrics.report();
        assert_eq!(summary.events_total, 0);
        assert_eq!(summary.pulses_sent, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_record_event_and_report_resets_window() {
        let metrics = Metrics::new();
        metrics.record_event_processed(150);
        metrics.record_event_processed(250);

        let summary = metrics.report();
        assert_eq!(summary.events_total, 2);
        assert_eq!(summary.avg_process_latency_us, 200);
        assert_eq!(summary.max_process_latency_us, 250);

        let summary = metrics.report();
        assert_eq!(summary.events_total, 2);
        assert_eq!(summary.avg_process_latency_us, 0);
        assert_eq!(summary.max_process_latency_us, 0);
    }

    #[test]
    fn test_pulse_and_outcome_counters() {
        let metrics = Metrics::new();
        metrics.record_pulse(true);
        metrics.record_pulse(true);
        metrics.record_pulse(false);
        metrics.record_journey_outcome(OutcomeKind::Missed);
        metrics.record_journey_outcome(OutcomeKind::Emergency);

        let summary = metrics.report();
        assert_eq!(summary.pulses_sent, 2);
        assert_eq!(summary.pulses_failed, 1);
        assert_eq!(summary.journeys_missed, 1);
        assert_eq!(summary.journeys_emergency, 1);
        assert_eq!(summary.journeys_arrived, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(60000), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let mut buckets = [0u64; NUM_BUCKETS];
        buckets[0] = 90;
        buckets[5] = 10;
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 100);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 3200);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_pulse(true);
                        m.record_notification_enqueued();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.pulses_sent(), 4000);
        assert_eq!(metrics.notifications_enqueued(), 4000);
    }
}
