//! Pool metrics
//!
//! Counters are kept twice: as local atomics (for [`PoolStatus`] snapshots)
//! and through the `metrics` facade, so whatever recorder the application
//! installs (Prometheus exporter, statsd, ...) picks them up.
//!
//! [`PoolStatus`]: crate::pool::PoolStatus

use metrics::{Counter, Gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric names exported by the pool
pub mod names {
    pub const RECORDS_ENQUEUED: &str = "rivven_pool_records_enqueued_total";
    pub const RECORDS_SENT: &str = "rivven_pool_records_sent_total";
    pub const RECORDS_FAILED: &str = "rivven_pool_records_failed_total";
    pub const SEND_FAILURES: &str = "rivven_pool_send_failures_total";
    pub const CONNECT_FAILURES: &str = "rivven_pool_connect_failures_total";
    pub const RECONNECTS: &str = "rivven_pool_reconnects_total";
    pub const RECORDS_LOST: &str = "rivven_pool_records_lost_total";
    pub const SCALE_ACTIONS: &str = "rivven_pool_scale_actions_total";
    pub const LIVE_WORKERS: &str = "rivven_pool_live_workers";
    pub const DESIRED_WORKERS: &str = "rivven_pool_desired_workers";
}

/// Metrics for one pool
pub struct PoolMetrics {
    records_enqueued: Counter,
    records_sent: Counter,
    records_failed: Counter,
    send_failures: Counter,
    connect_failures: Counter,
    reconnects: Counter,
    records_lost: Counter,
    scale_actions: Counter,
    live_workers: Gauge,
    desired_workers: Gauge,

    sent_total: AtomicU64,
    send_failures_total: AtomicU64,
    reconnects_total: AtomicU64,
}

impl PoolMetrics {
    /// Create metrics labelled with the sink name
    pub fn new(sink: &str) -> Self {
        let sink = sink.to_string();
        Self {
            records_enqueued: metrics::counter!(names::RECORDS_ENQUEUED, "sink" => sink.clone()),
            records_sent: metrics::counter!(names::RECORDS_SENT, "sink" => sink.clone()),
            records_failed: metrics::counter!(names::RECORDS_FAILED, "sink" => sink.clone()),
            send_failures: metrics::counter!(names::SEND_FAILURES, "sink" => sink.clone()),
            connect_failures: metrics::counter!(names::CONNECT_FAILURES, "sink" => sink.clone()),
            reconnects: metrics::counter!(names::RECONNECTS, "sink" => sink.clone()),
            records_lost: metrics::counter!(names::RECORDS_LOST, "sink" => sink.clone()),
            scale_actions: metrics::counter!(names::SCALE_ACTIONS, "sink" => sink.clone()),
            live_workers: metrics::gauge!(names::LIVE_WORKERS, "sink" => sink.clone()),
            desired_workers: metrics::gauge!(names::DESIRED_WORKERS, "sink" => sink),
            sent_total: AtomicU64::new(0),
            send_failures_total: AtomicU64::new(0),
            reconnects_total: AtomicU64::new(0),
        }
    }

    pub fn record_enqueued(&self) {
        self.records_enqueued.increment(1);
    }

    pub fn record_sent(&self, records: usize) {
        self.records_sent.increment(records as u64);
        self.sent_total.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self, records: usize) {
        self.send_failures.increment(1);
        self.records_failed.increment(records as u64);
        self.send_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.increment(1);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.increment(1);
        self.reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self, records: usize) {
        self.records_lost.increment(records as u64);
    }

    pub fn record_scale_action(&self, desired: usize) {
        self.scale_actions.increment(1);
        self.set_desired_workers(desired);
    }

    pub fn set_desired_workers(&self, desired: usize) {
        self.desired_workers.set(desired as f64);
    }

    pub fn set_live_workers(&self, live: usize) {
        self.live_workers.set(live as f64);
    }

    /// Records delivered since the pool started
    pub fn records_sent(&self) -> u64 {
        self.sent_total.load(Ordering::Relaxed)
    }

    /// Failed send calls since the pool started
    pub fn send_failures(&self) -> u64 {
        self.send_failures_total.load(Ordering::Relaxed)
    }

    /// Forced reconnects since the pool started
    pub fn reconnects(&self) -> u64 {
        self.reconnects_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_totals() {
        // No recorder installed: facade calls are no-ops, local totals still count
        let metrics = PoolMetrics::new("mock");
        metrics.record_sent(10);
        metrics.record_sent(5);
        metrics.record_send_failure(3);
        metrics.record_reconnect();

        assert_eq!(metrics.records_sent(), 15);
        assert_eq!(metrics.send_failures(), 1);
        assert_eq!(metrics.reconnects(), 1);
    }
}
