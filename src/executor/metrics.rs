//! Lightweight counters tracking command completions and latency so the
//! tokio executor can expose aggregated snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct CommandMetrics {
    scheduled: AtomicU64,
    responses: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    canceled: AtomicU64,
    shutdown: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl CommandMetrics {
    pub(crate) fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self, latency: Duration) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.record_response(latency);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_canceled(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shutdown(&self) {
        self.shutdown.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CommandMetricsSnapshot {
        let responses = self.responses.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let average_latency_ms = if responses == 0 {
            0.0
        } else {
            (total_latency_ns as f64 / responses as f64) / 1_000_000.0
        };

        CommandMetricsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            responses,
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            shutdown: self.shutdown.load(Ordering::Relaxed),
            average_latency_ms,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CommandMetricsSnapshot {
    pub scheduled: u64,
    pub responses: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub canceled: u64,
    pub shutdown: u64,
    pub average_latency_ms: f64,
}

impl CommandMetricsSnapshot {
    /// Commands scheduled but not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.scheduled
            .saturating_sub(self.responses + self.canceled + self.shutdown)
    }
}
