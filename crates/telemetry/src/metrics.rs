//! In-process pipeline metrics.
//!
//! Counters are process-wide atomics; `snapshot()` is logged by the host
//! binary on shutdown and exposed to tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

/// Histogram for render latency in microseconds.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 50us .. 100ms
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [
        50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 16_000, 50_000, 100_000,
    ];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, micros: u64) {
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let slot = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Returns (upper bound, count) pairs.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the monitor pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    // Capture
    pub events_captured: Counter,
    pub events_duplicate: Counter,
    pub events_evicted: Counter,

    // Overlay
    pub renders_full: Counter,
    pub renders_prepend: Counter,
    pub render_latency_us: Histogram,

    // Persistence
    pub persist_writes: Counter,
    pub persist_failures: Counter,
    pub persist_loaded: Counter,

    // Messaging
    pub messages_handled: Counter,
    pub messages_unhandled: Counter,
    pub messages_failed: Counter,
    pub messages_dropped: Counter,

    // Gauges
    pub active_sessions: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            events_captured: self.events_captured.get(),
            events_duplicate: self.events_duplicate.get(),
            events_evicted: self.events_evicted.get(),
            renders_full: self.renders_full.get(),
            renders_prepend: self.renders_prepend.get(),
            render_latency_mean_us: self.render_latency_us.mean(),
            persist_writes: self.persist_writes.get(),
            persist_failures: self.persist_failures.get(),
            persist_loaded: self.persist_loaded.get(),
            messages_handled: self.messages_handled.get(),
            messages_unhandled: self.messages_unhandled.get(),
            messages_failed: self.messages_failed.get(),
            messages_dropped: self.messages_dropped.get(),
            active_sessions: self.active_sessions.get(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub events_captured: u64,
    pub events_duplicate: u64,
    pub events_evicted: u64,
    pub renders_full: u64,
    pub renders_prepend: u64,
    pub render_latency_mean_us: f64,
    pub persist_writes: u64,
    pub persist_failures: u64,
    pub persist_loaded: u64,
    pub messages_handled: u64,
    pub messages_unhandled: u64,
    pub messages_failed: u64,
    pub messages_dropped: u64,
    pub active_sessions: u64,
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
