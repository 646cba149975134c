//! Metrics for the HA core
//!
//! Latency histograms per ownership-table statement, plus counters and
//! gauges for election transitions. Rendered in Prometheus text format.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Histogram bucket boundaries for statement latency (in seconds)
const DB_IO_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0];

/// Fixed-bucket histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, seconds: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| seconds <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            let le = self.boundaries.get(i).copied().unwrap_or(f64::INFINITY);
            result.push((le, cumulative));
        }
        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::with_buckets(&DB_IO_BUCKETS)
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics registry for one daemon process
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Per-statement latency, keyed by a short statement label
    db_io: Mutex<BTreeMap<String, Arc<Histogram>>>,

    pub db_errors: Counter,
    pub heartbeats: Counter,
    pub takeovers: Counter,
    pub heartbeat_timeouts: Counter,
    pub notifications: Counter,
    pub active: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the histogram for a statement
    pub fn db_io(&self, statement: &str) -> Arc<Histogram> {
        let mut db_io = self.db_io.lock().unwrap_or_else(|e| e.into_inner());
        db_io
            .entry(statement.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()))
            .clone()
    }

    pub fn record_db_io(&self, statement: &str, duration: Duration, success: bool) {
        self.db_io(statement).observe(duration.as_secs_f64());
        if !success {
            self.db_errors.inc();
        }
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let scalars: [(&str, &str, &str, u64); 6] = [
            ("monsync_ha_active", "gauge", "Whether this instance is active", self.active.get()),
            ("monsync_heartbeats_total", "counter", "Heartbeats processed", self.heartbeats.get()),
            ("monsync_takeovers_total", "counter", "Ownership takeovers", self.takeovers.get()),
            (
                "monsync_heartbeat_timeouts_total",
                "counter",
                "Failure-detection timer expirations",
                self.heartbeat_timeouts.get(),
            ),
            (
                "monsync_notifications_total",
                "counter",
                "Sync notifications delivered",
                self.notifications.get(),
            ),
            ("monsync_db_errors_total", "counter", "Failed statements", self.db_errors.get()),
        ];
        for (name, kind, help, value) in scalars {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP monsync_db_io_seconds Ownership table statement latency\n");
        out.push_str("# TYPE monsync_db_io_seconds histogram\n");
        let db_io = self.db_io.lock().unwrap_or_else(|e| e.into_inner());
        for (statement, hist) in db_io.iter() {
            for (le, count) in hist.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "monsync_db_io_seconds_bucket{{statement=\"{}\",le=\"{}\"}} {}",
                    statement, le, count
                );
            }
            let _ = writeln!(
                out,
                "monsync_db_io_seconds_sum{{statement=\"{}\"}} {}",
                statement,
                hist.sum()
            );
            let _ = writeln!(
                out,
                "monsync_db_io_seconds_count{{statement=\"{}\"}} {}",
                statement,
                hist.count()
            );
        }

        out
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
