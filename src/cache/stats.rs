//! Rolling cache statistics.
//!
//! Counters and the latency window live behind one mutex so a snapshot is
//! never torn between fields.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::stats";

const METRIC_HIT_TOTAL: &str = "dashcache_store_hit_total";
const METRIC_MISS_TOTAL: &str = "dashcache_store_miss_total";
const METRIC_ERROR_TOTAL: &str = "dashcache_store_error_total";
const METRIC_REJECTED_TOTAL: &str = "dashcache_store_rejected_total";

#[derive(Debug, Default)]
struct StatsInner {
    hits: u64,
    misses: u64,
    errors: u64,
    rejected: u64,
    bytes_read: u64,
    bytes_written: u64,
    bytes_saved: u64,
    latencies: VecDeque<Duration>,
}

#[derive(Debug)]
pub struct CacheStats {
    window: usize,
    inner: Mutex<StatsInner>,
}

/// Latency percentiles over the rolling window, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Backend failures; not counted as misses.
    pub errors: u64,
    /// Calls short-circuited by the open breaker; not counted as misses.
    pub rejected: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_saved: u64,
    pub latency: LatencySummary,
}

impl StatsSnapshot {
    /// Reads that reached a verdict, excluding outages.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// `hits / (hits + misses)`, or `None` before any lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let lookups = self.lookups();
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }

    /// Share of attempted backend calls that failed.
    pub fn error_rate(&self) -> Option<f64> {
        let attempts = self.hits + self.misses + self.errors;
        (attempts > 0).then(|| self.errors as f64 / attempts as f64)
    }
}

impl CacheStats {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            inner: Mutex::default(),
        }
    }

    pub fn record_hit(&self, bytes: usize, latency: Duration) {
        counter!(METRIC_HIT_TOTAL).increment(1);
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_hit");
        inner.hits += 1;
        inner.bytes_read += bytes as u64;
        self.push_latency(&mut inner, latency);
    }

    pub fn record_miss(&self, latency: Duration) {
        counter!(METRIC_MISS_TOTAL).increment(1);
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_miss");
        inner.misses += 1;
        self.push_latency(&mut inner, latency);
    }

    pub fn record_write(&self, bytes_written: usize, bytes_saved: usize, latency: Duration) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_write");
        inner.bytes_written += bytes_written as u64;
        inner.bytes_saved += bytes_saved as u64;
        self.push_latency(&mut inner, latency);
    }

    /// Record a successful call that is neither a read nor a write.
    pub fn record_latency(&self, latency: Duration) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_latency");
        self.push_latency(&mut inner, latency);
    }

    pub fn record_error(&self, op: &'static str, kind: &'static str) {
        counter!(METRIC_ERROR_TOTAL, "op" => op, "kind" => kind).increment(1);
        mutex_lock(&self.inner, SOURCE, "record_error").errors += 1;
    }

    pub fn record_rejected(&self, op: &'static str) {
        counter!(METRIC_REJECTED_TOTAL, "op" => op).increment(1);
        mutex_lock(&self.inner, SOURCE, "record_rejected").rejected += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = mutex_lock(&self.inner, SOURCE, "snapshot");
        StatsSnapshot {
            hits: inner.hits,
            misses: inner.misses,
            errors: inner.errors,
            rejected: inner.rejected,
            bytes_read: inner.bytes_read,
            bytes_written: inner.bytes_written,
            bytes_saved: inner.bytes_saved,
            latency: summarize(&inner.latencies),
        }
    }

    pub fn reset(&self) {
        *mutex_lock(&self.inner, SOURCE, "reset") = StatsInner::default();
    }

    fn push_latency(&self, inner: &mut StatsInner, latency: Duration) {
        if inner.latencies.len() == self.window {
            inner.latencies.pop_front();
        }
        inner.latencies.push_back(latency);
    }
}

fn summarize(samples: &VecDeque<Duration>) -> LatencySummary {
    if samples.is_empty() {
        return LatencySummary::default();
    }

    let mut sorted: Vec<f64> = samples
        .iter()
        .map(|sample| sample.as_nanos() as f64 / 1_000_000.0)
        .collect();
    sorted.sort_by(f64::total_cmp);

    let avg_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
    LatencySummary {
        samples: sorted.len(),
        avg_ms,
        p50_ms: percentile(&sorted, 50.0),
        p95_ms: percentile(&sorted, 95.0),
        p99_ms: percentile(&sorted, 99.0),
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
