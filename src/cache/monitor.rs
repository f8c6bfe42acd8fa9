//! Cache health monitor.
//!
//! `health_check` runs, in order: a connectivity probe, latency sampling,
//! hit-rate, memory and breaker checks. Connectivity loss or an open breaker
//! make the cache unhealthy; any soft threshold violation degrades it.
//! Each check appends to a bounded history from which trends are derived.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::MonitorSettings;

use super::breaker::BreakerSnapshot;
use super::lock::mutex_lock;
use super::stats::StatsSnapshot;
use super::store::CacheStore;

const SOURCE: &str = "cache::monitor";
/// Relative change below which a metric counts as stable.
const TREND_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub latency_probes: usize,
    pub max_latency: Duration,
    pub min_hit_rate: f64,
    /// Hit rate is not judged until this many lookups were recorded.
    pub min_sample_size: u64,
    pub max_memory_ratio: f64,
    pub history_len: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            latency_probes: 5,
            max_latency: Duration::from_millis(50),
            min_hit_rate: 0.6,
            min_sample_size: 100,
            max_memory_ratio: 0.9,
            history_len: 60,
        }
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            latency_probes: settings.latency_probes.get(),
            max_latency: settings.max_latency,
            min_hit_rate: settings.min_hit_rate,
            min_sample_size: settings.min_sample_size,
            max_memory_ratio: settings.max_memory_ratio,
            history_len: settings.history_len.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthIssue {
    pub check: &'static str,
    pub severity: Severity,
    pub message: String,
    pub remediation: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Trends {
    pub hit_rate: Trend,
    pub latency: Trend,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub enabled: bool,
    pub backend: &'static str,
    pub connected: bool,
    pub latency_ms: Option<f64>,
    pub hit_rate: Option<f64>,
    pub memory_ratio: Option<f64>,
    pub breaker: BreakerSnapshot,
    pub stats: StatsSnapshot,
    pub issues: Vec<HealthIssue>,
    pub trends: Trends,
}

#[derive(Debug, Clone, Copy)]
struct HistoryPoint {
    hit_rate: Option<f64>,
    latency_ms: Option<f64>,
}

pub struct CacheMonitor {
    store: Arc<CacheStore>,
    config: MonitorConfig,
    history: Mutex<VecDeque<HistoryPoint>>,
}

impl CacheMonitor {
    pub fn new(store: Arc<CacheStore>, config: MonitorConfig) -> Self {
        Self {
            store,
            config,
            history: Mutex::default(),
        }
    }

    pub async fn health_check(&self) -> HealthReport {
        let mut issues = Vec::new();
        let enabled = self.store.is_enabled();

        let connected = if enabled {
            self.check_connectivity(&mut issues).await
        } else {
            false
        };
        let latency_ms = if connected {
            self.sample_latency(&mut issues).await
        } else {
            None
        };

        let stats = self.store.stats();
        let hit_rate = self.check_hit_rate(&stats, &mut issues);

        let memory_ratio = if connected {
            self.check_memory(&mut issues).await
        } else {
            None
        };

        let breaker = self.store.breaker();
        if breaker.is_open() {
            issues.push(HealthIssue {
                check: "breaker",
                severity: Severity::Critical,
                message: format!(
                    "circuit breaker is {} after {} consecutive failures",
                    breaker.state.as_str(),
                    breaker.consecutive_failures
                ),
                remediation: "Investigate backend failures; the breaker retries automatically after its open timeout",
            });
        }

        let status = status_for(&issues);
        let trends = self.push_history(HistoryPoint {
            hit_rate,
            latency_ms,
        });

        let report = HealthReport {
            status,
            checked_at: OffsetDateTime::now_utc(),
            enabled,
            backend: self.store.backend_name(),
            connected,
            latency_ms,
            hit_rate,
            memory_ratio,
            breaker,
            stats,
            issues,
            trends,
        };

        match status {
            HealthStatus::Healthy => debug!(status = ?status, "Cache health check"),
            HealthStatus::Degraded => info!(
                status = ?status,
                issues = report.issues.len(),
                "Cache health degraded"
            ),
            HealthStatus::Unhealthy => warn!(
                status = ?status,
                issues = report.issues.len(),
                "Cache unhealthy"
            ),
        }

        report
    }

    async fn check_connectivity(&self, issues: &mut Vec<HealthIssue>) -> bool {
        match self.store.probe().await {
            Ok(_) => true,
            Err(err) => {
                issues.push(HealthIssue {
                    check: "connectivity",
                    severity: Severity::Critical,
                    message: format!("backend unreachable: {err}"),
                    remediation: "Check that the cache server is running and reachable from this host",
                });
                false
            }
        }
    }

    async fn sample_latency(&self, issues: &mut Vec<HealthIssue>) -> Option<f64> {
        let mut samples = Vec::with_capacity(self.config.latency_probes);
        for _ in 0..self.config.latency_probes {
            if let Ok(elapsed) = self.store.probe().await {
                samples.push(elapsed.as_nanos() as f64 / 1_000_000.0);
            }
        }
        if samples.is_empty() {
            return None;
        }

        let avg_ms = samples.iter().sum::<f64>() / samples.len() as f64;
        let max_ms = self.config.max_latency.as_nanos() as f64 / 1_000_000.0;
        if avg_ms > max_ms {
            issues.push(HealthIssue {
                check: "latency",
                severity: Severity::Warning,
                message: format!("average probe latency {avg_ms:.2}ms exceeds {max_ms:.2}ms"),
                remediation: "Check network path and server load; consider a closer cache node",
            });
        }
        if samples.len() < self.config.latency_probes {
            issues.push(HealthIssue {
                check: "latency",
                severity: Severity::Warning,
                message: format!(
                    "{} of {} latency probes failed",
                    self.config.latency_probes - samples.len(),
                    self.config.latency_probes
                ),
                remediation: "Intermittent failures usually precede an outage; inspect server logs",
            });
        }
        Some(avg_ms)
    }

    fn check_hit_rate(&self, stats: &StatsSnapshot, issues: &mut Vec<HealthIssue>) -> Option<f64> {
        let hit_rate = stats.hit_rate()?;
        if stats.lookups() >= self.config.min_sample_size && hit_rate < self.config.min_hit_rate {
            issues.push(HealthIssue {
                check: "hit_rate",
                severity: Severity::Warning,
                message: format!(
                    "hit rate {:.1}% below {:.1}% over {} lookups",
                    hit_rate * 100.0,
                    self.config.min_hit_rate * 100.0,
                    stats.lookups()
                ),
                remediation: "Enable or widen cache warming, or raise freshness TTLs",
            });
        }
        Some(hit_rate)
    }

    async fn check_memory(&self, issues: &mut Vec<HealthIssue>) -> Option<f64> {
        let usage = match self.store.memory_usage().await {
            Ok(usage) => usage,
            Err(err) => {
                debug!(error = %err, "Memory usage unavailable");
                return None;
            }
        };
        let ratio = usage.ratio()?;
        if ratio > self.config.max_memory_ratio {
            issues.push(HealthIssue {
                check: "memory",
                severity: Severity::Warning,
                message: format!(
                    "memory usage at {:.1}% of {} bytes",
                    ratio * 100.0,
                    usage.max_bytes.unwrap_or_default()
                ),
                remediation: "Raise maxmemory, shorten TTLs, or configure an eviction policy",
            });
        }
        Some(ratio)
    }

    fn push_history(&self, point: HistoryPoint) -> Trends {
        let mut history = mutex_lock(&self.history, SOURCE, "push_history");
        if history.len() >= self.config.history_len.max(1) {
            history.pop_front();
        }
        history.push_back(point);

        let hit_rates: Vec<f64> = history.iter().filter_map(|p| p.hit_rate).collect();
        let latencies: Vec<f64> = history.iter().filter_map(|p| p.latency_ms).collect();
        Trends {
            hit_rate: trend(&hit_rates, true),
            latency: trend(&latencies, false),
        }
    }
}

fn status_for(issues: &[HealthIssue]) -> HealthStatus {
    match issues.iter().map(|issue| issue.severity).max() {
        Some(Severity::Critical) => HealthStatus::Unhealthy,
        Some(Severity::Warning) => HealthStatus::Degraded,
        None => HealthStatus::Healthy,
    }
}

/// Compare the mean of the older half of `values` with the newer half.
fn trend(values: &[f64], higher_is_better: bool) -> Trend {
    if values.len() < 2 {
        return Trend::Stable;
    }
    let (older, newer) = values.split_at(values.len() / 2);
    let mean = |slice: &[f64]| slice.iter().sum::<f64>() / slice.len() as f64;
    let (before, after) = (mean(older), mean(newer));

    let change = (after - before) / before.abs().max(f64::EPSILON);
    if change.abs() < TREND_TOLERANCE {
        Trend::Stable
    } else if (change > 0.0) == higher_is_better {
        Trend::Improving
    } else {
        Trend::Degrading
    }
}
