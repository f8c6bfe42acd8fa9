//! Circuit breaker guarding the fast-path backend.
//!
//! Closed admits every call. After `failure_threshold` consecutive failures
//! the breaker opens and rejects calls without touching the backend. Once
//! `open_timeout` has elapsed a single trial call is admitted (half-open):
//! success closes the breaker, failure re-opens it and restarts the timeout.
//!
//! All transitions happen under one mutex which is never held across an
//! await. Callers obtain a [`Permit`] before the backend call and settle it
//! afterwards; a trial permit dropped without being settled re-opens the
//! breaker so a cancelled probe cannot leave it stuck half-open.

use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::config::BreakerConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::breaker";
const METRIC_BREAKER_OPEN_TOTAL: &str = "dashcache_breaker_open_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time since the breaker last opened, if it is not closed.
    #[serde(skip)]
    pub open_for: Option<Duration>,
}

impl BreakerSnapshot {
    /// True while calls are being rejected or a trial is in flight.
    pub fn is_open(&self) -> bool {
        self.state != CircuitState::Closed
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Ask for permission to call the backend.
    ///
    /// Returns `None` when the call must be short-circuited.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "try_acquire");
        match inner.state {
            CircuitState::Closed => Some(Permit::new(self, false)),
            CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed < self.config.open_timeout {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                info!(
                    consecutive_failures = inner.consecutive_failures,
                    "Circuit breaker half-open, admitting trial call"
                );
                Some(Permit::new(self, true))
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = mutex_lock(&self.inner, SOURCE, "snapshot");
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            open_for: inner.opened_at.map(|opened| opened.elapsed()),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    fn on_success(&self, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "on_success");
        if trial {
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            info!("Circuit breaker closed after successful trial call");
            return;
        }
        // A late success from before the breaker opened says nothing about now.
        if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "on_failure");
        if trial {
            Self::open(&mut inner, "trial_failed");
            return;
        }
        if inner.state != CircuitState::Closed {
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.consecutive_failures >= self.config.failure_threshold {
            Self::open(&mut inner, "threshold_reached");
        }
    }

    fn on_abandoned_trial(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "on_abandoned_trial");
        if inner.state == CircuitState::HalfOpen {
            Self::open(&mut inner, "trial_abandoned");
        }
    }

    fn open(inner: &mut BreakerState, reason: &'static str) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        counter!(METRIC_BREAKER_OPEN_TOTAL, "reason" => reason).increment(1);
        warn!(
            reason,
            consecutive_failures = inner.consecutive_failures,
            "Circuit breaker opened, fast-path cache bypassed"
        );
    }
}

/// Admission ticket for one backend call.
///
/// Settle it with [`Permit::succeed`] or [`Permit::fail`] once the call
/// finishes.
#[must_use = "an unsettled trial permit re-opens the breaker"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_abandoned_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            open_timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn fail_times(breaker: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            breaker.try_acquire().expect("closed breaker admits").fail();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_exactly_threshold_failures() {
        let breaker = breaker(3, 60);

        fail_times(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail_times(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let breaker = breaker(3, 60);

        fail_times(&breaker, 2);
        breaker.try_acquire().expect("admitted").succeed();
        fail_times(&breaker, 2);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_single_trial_after_timeout() {
        let breaker = breaker(1, 60);
        fail_times(&breaker, 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = breaker.try_acquire().expect("trial admitted");
        assert!(trial.is_trial());
        assert!(breaker.try_acquire().is_none(), "only one trial at a time");

        trial.succeed();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_with_counter_unchanged() {
        let breaker = breaker(2, 30);
        fail_times(&breaker, 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        breaker.try_acquire().expect("trial admitted").fail();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_failures, 2);
        assert_eq!(snapshot.open_for, Some(Duration::ZERO));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(breaker.try_acquire().is_none(), "timeout restarted");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_reopens_breaker() {
        let breaker = breaker(1, 10);
        fail_times(&breaker, 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        drop(breaker.try_acquire().expect("trial admitted"));

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_success_does_not_close_open_breaker() {
        let breaker = breaker(1, 60);
        let early = breaker.try_acquire().expect("admitted");
        fail_times(&breaker, 1);

        early.succeed();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
