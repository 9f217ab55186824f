//! Per-endpoint circuit breaker.
//!
//! State machine:
//! - **closed** — calls pass. Counted failures increment a streak; any
//!   response (2xx–4xx) resets it. Streak ≥ threshold → **open**.
//! - **open** — calls fail fast. After `open_duration`, the next caller is
//!   admitted as a probe and the breaker moves to **half_open**.
//! - **half_open** — at most `half_open_probe_limit` concurrent probes.
//!   A probe success closes the breaker; a probe failure re-opens it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config & snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_probe_limit: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_probe_limit: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Observable breaker snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitState {
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_probes: u32,
}

/// Outcome of asking the breaker to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed. `probe` marks half-open trial calls whose outcome decides
    /// the breaker's fate.
    Allowed { probe: bool },
    /// Fail fast without touching the network.
    Rejected,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    status: BreakerStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    probes_in_flight: u32,
    trips: u64,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                status: BreakerStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_utc: None,
                probes_in_flight: 0,
                trips: 0,
            }),
        }
    }

    /// Gate a call before any network work.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.status {
            BreakerStatus::Closed => Admission::Allowed { probe: false },
            BreakerStatus::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    inner.status = BreakerStatus::HalfOpen;
                    inner.probes_in_flight = 1;
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected
                }
            }
            BreakerStatus::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_probe_limit {
                    inner.probes_in_flight += 1;
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Record an outcome the breaker does not count as a failure
    /// (2xx/3xx/4xx responses). Resets the failure streak; a successful
    /// probe closes the breaker.
    pub fn record_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        match inner.status {
            BreakerStatus::Closed => inner.consecutive_failures = 0,
            BreakerStatus::HalfOpen if probe => {
                inner.status = BreakerStatus::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.opened_at_utc = None;
                inner.probes_in_flight = 0;
            }
            _ => {}
        }
    }

    /// Record a counted failure (timeout, network error, 5xx).
    pub fn record_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        match inner.status {
            BreakerStatus::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    open(&mut inner);
                }
            }
            BreakerStatus::HalfOpen if probe => open(&mut inner),
            _ => {}
        }
    }

    /// Release a probe slot without recording an outcome (cancelled call).
    pub fn record_cancelled(&self, probe: bool) {
        if probe {
            let mut inner = self.inner.lock();
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        CircuitState {
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_utc,
            half_open_probes: inner.probes_in_flight,
        }
    }

    /// Total number of closed→open transitions.
    pub fn trips(&self) -> u64 {
        self.inner.lock().trips
    }
}

fn open(inner: &mut Inner) {
    inner.status = BreakerStatus::Open;
    inner.opened_at = Some(Instant::now());
    inner.opened_at_utc = Some(Utc::now());
    inner.probes_in_flight = 0;
    inner.trips += 1;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lazily created breakers keyed by (service, endpoint).
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<(String, String), Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        service: &str,
        endpoint: &str,
        config: &BreakerConfig,
    ) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read();
            if let Some(b) = breakers.get(&(service.to_owned(), endpoint.to_owned())) {
                return b.clone();
            }
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry((service.to_owned(), endpoint.to_owned()))
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config.clone())))
            .clone()
    }

    /// Snapshot every known breaker for the status endpoint.
    pub fn snapshot(&self) -> Vec<(String, String, CircuitState)> {
        let breakers = self.breakers.read();
        let mut out: Vec<_> = breakers
            .iter()
            .map(|((svc, ep), b)| (svc.clone(), ep.clone(), b.state()))
            .collect();
        out.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, open_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_millis(open_ms),
            half_open_probe_limit: 1,
        }
    }

    #[test]
    fn closed_allows_calls() {
        let b = CircuitBreaker::new(config(3, 1000));
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: false });
        assert_eq!(b.state().status, BreakerStatus::Closed);
    }

    #[test]
    fn opens_after_threshold_failures() {
        let b = CircuitBreaker::new(config(3, 60_000));
        for _ in 0..2 {
            b.record_failure(false);
            assert_eq!(b.state().status, BreakerStatus::Closed);
        }
        b.record_failure(false);
        assert_eq!(b.state().status, BreakerStatus::Open);
        assert!(b.state().opened_at.is_some());
        assert_eq!(b.try_acquire(), Admission::Rejected);
        assert_eq!(b.trips(), 1);
    }

    #[test]
    fn success_resets_failure_streak() {
        let b = CircuitBreaker::new(config(3, 60_000));
        b.record_failure(false);
        b.record_failure(false);
        b.record_success(false);
        b.record_failure(false);
        b.record_failure(false);
        // Streak never reached 3 consecutively.
        assert_eq!(b.state().status, BreakerStatus::Closed);
    }

    #[test]
    fn open_transitions_to_half_open_after_cooldown() {
        let b = CircuitBreaker::new(config(1, 0));
        b.record_failure(false);
        assert_eq!(b.state().status, BreakerStatus::Open);

        // open_duration is zero, so the next acquire is a probe.
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: true });
        assert_eq!(b.state().status, BreakerStatus::HalfOpen);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let b = CircuitBreaker::new(config(1, 0));
        b.record_failure(false);
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: true });
        // Probe limit is 1; further calls fail fast while the probe flies.
        assert_eq!(b.try_acquire(), Admission::Rejected);
    }

    #[test]
    fn probe_success_closes() {
        let b = CircuitBreaker::new(config(1, 0));
        b.record_failure(false);
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: true });
        b.record_success(true);
        assert_eq!(b.state().status, BreakerStatus::Closed);
        assert_eq!(b.state().consecutive_failures, 0);
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: false });
    }

    #[test]
    fn probe_failure_reopens() {
        let b = CircuitBreaker::new(config(1, 0));
        b.record_failure(false);
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: true });
        b.record_failure(true);
        assert_eq!(b.state().status, BreakerStatus::Open);
        assert_eq!(b.trips(), 2);
    }

    #[test]
    fn cancelled_probe_releases_slot() {
        let b = CircuitBreaker::new(config(1, 0));
        b.record_failure(false);
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: true });
        b.record_cancelled(true);
        // Slot released; breaker still half-open and admits a new probe.
        assert_eq!(b.state().status, BreakerStatus::HalfOpen);
        assert_eq!(b.try_acquire(), Admission::Allowed { probe: true });
    }

    #[test]
    fn registry_reuses_breakers_per_endpoint() {
        let reg = BreakerRegistry::new();
        let cfg = BreakerConfig::default();
        let a = reg.get_or_create("svc", "/x", &cfg);
        let b = reg.get_or_create("svc", "/x", &cfg);
        let c = reg.get_or_create("svc", "/y", &cfg);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn registry_snapshot_sorted() {
        let reg = BreakerRegistry::new();
        let cfg = BreakerConfig::default();
        reg.get_or_create("b-svc", "/x", &cfg);
        reg.get_or_create("a-svc", "/y", &cfg);
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, "a-svc");
    }
}
