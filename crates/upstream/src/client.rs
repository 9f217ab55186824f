//! Retry engine with an overall deadline, gated by circuit breakers.
//!
//! One [`UpstreamClient`] exists per process, wrapping one pooled
//! `reqwest::Client`. Callers describe the attempt with a request-builder
//! closure so retries rebuild the request from scratch.
//!
//! * Only idempotent requests are retried.
//! * 5xx, timeouts, and connection errors are transient and counted by the
//!   breaker; 4xx is permanent, never retried, and resets the breaker's
//!   failure streak (the service answered).
//! * `overall_timeout` caps total wall time including backoff sleeps.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use guru_domain::backoff::RetryBackoff;
use guru_domain::cancel::CancelToken;
use guru_domain::config::UpstreamConfig;

use crate::breaker::{Admission, BreakerConfig, BreakerRegistry, CircuitState};
use crate::error::{from_reqwest, UpstreamError};

/// How many recent call records are retained for observability.
const CALL_LOG_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-endpoint settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub overall_timeout: Duration,
    pub max_retries: u32,
    pub breaker: BreakerConfig,
}

impl From<&UpstreamConfig> for EndpointConfig {
    fn from(cfg: &UpstreamConfig) -> Self {
        Self {
            overall_timeout: cfg.overall_timeout(),
            max_retries: cfg.max_retries,
            breaker: BreakerConfig {
                failure_threshold: cfg.failure_threshold,
                open_duration: cfg.open_duration(),
                half_open_probe_limit: cfg.half_open_probe_limit,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    Timeout,
    HttpError,
    NetworkError,
    Cancelled,
}

/// One attempt against an external service. Never exposed to clients
/// directly; summarized by the integration-status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamCall {
    pub service: String,
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: CallStatus,
    pub attempt_index: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EndpointCounters {
    pub calls: u64,
    pub failures: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct UpstreamClient {
    http: reqwest::Client,
    breakers: BreakerRegistry,
    backoff: RetryBackoff,
    calls: Mutex<VecDeque<UpstreamCall>>,
    counters: RwLock<HashMap<(String, String), EndpointCounters>>,
}

impl UpstreamClient {
    /// Build the shared client. `connect_timeout` applies to every
    /// endpoint (the per-endpoint knob that varies is the overall
    /// deadline).
    pub fn new(connect_timeout: Duration) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            http,
            breakers: BreakerRegistry::new(),
            backoff: RetryBackoff::default(),
            calls: Mutex::new(VecDeque::new()),
            counters: RwLock::new(HashMap::new()),
        })
    }

    /// Execute a call against `(service, endpoint)` with breaker gating,
    /// retries, and the overall deadline.
    pub async fn call(
        &self,
        service: &str,
        endpoint: &str,
        cfg: &EndpointConfig,
        idempotent: bool,
        cancel: &CancelToken,
        build_request: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, UpstreamError> {
        let breaker = self
            .breakers
            .get_or_create(service, endpoint, &cfg.breaker);

        let probe = match breaker.try_acquire() {
            Admission::Allowed { probe } => probe,
            Admission::Rejected => {
                tracing::debug!(service, endpoint, "circuit open, failing fast");
                return Err(UpstreamError::CircuitOpen {
                    service: service.to_owned(),
                    endpoint: endpoint.to_owned(),
                });
            }
        };

        let deadline = Instant::now() + cfg.overall_timeout;
        let max_attempts = if idempotent { cfg.max_retries + 1 } else { 1 };
        let mut last_err: Option<UpstreamError> = None;

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                breaker.record_cancelled(probe);
                self.record(service, endpoint, CallStatus::Cancelled, attempt, Utc::now());
                return Err(UpstreamError::Cancelled);
            }

            if attempt > 0 {
                let delay = self.backoff.delay_for_attempt(attempt - 1);
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    break;
                };
                if delay >= remaining {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_cancelled(cancel) => {
                        breaker.record_cancelled(probe);
                        return Err(UpstreamError::Cancelled);
                    }
                }
            }

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => break,
            };

            let started_at = Utc::now();
            let send = build_request(&self.http).timeout(remaining).send();
            let result = tokio::select! {
                r = send => r,
                _ = wait_cancelled(cancel) => {
                    // In-flight request dropped; a late response is discarded.
                    breaker.record_cancelled(probe);
                    self.record(service, endpoint, CallStatus::Cancelled, attempt, started_at);
                    return Err(UpstreamError::Cancelled);
                }
            };

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        breaker.record_failure(probe);
                        self.record(service, endpoint, CallStatus::HttpError, attempt, started_at);
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(UpstreamError::Http5xx {
                            status: status.as_u16(),
                            message: body,
                        });
                        if probe || breaker_is_open(&breaker) {
                            // A failed probe (or a streak crossing the
                            // threshold mid-call) re-opened the circuit;
                            // stop retrying.
                            break;
                        }
                        continue;
                    }
                    if status.is_client_error() {
                        // The service answered; the breaker streak resets,
                        // but the caller gets a permanent error.
                        breaker.record_success(probe);
                        self.record(service, endpoint, CallStatus::HttpError, attempt, started_at);
                        let body = resp.text().await.unwrap_or_default();
                        return Err(UpstreamError::Http4xx {
                            status: status.as_u16(),
                            message: body,
                        });
                    }

                    breaker.record_success(probe);
                    self.record(service, endpoint, CallStatus::Ok, attempt, started_at);
                    return Ok(resp);
                }
                Err(e) => {
                    let err = from_reqwest(e);
                    let call_status = match &err {
                        UpstreamError::Timeout { .. } => CallStatus::Timeout,
                        _ => CallStatus::NetworkError,
                    };
                    breaker.record_failure(probe);
                    self.record(service, endpoint, call_status, attempt, started_at);
                    tracing::debug!(
                        service,
                        endpoint,
                        attempt,
                        error = %err,
                        "upstream attempt failed"
                    );
                    last_err = Some(err);
                    if probe || breaker_is_open(&breaker) {
                        break;
                    }
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| UpstreamError::Timeout {
            message: format!("{service}/{endpoint}: overall deadline exhausted"),
        }))
    }

    /// Breaker snapshot for one endpoint.
    pub fn breaker_state(&self, service: &str, endpoint: &str, cfg: &EndpointConfig) -> CircuitState {
        self.breakers
            .get_or_create(service, endpoint, &cfg.breaker)
            .state()
    }

    /// Snapshot of every breaker, for the status endpoint.
    pub fn breaker_snapshot(&self) -> Vec<(String, String, CircuitState)> {
        self.breakers.snapshot()
    }

    /// Per-endpoint call counters.
    pub fn counters_snapshot(&self) -> Vec<(String, String, EndpointCounters)> {
        let counters = self.counters.read();
        let mut out: Vec<_> = counters
            .iter()
            .map(|((svc, ep), c)| (svc.clone(), ep.clone(), *c))
            .collect();
        out.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        out
    }

    /// The most recent attempt records, newest last.
    pub fn recent_calls(&self, limit: usize) -> Vec<UpstreamCall> {
        let calls = self.calls.lock();
        calls
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    fn record(
        &self,
        service: &str,
        endpoint: &str,
        status: CallStatus,
        attempt_index: u32,
        started_at: DateTime<Utc>,
    ) {
        let mut calls = self.calls.lock();
        if calls.len() >= CALL_LOG_CAPACITY {
            calls.pop_front();
        }
        calls.push_back(UpstreamCall {
            service: service.to_owned(),
            endpoint: endpoint.to_owned(),
            started_at,
            ended_at: Utc::now(),
            status,
            attempt_index,
        });
        drop(calls);

        let mut counters = self.counters.write();
        let entry = counters
            .entry((service.to_owned(), endpoint.to_owned()))
            .or_default();
        entry.calls += 1;
        if status != CallStatus::Ok {
            entry.failures += 1;
        }
    }
}

fn breaker_is_open(breaker: &crate::breaker::CircuitBreaker) -> bool {
    breaker.state().status == crate::breaker::BreakerStatus::Open
}

/// Resolve once the token is cancelled. The token is a plain atomic, so
/// this polls at a coarse interval — fine for abandoning network calls.
async fn wait_cancelled(cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests (stub HTTP server on an ephemeral port)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves a script of status codes, then 200s forever. Counts hits.
    struct StubUpstream {
        hits: Arc<AtomicUsize>,
        base_url: String,
    }

    async fn start_stub(script: Vec<u16>) -> StubUpstream {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = (hits.clone(), Arc::new(Mutex::new(script)));

        async fn handler(
            State((hits, script)): State<(Arc<AtomicUsize>, Arc<Mutex<Vec<u16>>>)>,
        ) -> StatusCode {
            hits.fetch_add(1, Ordering::SeqCst);
            let code = {
                let mut script = script.lock();
                if script.is_empty() { 200 } else { script.remove(0) }
            };
            StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
        }

        let app = Router::new().route("/probe", get(handler)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        StubUpstream {
            hits,
            base_url: format!("http://{addr}"),
        }
    }

    fn cfg(threshold: u32, open_ms: u64, retries: u32) -> EndpointConfig {
        EndpointConfig {
            overall_timeout: Duration::from_secs(10),
            max_retries: retries,
            breaker: BreakerConfig {
                failure_threshold: threshold,
                open_duration: Duration::from_millis(open_ms),
                half_open_probe_limit: 1,
            },
        }
    }

    fn client() -> UpstreamClient {
        UpstreamClient::new(Duration::from_secs(2)).unwrap()
    }

    async fn probe(
        client: &UpstreamClient,
        stub: &StubUpstream,
        cfg: &EndpointConfig,
        idempotent: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = format!("{}/probe", stub.base_url);
        let cancel = CancelToken::new();
        client
            .call("stub", "/probe", cfg, idempotent, &cancel, |http| http.get(&url))
            .await
    }

    #[tokio::test]
    async fn success_passes_through() {
        let stub = start_stub(vec![]).await;
        let client = client();
        let resp = probe(&client, &stub, &cfg(5, 30_000, 3), true).await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_5xx_then_succeeds() {
        let stub = start_stub(vec![500, 503]).await;
        let client = client();
        let resp = probe(&client, &stub, &cfg(10, 30_000, 3), true).await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn http_4xx_never_retried() {
        let stub = start_stub(vec![404]).await;
        let client = client();
        let err = probe(&client, &stub, &cfg(5, 30_000, 3), true).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Http4xx { status: 404, .. }));
        assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_idempotent_single_attempt() {
        let stub = start_stub(vec![500]).await;
        let client = client();
        let err = probe(&client, &stub, &cfg(10, 30_000, 3), false).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Http5xx { .. }));
        assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_opens_and_fails_fast_without_network() {
        let stub = start_stub(vec![500; 20]).await;
        let client = client();
        // Threshold 2, no retries: two failing calls trip the breaker.
        let endpoint_cfg = cfg(2, 60_000, 0);
        for _ in 0..2 {
            let _ = probe(&client, &stub, &endpoint_cfg, true).await;
        }
        let hits_before = stub.hits.load(Ordering::SeqCst);

        let err = probe(&client, &stub, &endpoint_cfg, true).await.unwrap_err();
        assert!(matches!(err, UpstreamError::CircuitOpen { .. }));
        // No additional network traffic while open.
        assert_eq!(stub.hits.load(Ordering::SeqCst), hits_before);
    }

    #[tokio::test]
    async fn breaker_recovers_after_cooldown_probe() {
        // One failure trips the breaker; the stub then recovers.
        let stub = start_stub(vec![500]).await;
        let client = client();
        let endpoint_cfg = cfg(1, 50, 0);

        let _ = probe(&client, &stub, &endpoint_cfg, true).await;
        assert!(matches!(
            probe(&client, &stub, &endpoint_cfg, true).await,
            Err(UpstreamError::CircuitOpen { .. })
        ));

        // Wait out the cooldown; the next call is the successful probe.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let resp = probe(&client, &stub, &endpoint_cfg, true).await.unwrap();
        assert!(resp.status().is_success());

        let state = client.breaker_state("stub", "/probe", &endpoint_cfg);
        assert_eq!(state.status, crate::breaker::BreakerStatus::Closed);
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let stub = start_stub(vec![]).await;
        let client = client();
        let url = format!("{}/probe", stub.base_url);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = client
            .call("stub", "/probe", &cfg(5, 30_000, 3), true, &cancel, |http| {
                http.get(&url)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Cancelled));
        assert_eq!(stub.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn records_calls_and_counters() {
        let stub = start_stub(vec![500]).await;
        let client = client();
        let _ = probe(&client, &stub, &cfg(10, 30_000, 1), true).await;

        let calls = client.recent_calls(10);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].status, CallStatus::HttpError);
        assert_eq!(calls[1].status, CallStatus::Ok);
        assert_eq!(calls[1].attempt_index, 1);

        let counters = client.counters_snapshot();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].2.calls, 2);
        assert_eq!(counters[0].2.failures, 1);
    }
}
