//! Request dispatch with reselecting retries.
//!
//! # Request State Machine
//! ```text
//! START → SELECT → FORWARD → SUCCESS
//!                     │
//!                     ├─ failure, budget left → [re-probe if refused] → backoff → SELECT
//!                     └─ failure, budget spent → EXHAUSTED_FAILURE
//!
//! SELECT with no eligible backend → NO_ELIGIBLE_BACKEND
//! Shutdown during FORWARD or backoff → CANCELLED
//! ```
//!
//! # Design Decisions
//! - Every retry reselects, so retries spread across the fleet
//! - A refused connection is re-probed before reselecting; the prober owns
//!   the state change, the engine never flips health directly
//! - Only the upstream call and the backoff sleep suspend; no registry or
//!   policy lock is held across them

use hyper::body::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;

use axum::http::StatusCode;

use crate::config::RetryConfig;
use crate::dispatch::error::DispatchError;
use crate::dispatch::upstream::{Upstream, UpstreamError, UpstreamResponse};
use crate::health::prober::HealthProber;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{backend::Backend, registry::Registry, NoEligibleBackend, SelectionPolicy};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;

/// A successfully forwarded request.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub status: StatusCode,
    pub body: Bytes,
    /// Identity of the backend that served the request.
    pub backend: String,
    pub attempts: u32,
}

pub struct DispatchEngine<U> {
    registry: Arc<Registry>,
    policy: Box<dyn SelectionPolicy>,
    prober: Arc<HealthProber<U>>,
    upstream: Arc<U>,
    retry: RetryPolicy,
    timeout: Duration,
    shutdown: Shutdown,
}

impl<U: Upstream> DispatchEngine<U> {
    pub fn new(
        registry: Arc<Registry>,
        policy: Box<dyn SelectionPolicy>,
        prober: Arc<HealthProber<U>>,
        upstream: Arc<U>,
        config: &RetryConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            registry,
            policy,
            prober,
            upstream,
            retry: RetryPolicy::from(config),
            timeout: config.timeout(),
            shutdown,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Serve one client request.
    pub async fn dispatch(&self) -> Result<Dispatched, DispatchError> {
        let start = Instant::now();

        if self.shutdown.is_triggered() {
            return Err(DispatchError::Cancelled);
        }

        // Fail fast, without touching any backend
        if !self.registry.has_healthy() {
            let err = DispatchError::from(NoEligibleBackend);
            tracing::warn!("No healthy backends");
            metrics::record_request("none", err.status_code().as_u16(), start);
            return Err(err);
        }

        let result = self.attempt_loop().await;

        match &result {
            Ok(dispatched) => {
                metrics::record_request(&dispatched.backend, dispatched.status.as_u16(), start);
            }
            Err(e) => {
                let backend = match e {
                    DispatchError::RetryBudgetExhausted { backend, .. } => backend.as_str(),
                    _ => "none",
                };
                metrics::record_request(backend, e.status_code().as_u16(), start);
            }
        }
        result
    }

    async fn attempt_loop(&self) -> Result<Dispatched, DispatchError> {
        let mut attempt = 1;
        let mut selection = self.policy.next()?;

        loop {
            let backend = &selection.backend;
            tracing::debug!(backend = %backend.id, attempt, "Forwarding request");

            let result = tokio::select! {
                result = self.forward(backend) => result,
                _ = self.shutdown.wait() => return Err(DispatchError::Cancelled),
            };

            let error = match result {
                Ok(response) => {
                    self.registry.record_success(selection.index);
                    tracing::debug!(backend = %backend.id, attempt, status = %response.status, "Upstream success");
                    return Ok(Dispatched {
                        status: response.status,
                        body: response.body,
                        backend: backend.id.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            self.registry.record_failure(selection.index);

            if !self.retry.should_retry(attempt) {
                self.registry.mark_probe_hint(selection.index);
                tracing::error!(
                    backend = %backend.id,
                    attempts = attempt,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(DispatchError::RetryBudgetExhausted {
                    attempts: attempt,
                    backend: backend.id.clone(),
                    last_error: error,
                });
            }

            metrics::record_retry(error.kind());
            if error.is_connection_refused() {
                self.reprobe(backend).await?;
            } else {
                tracing::warn!(backend = %backend.id, attempt, error = %error, "Upstream error");
            }

            let delay = self.retry.delay(attempt);
            tracing::info!(backend = %backend.id, attempt, delay = ?delay, "Retrying request");
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = self.shutdown.wait() => return Err(DispatchError::Cancelled),
            }

            attempt += 1;
            selection = self.policy.next()?;
        }
    }

    /// Refused connections are checked right away so the next selection
    /// already sees the prober's verdict.
    async fn reprobe(&self, backend: &Backend) -> Result<(), DispatchError> {
        tracing::warn!(backend = %backend.id, "Connection refused, re-probing backend");
        let state = tokio::select! {
            state = self.prober.probe_one(backend) => state,
            _ = self.shutdown.wait() => return Err(DispatchError::Cancelled),
        };
        tracing::debug!(backend = %backend.id, state = %state, "Re-probe complete");
        Ok(())
    }

    async fn forward(&self, backend: &Backend) -> Result<UpstreamResponse, UpstreamError> {
        let response = self.upstream.get(&backend.base_url, self.timeout).await?;
        if response.status.is_server_error() {
            return Err(UpstreamError::Status(response.status));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, HealthCheckConfig};
    use crate::dispatch::upstream::scripted::ScriptedUpstream;
    use crate::health::state::HealthState;
    use crate::load_balancer::build_policy;
    use crate::load_balancer::registry::tests::{all_healthy, registry_with_weights};

    const A: &str = "http://127.0.0.1:9000/";
    const A_PING: &str = "http://127.0.0.1:9000/ping";
    const B: &str = "http://127.0.0.1:9001/";
    const C: &str = "http://127.0.0.1:9002/";

    struct Harness {
        registry: Arc<Registry>,
        upstream: Arc<ScriptedUpstream>,
        shutdown: Shutdown,
        engine: DispatchEngine<ScriptedUpstream>,
    }

    fn harness(weights: &[u32], algorithm: Algorithm, retries: u32, upstream: ScriptedUpstream) -> Harness {
        let registry = Arc::new(registry_with_weights(weights));
        let upstream = Arc::new(upstream);
        let probe_config = HealthCheckConfig {
            retries: 0,
            ..HealthCheckConfig::default()
        };
        let prober = Arc::new(HealthProber::new(registry.clone(), upstream.clone(), &probe_config));
        let retry_config = RetryConfig {
            count: retries,
            base_delay_ms: 1,
            timeout_ms: 1000,
        };
        let shutdown = Shutdown::new();
        let engine = DispatchEngine::new(
            registry.clone(),
            build_policy(algorithm, registry.clone()),
            prober,
            upstream.clone(),
            &retry_config,
            shutdown.clone(),
        );
        Harness { registry, upstream, shutdown, engine }
    }

    #[tokio::test]
    async fn test_success_returns_upstream_response() {
        let h = harness(&[1, 1], Algorithm::RoundRobin, 2, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Ok((200, "from a"))]);
        h.upstream.script(B, vec![Ok((201, "from b"))]);

        let first = h.engine.dispatch().await.unwrap();
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(&first.body[..], b"from a");
        assert_eq!(first.attempts, 1);

        let second = h.engine.dispatch().await.unwrap();
        assert_eq!(second.status, StatusCode::CREATED);
        assert_eq!(second.backend, "http://127.0.0.1:9001");

        let stats = h.registry.stats();
        assert_eq!(stats[0].total_served, 1);
        assert_eq!(stats[1].window_served, 1);
    }

    #[tokio::test]
    async fn test_no_healthy_backend_fails_fast() {
        let h = harness(&[1, 1], Algorithm::WeightedRoundRobin, 2, ScriptedUpstream::new());

        let err = h.engine.dispatch().await.unwrap_err();
        assert!(matches!(err, DispatchError::NoEligibleBackend(_)));
        assert!(h.upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exact_attempts_when_all_fail() {
        let h = harness(&[1, 1, 1], Algorithm::RoundRobin, 2, ScriptedUpstream::new());
        all_healthy(&h.registry);
        for url in [A, B, C] {
            h.upstream.script(url, vec![Ok((502, "bad gateway"))]);
        }

        let err = h.engine.dispatch().await.unwrap_err();
        match err {
            DispatchError::RetryBudgetExhausted { attempts, backend, last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(backend, "http://127.0.0.1:9002");
                assert_eq!(last_error, UpstreamError::Status(StatusCode::BAD_GATEWAY));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Each retry reselected a different backend
        assert_eq!(h.upstream.calls(), vec![A, B, C]);
        let failures: Vec<u64> = h.registry.stats().iter().map(|s| s.total_failures).collect();
        assert_eq!(failures, vec![1, 1, 1]);
        // The final failing backend gets an out-of-band re-check
        assert_eq!(h.registry.take_hinted().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_attempt() {
        let h = harness(&[1], Algorithm::RoundRobin, 0, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Err(UpstreamError::Timeout(Duration::from_secs(1)))]);

        let err = h.engine.dispatch().await.unwrap_err();
        assert!(matches!(err, DispatchError::RetryBudgetExhausted { attempts: 1, .. }));
        assert_eq!(h.upstream.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_reprobes_and_skips_backend() {
        let h = harness(&[1, 1], Algorithm::RoundRobin, 2, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Err(UpstreamError::ConnectionRefused("refused".into()))]);
        h.upstream.script(A_PING, vec![Err(UpstreamError::ConnectionRefused("refused".into()))]);
        h.upstream.script(B, vec![Ok((200, "from b"))]);

        let dispatched = h.engine.dispatch().await.unwrap();
        assert_eq!(dispatched.backend, "http://127.0.0.1:9001");
        assert_eq!(dispatched.attempts, 2);

        // Probe ran between the failed attempt and the retry
        assert_eq!(h.upstream.calls(), vec![A, A_PING, B]);
        assert_eq!(h.registry.get(0).unwrap().health(), HealthState::Unhealthy);

        // A stays out of rotation for later requests too
        h.engine.dispatch().await.unwrap();
        assert_eq!(h.upstream.calls_to(A), 1);
    }

    #[tokio::test]
    async fn test_refused_but_probe_passes_keeps_backend() {
        let h = harness(&[1], Algorithm::RoundRobin, 1, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(
            A,
            vec![Err(UpstreamError::ConnectionRefused("refused".into())), Ok((200, "ok"))],
        );
        h.upstream.script(A_PING, vec![Ok((200, "pong"))]);

        let dispatched = h.engine.dispatch().await.unwrap();
        assert_eq!(dispatched.attempts, 2);
        assert_eq!(h.registry.get(0).unwrap().health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_last_backend_confirmed_down_ends_with_no_eligible() {
        let h = harness(&[1], Algorithm::WeightedRoundRobin, 3, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Err(UpstreamError::ConnectionRefused("refused".into()))]);
        h.upstream.script(A_PING, vec![Err(UpstreamError::ConnectionRefused("refused".into()))]);

        let err = h.engine.dispatch().await.unwrap_err();
        assert!(matches!(err, DispatchError::NoEligibleBackend(_)));
        assert_eq!(h.upstream.calls(), vec![A, A_PING]);
    }

    #[tokio::test]
    async fn test_client_errors_pass_through() {
        let h = harness(&[1, 1], Algorithm::RoundRobin, 2, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Ok((404, "missing"))]);

        let dispatched = h.engine.dispatch().await.unwrap();
        assert_eq!(dispatched.status, StatusCode::NOT_FOUND);
        assert_eq!(&dispatched.body[..], b"missing");
        assert_eq!(h.upstream.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_weighted_dispatch_order() {
        let h = harness(&[1, 2, 1], Algorithm::WeightedRoundRobin, 0, ScriptedUpstream::new());
        all_healthy(&h.registry);
        for url in [A, B, C] {
            h.upstream.script(url, vec![Ok((200, "ok"))]);
        }

        let mut served = Vec::new();
        for _ in 0..4 {
            served.push(h.engine.dispatch().await.unwrap().backend);
        }
        assert_eq!(
            served,
            vec![
                "http://127.0.0.1:9000",
                "http://127.0.0.1:9001",
                "http://127.0.0.1:9001",
                "http://127.0.0.1:9002",
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_request() {
        let h = harness(
            &[1],
            Algorithm::RoundRobin,
            0,
            ScriptedUpstream::with_delay(Duration::from_secs(30)),
        );
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Ok((200, "slow"))]);

        let shutdown = h.shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        });

        let err = time::timeout(Duration::from_secs(2), h.engine.dispatch())
            .await
            .expect("dispatch was not cancelled")
            .unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
        assert_eq!(h.registry.stats()[0].total_served, 0);
    }

    #[tokio::test]
    async fn test_no_dispatch_after_shutdown() {
        let h = harness(&[1], Algorithm::RoundRobin, 2, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Ok((200, "ok"))]);
        h.shutdown.trigger();

        assert_eq!(h.engine.dispatch().await.unwrap_err(), DispatchError::Cancelled);
        assert!(h.upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn test_policy_name_follows_algorithm() {
        let h = harness(&[1], Algorithm::WeightedRoundRobin, 0, ScriptedUpstream::new());
        assert_eq!(h.engine.policy_name(), "weighted-round-robin");
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_counts_every_success() {
        let h = harness(&[1, 1], Algorithm::RoundRobin, 0, ScriptedUpstream::new());
        all_healthy(&h.registry);
        h.upstream.script(A, vec![Ok((200, "a"))]);
        h.upstream.script(B, vec![Ok((200, "b"))]);
        let engine = Arc::new(h.engine);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.dispatch().await.is_ok() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let stats = h.registry.stats();
        assert_eq!(stats[0].total_served + stats[1].total_served, 50);
        assert_eq!(stats[0].total_served, 25);
    }
}
