//! Active health probing.
//!
//! # Responsibilities
//! - Probe every backend eagerly at startup and then periodically
//! - Re-probe single backends on demand (refused connections, hints)
//! - Write the resulting health state into the registry
//!
//! # Design Decisions
//! - Probe retries use their own policy, separate from request retries
//! - Each cycle runs in its own task; a panicking cycle is logged, not fatal
//! - `stop()` is synchronous: once it returns no new probe starts

use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use axum::http::StatusCode;

use crate::config::HealthCheckConfig;
use crate::dispatch::upstream::{Upstream, UpstreamError};
use crate::health::state::HealthState;
use crate::load_balancer::{backend::Backend, registry::Registry};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;

/// Why a probe judged a backend down. Never leaves the prober.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("non-success status {0}")]
    Status(StatusCode),

    /// The prober stopped before the check finished; no verdict.
    #[error("prober stopped")]
    Stopped,
}

enum Cycle {
    All,
    Hinted,
}

pub struct HealthProber<U> {
    registry: Arc<Registry>,
    upstream: Arc<U>,
    path: String,
    interval: Duration,
    timeout: Duration,
    retry: RetryPolicy,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl<U: Upstream> HealthProber<U> {
    pub fn new(registry: Arc<Registry>, upstream: Arc<U>, config: &HealthCheckConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            registry,
            upstream,
            path: config.path.clone(),
            interval: config.interval(),
            timeout: config.timeout(),
            retry: RetryPolicy::from(config),
            stopped: AtomicBool::new(false),
            stop_tx,
        }
    }

    /// Probe every backend concurrently.
    pub async fn probe_all(&self) {
        if self.is_stopped() {
            return;
        }
        // A full cycle covers any pending hints
        self.registry.take_hinted();

        let probes: Vec<_> = self
            .registry
            .list_all()
            .iter()
            .map(|backend| self.probe_one(backend))
            .collect();
        let states = join_all(probes).await;

        let healthy = states.iter().filter(|s| s.is_eligible()).count();
        tracing::debug!(healthy, total = states.len(), "Probe cycle complete");
    }

    /// Probe the backends that received a hint since the last cycle.
    pub async fn probe_hinted(&self) {
        let hinted = self.registry.take_hinted();
        let probes: Vec<_> = hinted.iter().map(|backend| self.probe_one(backend)).collect();
        join_all(probes).await;
    }

    /// Probe one backend and record the outcome. Returns the resulting state.
    pub async fn probe_one(&self, backend: &Backend) -> HealthState {
        if self.is_stopped() {
            return backend.health();
        }

        let state = match self.check(backend).await {
            Ok(()) => HealthState::Healthy,
            Err(ProbeError::Stopped) => return backend.health(),
            Err(e) => {
                tracing::warn!(backend = %backend.id, error = %e, "Health check failed");
                HealthState::Unhealthy
            }
        };

        self.registry.set_health(backend.index, state);
        metrics::record_probe(&backend.id, state.is_eligible());
        state
    }

    async fn check(&self, backend: &Backend) -> Result<(), ProbeError> {
        let url = backend.probe_url(&self.path)?;
        let mut attempt = 1;
        loop {
            let err = match self.upstream.get(&url, self.timeout).await {
                Ok(response) if response.status.is_success() => return Ok(()),
                Ok(response) => ProbeError::Status(response.status),
                Err(e) => ProbeError::Upstream(e),
            };

            if self.is_stopped() {
                return Err(ProbeError::Stopped);
            }
            if !self.retry.should_retry(attempt) {
                return Err(err);
            }

            let delay = self.retry.delay(attempt);
            tracing::debug!(backend = %backend.id, attempt, delay = ?delay, error = %err, "Retrying probe");
            time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Cancel the periodic schedule. In-flight probe cycles are abandoned.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Spawn the periodic probe loop. The first tick fires one interval from
    /// now; callers run `probe_all` eagerly before serving traffic.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let prober = self.clone();
        tokio::spawn(async move { prober.run().await })
    }

    async fn run(self: Arc<Self>) {
        tracing::info!(
            interval = ?self.interval,
            path = %self.path,
            backends = self.registry.len(),
            "Health prober starting"
        );

        let mut stop_rx = self.stop_tx.subscribe();
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_stopped() {
            let cycle = tokio::select! {
                _ = ticker.tick() => Cycle::All,
                _ = self.registry.probe_hinted() => Cycle::Hinted,
                _ = stop_rx.changed() => break,
            };

            let prober = self.clone();
            let mut task = tokio::spawn(async move {
                match cycle {
                    Cycle::All => prober.probe_all().await,
                    Cycle::Hinted => prober.probe_hinted().await,
                }
            });

            tokio::select! {
                result = &mut task => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Probe cycle failed, continuing");
                    }
                }
                _ = stop_rx.changed() => {
                    task.abort();
                    break;
                }
            }
        }

        tracing::info!("Health prober stopped");
    }
}
