//! Backend registry.
//!
//! # Responsibilities
//! - Own every configured backend for the process lifetime
//! - Publish the healthy subset as an immutable snapshot
//! - Record request outcomes per backend
//! - Collect out-of-band probe hints for the prober
//!
//! Backends are addressed by their configuration index, which is also the
//! index space used by the selection policies.

use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use url::Url;

use crate::config::BackendConfig;
use crate::health::state::HealthState;
use crate::load_balancer::backend::{Backend, BackendStats};

/// Owned set of backends plus the derived healthy subset.
#[derive(Debug)]
pub struct Registry {
    backends: Vec<Arc<Backend>>,
    /// Healthy backends in configuration order, swapped as a whole.
    healthy: ArcSwap<Vec<Arc<Backend>>>,
    /// Serializes state writes with the snapshot rebuild.
    publish: Mutex<()>,
    probe_hints: Notify,
}

impl Registry {
    /// Create a registry. Every backend starts `Unknown`, so the healthy
    /// subset is empty until the first probe completes.
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends: backends.into_iter().map(Arc::new).collect(),
            healthy: ArcSwap::from_pointee(Vec::new()),
            publish: Mutex::new(()),
            probe_hints: Notify::new(),
        }
    }

    /// Build the registry from validated backend descriptors.
    pub fn from_config(configs: &[BackendConfig]) -> Result<Self, url::ParseError> {
        let backends = configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let url = Url::parse(&config.domain)?;
                Ok(Backend::new(index, url, config.weight))
            })
            .collect::<Result<Vec<_>, url::ParseError>>()?;
        Ok(Self::new(backends))
    }

    /// All backends in configuration order.
    pub fn list_all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Snapshot of the healthy subset.
    pub fn list_healthy(&self) -> Arc<Vec<Arc<Backend>>> {
        self.healthy.load_full()
    }

    pub fn has_healthy(&self) -> bool {
        !self.healthy.load().is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Backend>> {
        self.backends.get(index)
    }

    pub fn record_success(&self, index: usize) {
        if let Some(backend) = self.backends.get(index) {
            backend.record_success();
        }
    }

    pub fn record_failure(&self, index: usize) {
        if let Some(backend) = self.backends.get(index) {
            backend.record_failure();
        }
    }

    /// Apply a probe result. Returns true if the state changed.
    ///
    /// The healthy snapshot is rebuilt and swapped while holding the publish
    /// lock, so concurrent writers cannot publish a stale subset.
    pub fn set_health(&self, index: usize, state: HealthState) -> bool {
        let Some(backend) = self.backends.get(index) else {
            return false;
        };

        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = backend.swap_health(state);
        if previous == state {
            return false;
        }

        let healthy: Vec<Arc<Backend>> = self
            .backends
            .iter()
            .filter(|b| b.is_healthy())
            .cloned()
            .collect();
        let healthy_count = healthy.len();
        self.healthy.store(Arc::new(healthy));

        match state {
            HealthState::Healthy => tracing::info!(
                backend = %backend.id,
                from = %previous,
                healthy_count,
                "Backend is healthy"
            ),
            _ => tracing::warn!(
                backend = %backend.id,
                from = %previous,
                to = %state,
                healthy_count,
                "Backend removed from rotation"
            ),
        }
        true
    }

    /// Ask the prober to re-check a backend without waiting for the next tick.
    pub fn mark_probe_hint(&self, index: usize) {
        if let Some(backend) = self.backends.get(index) {
            if backend.set_probe_hint() {
                tracing::debug!(backend = %backend.id, "Probe hint recorded");
                self.probe_hints.notify_one();
            }
        }
    }

    /// Wait until at least one probe hint is pending.
    pub async fn probe_hinted(&self) {
        self.probe_hints.notified().await;
    }

    /// Drain pending probe hints.
    pub fn take_hinted(&self) -> Vec<Arc<Backend>> {
        self.backends
            .iter()
            .filter(|b| b.take_probe_hint())
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> Vec<BackendStats> {
        self.backends.iter().map(|b| b.stats()).collect()
    }

    /// Zero every window counter.
    pub fn reset_window(&self) {
        for backend in &self.backends {
            backend.take_window();
        }
    }
}
