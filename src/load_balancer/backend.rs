//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track served/failed request counters
//! - Hold the health state written by the prober

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use url::Url;

use crate::health::state::HealthState;

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Position in configuration order.
    pub index: usize,
    /// The configured address, used as the unique key.
    pub id: String,
    /// Parsed base URL for forwarding and probing.
    pub base_url: Url,
    /// Static weight for weighted selection.
    pub weight: u32,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    /// Lifetime count of successfully served requests.
    total_served: AtomicU64,
    /// Served requests since the last window reset.
    window_served: AtomicU64,
    /// Lifetime count of failed forwarding attempts.
    total_failures: AtomicU64,
    /// Set when a re-probe was requested outside the schedule.
    probe_hint: AtomicBool,
}

impl Backend {
    /// Create a new backend. Health starts as `Unknown`.
    pub fn new(index: usize, base_url: Url, weight: u32) -> Self {
        Self {
            index,
            id: base_url.as_str().trim_end_matches('/').to_string(),
            base_url,
            weight,
            state: AtomicU8::new(HealthState::Unknown as u8),
            total_served: AtomicU64::new(0),
            window_served: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            probe_hint: AtomicBool::new(false),
        }
    }

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Return true if backend may be selected.
    pub fn is_healthy(&self) -> bool {
        self.health().is_eligible()
    }

    /// Store a new state and return the previous one.
    pub(crate) fn swap_health(&self, state: HealthState) -> HealthState {
        HealthState::from(self.state.swap(state as u8, Ordering::AcqRel))
    }

    pub(crate) fn record_success(&self) {
        self.total_served.fetch_add(1, Ordering::Relaxed);
        self.window_served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_served(&self) -> u64 {
        self.total_served.load(Ordering::Relaxed)
    }

    pub fn window_served(&self) -> u64 {
        self.window_served.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Reset the window counter, returning the value it held.
    pub(crate) fn take_window(&self) -> u64 {
        self.window_served.swap(0, Ordering::Relaxed)
    }

    /// Flag this backend for an out-of-band probe.
    /// Returns false if a hint was already pending.
    pub(crate) fn set_probe_hint(&self) -> bool {
        !self.probe_hint.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn take_probe_hint(&self) -> bool {
        self.probe_hint.swap(false, Ordering::AcqRel)
    }

    /// URL probed by the health checker.
    pub fn probe_url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            id: self.id.clone(),
            weight: self.weight,
            health: self.health(),
            total_served: self.total_served(),
            window_served: self.window_served(),
            total_failures: self.total_failures(),
        }
    }
}

/// Point-in-time counters for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub id: String,
    pub weight: u32,
    pub health: HealthState,
    pub total_served: u64,
    pub window_served: u64,
    pub total_failures: u64,
}
