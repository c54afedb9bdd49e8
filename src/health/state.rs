//! Backend health state.
//!
//! # States
//! - Unknown: not probed yet, excluded from load balancing
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Unknown   → Healthy:   probe succeeded
//! Unknown   → Unhealthy: probe retries exhausted
//! Healthy  ←→ Unhealthy: latest probe result
//! ```
//!
//! # Design Decisions
//! - Only the prober writes health state
//! - Unknown is never optimistic; a fleet must be probed before it serves
//! - Stored as a `u8` so backends can hold it in an atomic

use serde::Serialize;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl HealthState {
    /// Only healthy backends may be selected.
    pub fn is_eligible(self) -> bool {
        self == HealthState::Healthy
    }
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}
