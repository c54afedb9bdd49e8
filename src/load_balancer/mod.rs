//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch attempt
//!     → SelectionPolicy::next()
//!     → Registry (healthy snapshot or per-backend state)
//!     → Apply load balancing algorithm:
//!         - random.rs (uniform over healthy subset)
//!         - round_robin.rs (rotate through full list, skip unhealthy)
//!         - weighted.rs (cumulative weight cursor over healthy subset)
//!     → Selection { backend, index } or NoEligibleBackend
//! ```
//!
//! # Design Decisions
//! - Registry is owned once and shared via Arc; policies hold a handle to it
//! - Policy cursors are atomics, never locks held across awaits
//! - Unhealthy and unprobed backends are excluded from selection
//! - Ties resolve in configuration order

pub mod backend;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::sync::Arc;
use thiserror::Error;

use crate::config::Algorithm;
use backend::Backend;
use random::RandomPolicy;
use registry::Registry;
use round_robin::RoundRobin;
use weighted::WeightedRoundRobin;

/// No backend is currently eligible for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no eligible backend")]
pub struct NoEligibleBackend;

/// The outcome of one selection call.
#[derive(Debug, Clone)]
pub struct Selection {
    pub backend: Arc<Backend>,
    /// Configuration index of the chosen backend.
    pub index: usize,
}

impl Selection {
    pub(crate) fn new(backend: &Arc<Backend>) -> Self {
        Self {
            index: backend.index,
            backend: backend.clone(),
        }
    }
}

/// Algorithm that picks the backend for the next forwarding attempt.
pub trait SelectionPolicy: Send + Sync + std::fmt::Debug {
    /// Select the next eligible backend.
    fn next(&self) -> Result<Selection, NoEligibleBackend>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Build the policy configured by `algorithm`.
pub fn build_policy(algorithm: Algorithm, registry: Arc<Registry>) -> Box<dyn SelectionPolicy> {
    match algorithm {
        Algorithm::Random => Box::new(RandomPolicy::new(registry)),
        Algorithm::RoundRobin => Box::new(RoundRobin::new(registry)),
        Algorithm::WeightedRoundRobin => Box::new(WeightedRoundRobin::new(registry)),
    }
}
