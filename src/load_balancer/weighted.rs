//! Weighted round-robin load balancing strategy.
//!
//! Each healthy backend owns `weight` consecutive slots in a cycle of
//! `sum(weights)` slots. A shared tick picks the slot; the cumulative weight
//! table is re-derived from the current healthy snapshot on every call, so
//! it follows health changes without any cached state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::load_balancer::{registry::Registry, NoEligibleBackend, Selection, SelectionPolicy};

/// Weighted round-robin selector.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    registry: Arc<Registry>,
    tick: AtomicU64,
}

impl WeightedRoundRobin {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tick: AtomicU64::new(0),
        }
    }
}

impl SelectionPolicy for WeightedRoundRobin {
    fn next(&self) -> Result<Selection, NoEligibleBackend> {
        // Read each live flag once; total and walk must agree on the same set
        let snapshot = self.registry.list_healthy();
        let eligible: Vec<_> = snapshot.iter().filter(|b| b.is_healthy()).collect();
        let total: u64 = eligible.iter().map(|b| u64::from(b.weight)).sum();
        if total == 0 {
            return Err(NoEligibleBackend);
        }

        let slot = self.tick.fetch_add(1, Ordering::Relaxed) % total;
        let mut accumulated = 0u64;
        for backend in eligible {
            accumulated += u64::from(backend.weight);
            if slot < accumulated {
                return Ok(Selection::new(backend));
            }
        }

        // slot < total over the same list, so the walk above always returns
        Err(NoEligibleBackend)
    }

    fn name(&self) -> &'static str {
        "weighted-round-robin"
    }
}
