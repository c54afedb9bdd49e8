//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{registry::Registry, NoEligibleBackend, Selection, SelectionPolicy};

/// Round-robin selector.
/// Rotates a cursor over the full backend list and skips entries that are not
/// healthy, so positions stay stable while backends flap.
#[derive(Debug)]
pub struct RoundRobin {
    registry: Arc<Registry>,
    /// Index of the next backend to try.
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl SelectionPolicy for RoundRobin {
    fn next(&self) -> Result<Selection, NoEligibleBackend> {
        let backends = self.registry.list_all();
        let len = backends.len();
        if len == 0 {
            return Err(NoEligibleBackend);
        }

        let mut start = self.cursor.load(Ordering::Relaxed);
        loop {
            // Wrap at most once around the full list
            let found = (0..len)
                .map(|step| (start + step) % len)
                .find(|&index| backends[index].is_healthy());

            let Some(index) = found else {
                return Err(NoEligibleBackend);
            };

            match self.cursor.compare_exchange_weak(
                start,
                (index + 1) % len,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(Selection::new(&backends[index])),
                Err(current) => start = current,
            }
        }
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
