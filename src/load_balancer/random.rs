//! Random load balancing strategy.

use rand::Rng;
use std::sync::Arc;

use crate::load_balancer::{registry::Registry, NoEligibleBackend, Selection, SelectionPolicy};

/// Uniform pick over the healthy subset. Keeps no state across calls.
#[derive(Debug)]
pub struct RandomPolicy {
    registry: Arc<Registry>,
}

impl RandomPolicy {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl SelectionPolicy for RandomPolicy {
    fn next(&self) -> Result<Selection, NoEligibleBackend> {
        let healthy = self.registry.list_healthy();
        if healthy.is_empty() {
            return Err(NoEligibleBackend);
        }

        let pick = rand::thread_rng().gen_range(0..healthy.len());
        Ok(Selection::new(&healthy[pick]))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
