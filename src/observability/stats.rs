//! Periodic backend statistics.
//!
//! # Responsibilities
//! - Refresh the `lb_backend_health` gauge for every backend
//! - Log served/failed counts per backend and close the counting window
//! - Emit the final stats as JSON at shutdown

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::lifecycle::Shutdown;
use crate::load_balancer::registry::Registry;
use crate::observability::metrics;

pub struct StatsReporter {
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: Shutdown,
}

impl StatsReporter {
    pub fn new(registry: Arc<Registry>, interval: Duration, shutdown: Shutdown) -> Self {
        Self {
            registry,
            interval,
            shutdown,
        }
    }

    /// Report once: gauges, a log line per backend, then reset the window.
    pub fn report(&self) {
        for stats in self.registry.stats() {
            metrics::record_backend_health(&stats.id, stats.health.is_eligible());
            tracing::info!(
                backend = %stats.id,
                weight = stats.weight,
                health = %stats.health,
                window_served = stats.window_served,
                total_served = stats.total_served,
                total_failures = stats.total_failures,
                "Backend stats"
            );
        }
        self.registry.reset_window();
    }

    /// Log the lifetime stats of every backend as one JSON document.
    pub fn final_report(&self) {
        match serde_json::to_string(&self.registry.stats()) {
            Ok(json) => tracing::info!(stats = %json, "Final backend stats"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize backend stats"),
        }
    }

    /// Report every interval until shutdown.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.report(),
                    _ = self.shutdown.wait() => break,
                }
            }
            self.final_report();
        })
    }
}
