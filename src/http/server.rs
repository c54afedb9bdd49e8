//! HTTP server setup and wiring.
//!
//! # Responsibilities
//! - Build the registry, prober, selection policy and dispatch engine
//! - Create the Axum router and wire up middleware (tracing, timeout, request ID)
//! - Run the startup sequence and the graceful shutdown sequence
//!
//! # Startup Order
//! ```text
//! probe_all (eager) → prober loop → stats reporter → accept connections
//! ```
//!
//! # Shutdown Order
//! ```text
//! stop accepting → cancel in-flight dispatches → stop prober → stats reporter exits
//! ```

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::dispatch::{DispatchEngine, HyperUpstream};
use crate::health::HealthProber;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{build_policy, registry::Registry};
use crate::observability::stats::StatsReporter;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid backend url: {0}")]
    BackendUrl(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine<HyperUpstream>>,
}

/// HTTP front end of the load balancer.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    registry: Arc<Registry>,
    prober: Arc<HealthProber<HyperUpstream>>,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Build every subsystem from `config`. Nothing runs until [`run`](Self::run).
    pub fn new(config: ProxyConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let registry = Arc::new(Registry::from_config(&config.backends)?);
        let upstream = Arc::new(HyperUpstream::new());
        let prober = Arc::new(HealthProber::new(
            registry.clone(),
            upstream.clone(),
            &config.health_check,
        ));
        let policy = build_policy(config.algorithm, registry.clone());

        let engine = Arc::new(DispatchEngine::new(
            registry.clone(),
            policy,
            prober.clone(),
            upstream,
            &config.retries,
            shutdown.clone(),
        ));
        tracing::info!(
            policy = engine.policy_name(),
            retries = config.retries.count,
            backends = registry.len(),
            "Dispatch engine ready"
        );

        let router = Self::build_router(&config, AppState { engine });
        Ok(Self {
            router,
            config,
            registry,
            prober,
            shutdown,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/", get(dispatch_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(TimeoutLayer::new(config.timeouts.request())),
            )
    }

    /// Run until the shutdown handle fires.
    pub async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;

        self.prober.probe_all().await;
        tracing::info!(
            healthy = self.registry.list_healthy().len(),
            total = self.registry.len(),
            "Initial health probe complete"
        );

        let prober_handle = self.prober.start();
        let stats_handle = StatsReporter::new(
            self.registry.clone(),
            self.config.observability.stats_interval(),
            self.shutdown.clone(),
        )
        .start();

        tracing::info!(
            address = %addr,
            backends = self.registry.len(),
            "HTTP server starting"
        );

        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await;

        // A serve error also has to bring the background tasks down
        self.shutdown.trigger();
        self.prober.stop();
        if let Err(e) = prober_handle.await {
            tracing::error!(error = %e, "Health prober task failed");
        }
        if let Err(e) = stats_handle.await {
            tracing::error!(error = %e, "Stats reporter task failed");
        }

        tracing::info!("HTTP server stopped");
        served.map_err(ServerError::from)
    }
}

/// Forward one client request through the dispatch engine.
async fn dispatch_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = request_id(&headers);

    match state.engine.dispatch().await {
        Ok(dispatched) => {
            tracing::debug!(
                request_id = %request_id,
                backend = %dispatched.backend,
                attempts = dispatched.attempts,
                status = %dispatched.status,
                "Request served"
            );
            (dispatched.status, dispatched.body).into_response()
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request failed");
            e.status_code().into_response()
        }
    }
}
