//! Dispatch error types.

use axum::http::StatusCode;
use thiserror::Error;

use crate::dispatch::upstream::UpstreamError;
use crate::load_balancer::NoEligibleBackend;

/// Terminal outcome of a client request that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No healthy backend at selection time; not retried.
    #[error(transparent)]
    NoEligibleBackend(#[from] NoEligibleBackend),

    /// Every allowed attempt failed.
    #[error("retry budget exhausted after {attempts} attempts, last backend {backend}: {last_error}")]
    RetryBudgetExhausted {
        attempts: u32,
        backend: String,
        last_error: UpstreamError,
    },

    /// Shutdown aborted the request.
    #[error("dispatch cancelled by shutdown")]
    Cancelled,
}

impl DispatchError {
    /// Status code returned to the client.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
