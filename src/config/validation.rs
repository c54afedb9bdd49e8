//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend descriptors (URL shape, unique identity, weight)
//! - Validate value ranges (intervals and timeouts > 0, bind address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one backend is required")]
    NoBackends,

    #[error("backend '{domain}' is not a valid URL: {reason}")]
    InvalidUrl { domain: String, reason: String },

    #[error("backend '{0}' must use the http scheme")]
    UnsupportedScheme(String),

    #[error("backend '{0}' is configured more than once")]
    DuplicateBackend(String),

    #[error("backend '{0}' has weight 0")]
    ZeroWeight(String),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        match Url::parse(&backend.domain) {
            Ok(url) if url.scheme() != "http" => {
                errors.push(ValidationError::UnsupportedScheme(backend.domain.clone()));
            }
            Ok(url) => {
                let key = url.as_str().trim_end_matches('/').to_string();
                if !seen.insert(key) {
                    errors.push(ValidationError::DuplicateBackend(backend.domain.clone()));
                }
            }
            Err(e) => errors.push(ValidationError::InvalidUrl {
                domain: backend.domain.clone(),
                reason: e.to_string(),
            }),
        }

        if backend.weight == 0 {
            errors.push(ValidationError::ZeroWeight(backend.domain.clone()));
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(config.listener.bind_address.clone()));
    }

    let ranges = [
        (config.health_check.interval_secs, "health_check.interval_secs"),
        (config.health_check.timeout_ms, "health_check.timeout_ms"),
        (config.retries.timeout_ms, "retries.timeout_ms"),
        (config.timeouts.request_secs, "timeouts.request_secs"),
        (config.observability.stats_interval_secs, "observability.stats_interval_secs"),
    ];
    for (value, name) in ranges {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
