//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarded request or health probe:
//!     → attempt fails
//!     → retries.rs (budget left?)
//!     → backoff.rs (linear delay: retry * base)
//!     → next attempt
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Retries are bounded by an explicit attempt counter
//! - Probe retries are configured separately from request retries

pub mod backoff;
pub mod retries;

pub use retries::RetryPolicy;
