//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Client request
//!     → engine.rs (select, forward, retry with reselection)
//!     → upstream.rs (GET against the chosen backend, deadline, error class)
//!     → Dispatched or DispatchError (error.rs)
//! ```
//!
//! # Design Decisions
//! - The engine owns retry/failover; policies only pick
//! - Connection refused triggers an immediate re-probe through the prober
//! - Every outbound call goes through the `Upstream` trait

pub mod engine;
pub mod error;
pub mod upstream;

pub use engine::{DispatchEngine, Dispatched};
pub use error::DispatchError;
pub use upstream::{HyperUpstream, Upstream, UpstreamError, UpstreamResponse};
