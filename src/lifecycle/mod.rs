//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (http/server.rs):
//!     Build registry → Eager probe of every backend → Start prober loop
//!     → Start stats reporter → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Cancel in-flight dispatches
//!     → Stop prober and await it → Report final stats → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - No traffic before the fleet has a known health state
//! - Shutdown is bounded: upstream calls are cancelled, not drained

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
