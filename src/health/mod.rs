//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → prober.rs probe_all (eager, before serving)
//!
//! Periodic timer / probe hint
//!     → prober.rs (GET <base>/<path>, with retries)
//!     → registry.set_health → state.rs
//!
//! Dispatch engine, connection refused
//!     → prober.rs probe_one (awaited before the retry)
//! ```
//!
//! # Design Decisions
//! - The prober is the only writer of health state
//! - Backends start Unknown and are not eligible until a probe passes
//! - Health state is per-backend; there is no pool grouping

pub mod prober;
pub mod state;

pub use prober::HealthProber;
pub use state::HealthState;
