//! HTTP load balancer with health probing and retrying dispatch.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod http;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use dispatch::{DispatchEngine, DispatchError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
