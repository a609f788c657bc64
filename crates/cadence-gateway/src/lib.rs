//! REST surface for the Cadence engine.
//!
//! Thin axum handlers over the planner, orchestrator, and status
//! aggregator, with optional API-key auth and rate limiting.

/// Error to HTTP response mapping.
pub mod error;
/// Auth and rate-limit middleware.
pub mod middleware;
/// Route handlers.
pub mod routes;
/// Router assembly.
pub mod server;

pub use error::ApiError;
pub use middleware::AuthConfig;
pub use server::{AppState, GatewayServer};
