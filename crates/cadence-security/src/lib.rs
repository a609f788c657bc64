//! Security and accountability primitives for the Cadence engine.
//!
//! # Main types
//!
//! - [`AuditLog`] — Append-only audit trail of operator-visible actions
//!   (launch overrides, launches, cancellations), persisted as JSON lines.
//! - [`RateLimiter`] — Token-bucket rate limiter for the REST surface.

/// Audit logging module.
pub mod audit;
/// Token-bucket rate limiting.
pub mod rate_limit;

pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use rate_limit::{RateDecision, RateLimiter};
