//! External collaborators of the campaign engine.
//!
//! The orchestrator only sees the [`EmailProvider`] and [`Assessor`] traits;
//! the HTTP implementations here are what a deployment wires in.
//!
//! # Main types
//!
//! - [`EmailProvider`] — Audience counts, draft/sender checks, send, statistics.
//! - [`HttpEmailProvider`] — JSON-over-HTTP provider client.
//! - [`Assessor`] — Produces a structured [`cadence_core::Assessment`].
//! - [`LlmAssessor`] — Assessor backed by an LLM messages API.

/// Assessor trait and LLM-backed implementation.
pub mod assessor;
/// Email provider trait and request/receipt types.
pub mod email;
/// HTTP email provider client.
pub mod http;

pub use assessor::{Assessor, AssessorConfig, LlmAssessor};
pub use email::{EmailProvider, SendReceipt, SendRequest};
pub use http::{HttpEmailProvider, ProviderConfig};
