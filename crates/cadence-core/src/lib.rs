//! Core types and error definitions for the Cadence campaign engine.
//!
//! This crate provides the foundational types shared across all Cadence crates:
//! the round record and its status machine, lifecycle jobs, and the report
//! shapes produced by pre-flight, launch, and wrap-up.
//!
//! # Main types
//!
//! - [`CadenceError`] — Unified error enum for all Cadence subsystems.
//! - [`CadenceResult`] — Convenience alias for `Result<T, CadenceError>`.
//! - [`RoundSchedule`] — One scheduled send of a campaign to a slice of its audience.
//! - [`RoundStatus`] — The per-round state machine.
//! - [`LifecycleJob`] — A time-anchored job keyed by `(schedule_id, stage)`.
//! - [`PreFlightReport`], [`LaunchOutcome`], [`WrapUpReport`] — Tagged operation results.

/// Lifecycle job types.
pub mod job;
/// Pre-flight, statistics, assessment, and wrap-up result types.
pub mod report;
/// Round records and the round status machine.
pub mod round;

pub use job::{JobKey, JobStatus, LifecycleJob, Stage};
pub use report::{
    Assessment, AssessmentInput, CampaignStats, CheckKind, Comparison, HealthStatus,
    LaunchOutcome, PreFlightCheck, PreFlightReport, Predictions, StatsDeltas, Trend,
    WrapUpReport,
};
pub use round::{
    resolve_instant, LaunchOverride, NotificationKind, NotificationRecord, RoundSchedule,
    RoundStatus, StatusTransition, ROUND_COUNT,
};

// --- Error types ---

/// Top-level error type for the Cadence engine.
///
/// Variants follow the campaign error taxonomy: request errors that are
/// returned synchronously (validation, gating, invalid transitions) and
/// failures recorded against a round (launch, scheduling, missing data).
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// Malformed or incomplete request. Nothing is persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown schedule id or campaign name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Launch attempted without a passed pre-flight and without override.
    #[error("Launch gated: {0}")]
    Gating(String),

    /// The provider rejected or failed the send. Recorded as `LAUNCH_FAILED`.
    #[error("Launch failed: {0}")]
    Launch(String),

    /// The job store could not materialize or replace lifecycle jobs.
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Statistics required for wrap-up could not be retrieved.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// The requested operation is not permitted from the round's current status.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Status the round was in.
        from: RoundStatus,
        /// Status the operation would have produced.
        to: RoundStatus,
    },

    /// The round is busy (e.g. a lifecycle job is mid-flight).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An error from the email-delivery provider.
    #[error("Provider error: {0}")]
    Provider(String),

    /// An error from the AI-assessment collaborator.
    #[error("Assessment error: {0}")]
    Assessment(String),

    /// An error from a notification channel.
    #[error("Channel error: {0}")]
    Channel(String),

    /// An error from the round or job store.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    /// Short machine-readable name of the error kind, used in API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CadenceError::Validation(_) => "validation",
            CadenceError::NotFound(_) => "not_found",
            CadenceError::Gating(_) => "gating",
            CadenceError::Launch(_) => "launch_failure",
            CadenceError::Scheduling(_) => "scheduling",
            CadenceError::DataUnavailable(_) => "data_unavailable",
            CadenceError::InvalidTransition { .. } => "invalid_transition",
            CadenceError::Conflict(_) => "conflict",
            CadenceError::Provider(_) => "provider",
            CadenceError::Assessment(_) => "assessment",
            CadenceError::Channel(_) => "channel",
            CadenceError::Store(_) => "store",
            CadenceError::Config(_) => "config",
            CadenceError::Json(_) => "json",
            CadenceError::Io(_) => "io",
        }
    }
}

/// A convenience `Result` alias using [`CadenceError`].
pub type CadenceResult<T> = Result<T, CadenceError>;
