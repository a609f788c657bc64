//! Campaign lifecycle orchestration: planning, scheduling, and the round
//! state machine.
//!
//! A creation request enters the [`RoundPlanner`], which persists one record
//! per round and asks the [`LifecycleScheduler`] for its time-anchored jobs.
//! The [`JobRunner`] claims due jobs and hands them to the [`Orchestrator`],
//! the only component that moves a round through its statuses.
//!
//! # Main types
//!
//! - [`RoundPlanner`] — Validates a campaign and creates its rounds.
//! - [`LifecycleScheduler`] — Materializes, cancels, and replaces lifecycle jobs.
//! - [`JobRunner`] — Polls the job store and dispatches due jobs.
//! - [`Orchestrator`] — Pre-flight, gated launch, wrap-up, cancel, reschedule.
//! - [`StatusAggregator`] — Read-only campaign status view.

/// Runtime settings for every component.
pub mod config;
/// Round state machine and lifecycle operations.
pub mod engine;
mod locks;
/// Audience partition policies.
pub mod partition;
/// Campaign creation.
pub mod planner;
/// Durable job poll loop.
pub mod runner;
/// Stage offsets and job materialization.
pub mod scheduler;
/// Campaign status aggregation.
pub mod status;

pub use config::{OrchestratorConfig, RunnerConfig, SchedulerConfig};
pub use engine::{Orchestrator, RescheduleRequest, RescheduleResult};
pub use partition::{partition, verify_partition, PartitionPolicy};
pub use planner::{CreateCampaignRequest, CreateCampaignResult, RoundPlanner, UnscheduledRound};
pub use runner::{JobHandler, JobRunner};
pub use scheduler::{LifecycleScheduler, ScheduleOutcome};
pub use status::{CampaignStatus, CampaignTotals, RoundView, StatusAggregator};
