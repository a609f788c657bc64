//! Persistence for round records and lifecycle jobs.
//!
//! Callers of the orchestrator never touch these traits directly; the
//! planner, scheduler, and orchestrator receive them as `Arc<dyn …>`.
//!
//! # Main types
//!
//! - [`RoundStore`] — Round records with conditional (status-guarded) writes.
//! - [`JobStore`] — One row per `(schedule_id, stage)` with atomic claim/replace.
//! - [`MemoryRoundStore`], [`MemoryJobStore`] — In-process backends.
//! - [`SqliteStore`] — Durable backend implementing both traits.

/// Job store trait.
pub mod jobs;
/// In-memory backends.
pub mod memory;
/// Round store trait.
pub mod rounds;
/// SQLite backend.
pub mod sqlite;

pub use jobs::{JobOutcome, JobStore};
pub use memory::{MemoryJobStore, MemoryRoundStore};
pub use rounds::RoundStore;
pub use sqlite::SqliteStore;
