use async_trait::async_trait;
use cadence_core::{CadenceResult, JobKey, LifecycleJob};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler succeeded.
    Completed,
    /// Handler failed with this message.
    Failed(String),
}

/// Durable delayed-task table keyed by `(schedule_id, stage)`.
///
/// Exactly one row exists per key, so at most one non-cancelled job per
/// stage can exist at any time.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert the job, or overwrite the row already holding its key.
    ///
    /// A pending row is overwritten in place (same generation). A finished or
    /// cancelled row is replaced by a fresh pending job with the next
    /// generation. A running row is left alone and the call fails with
    /// `CadenceError::Scheduling`.
    async fn upsert(&self, job: LifecycleJob) -> CadenceResult<LifecycleJob>;

    /// Atomically replace the whole job set of a schedule.
    ///
    /// Every key in `jobs` gets a fresh pending row (next generation); pending
    /// rows of the schedule not in `jobs` are cancelled. If any affected row is
    /// running nothing is written and the call fails.
    async fn replace_for_schedule(
        &self,
        schedule_id: Uuid,
        jobs: Vec<LifecycleJob>,
    ) -> CadenceResult<Vec<LifecycleJob>>;

    /// The job stored under `key`.
    async fn get(&self, key: JobKey) -> CadenceResult<Option<LifecycleJob>>;

    /// Jobs of one schedule in stage order.
    async fn list_for_schedule(&self, schedule_id: Uuid) -> CadenceResult<Vec<LifecycleJob>>;

    /// Cancel pending jobs of the schedule; returns how many were cancelled.
    async fn cancel_pending(&self, schedule_id: Uuid) -> CadenceResult<usize>;

    /// Claim up to `limit` due pending jobs, earliest first, moving them to
    /// running. A job is handed to exactly one caller per claim.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize)
        -> CadenceResult<Vec<LifecycleJob>>;

    /// Record the end of a claimed job if it is still running at
    /// `generation`. Returns `false` when the row was replaced meanwhile.
    async fn finish(
        &self,
        key: JobKey,
        generation: u32,
        outcome: JobOutcome,
    ) -> CadenceResult<bool>;

    /// Return running jobs claimed before `cutoff` to pending so they are
    /// redelivered. Returns how many were requeued.
    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> CadenceResult<usize>;
}
