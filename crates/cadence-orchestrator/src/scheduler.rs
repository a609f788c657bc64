use crate::config::SchedulerConfig;
use cadence_core::{
    CadenceError, CadenceResult, JobStatus, LifecycleJob, RoundSchedule, Stage,
};
use cadence_store::JobStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-stage result of materializing a round's jobs.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleOutcome {
    /// Round the jobs belong to.
    pub schedule_id: Uuid,
    /// Jobs as stored.
    pub scheduled: Vec<LifecycleJob>,
    /// Stages that could not be written, with the reason.
    pub failed: Vec<(Stage, String)>,
}

impl ScheduleOutcome {
    /// Every stage got a job.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Maps rounds to absolute-time lifecycle jobs.
///
/// The scheduler owns the job store. It never touches round records.
pub struct LifecycleScheduler {
    jobs: Arc<dyn JobStore>,
    config: SchedulerConfig,
}

impl LifecycleScheduler {
    /// Scheduler writing to `jobs` with the given stage offsets.
    pub fn new(jobs: Arc<dyn JobStore>, config: SchedulerConfig) -> Self {
        Self { jobs, config }
    }

    /// Stage offsets in effect.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Signed offset of a stage from the launch instant.
    pub fn stage_offset(&self, stage: Stage) -> Duration {
        match stage {
            Stage::PreNotify => -Duration::minutes(self.config.pre_notify_lead_minutes),
            Stage::PreFlight => -Duration::minutes(self.config.pre_flight_lead_minutes),
            Stage::Countdown => -Duration::minutes(self.config.countdown_lead_minutes),
            Stage::Launch => Duration::zero(),
            Stage::WrapUp => Duration::minutes(self.config.wrap_up_delay_minutes),
        }
    }

    /// Fire time for `stage` of a round launching at `launch`.
    ///
    /// Stages already in the past fire immediately; pre-launch stages are
    /// never placed after the launch itself.
    pub fn fire_time(
        &self,
        stage: Stage,
        launch: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let nominal = launch + self.stage_offset(stage);
        let caught_up = nominal.max(now);
        if stage < Stage::Launch {
            caught_up.min(launch)
        } else {
            caught_up
        }
    }

    /// The full job set for a round, one job per stage.
    pub fn plan_jobs(
        &self,
        round: &RoundSchedule,
        now: DateTime<Utc>,
    ) -> CadenceResult<Vec<LifecycleJob>> {
        let launch = round.launch_instant()?;
        Ok(Stage::ALL
            .into_iter()
            .map(|stage| {
                LifecycleJob::new(round.schedule_id, stage, self.fire_time(stage, launch, now))
            })
            .collect())
    }

    /// Upsert one job per stage keyed by `(schedule_id, stage)`.
    ///
    /// Writing the same key twice overwrites the pending row. Stages whose
    /// job is currently running are left alone and reported in `failed`.
    pub async fn schedule_lifecycle_jobs(
        &self,
        round: &RoundSchedule,
    ) -> CadenceResult<ScheduleOutcome> {
        let planned = self.plan_jobs(round, Utc::now())?;
        let mut outcome = ScheduleOutcome {
            schedule_id: round.schedule_id,
            scheduled: Vec::with_capacity(planned.len()),
            failed: Vec::new(),
        };
        for job in planned {
            let stage = job.stage;
            match self.jobs.upsert(job).await {
                Ok(stored) => outcome.scheduled.push(stored),
                Err(e) => {
                    warn!(
                        schedule_id = %round.schedule_id,
                        stage = %stage,
                        error = %e,
                        "Failed to schedule stage"
                    );
                    outcome.failed.push((stage, e.to_string()));
                }
            }
        }
        info!(
            schedule_id = %round.schedule_id,
            scheduled = outcome.scheduled.len(),
            failed = outcome.failed.len(),
            "Lifecycle jobs scheduled"
        );
        Ok(outcome)
    }

    /// Cancel the round's still-pending jobs. Running jobs finish normally.
    pub async fn cancel_lifecycle_jobs(&self, schedule_id: Uuid) -> CadenceResult<usize> {
        let cancelled = self.jobs.cancel_pending(schedule_id).await?;
        info!(schedule_id = %schedule_id, cancelled, "Lifecycle jobs cancelled");
        Ok(cancelled)
    }

    /// Replace the round's whole job set in one atomic store operation.
    pub async fn reschedule_lifecycle_jobs(
        &self,
        round: &RoundSchedule,
    ) -> CadenceResult<Vec<LifecycleJob>> {
        let planned = self.plan_jobs(round, Utc::now())?;
        let stored = self
            .jobs
            .replace_for_schedule(round.schedule_id, planned)
            .await
            .map_err(|e| match e {
                CadenceError::Scheduling(_) => e,
                other => CadenceError::Scheduling(format!("Failed to replace jobs: {other}")),
            })?;
        info!(
            schedule_id = %round.schedule_id,
            jobs = stored.len(),
            "Lifecycle jobs rescheduled"
        );
        Ok(stored)
    }

    /// All jobs of a round, in stage order.
    pub async fn get_job_status(&self, schedule_id: Uuid) -> CadenceResult<Vec<LifecycleJob>> {
        self.jobs.list_for_schedule(schedule_id).await
    }

    /// True when every stage has a non-cancelled job.
    pub async fn are_jobs_scheduled(&self, schedule_id: Uuid) -> CadenceResult<bool> {
        let jobs = self.get_job_status(schedule_id).await?;
        Ok(jobs_cover_all_stages(&jobs))
    }

    /// Whether any job of the round is executing right now.
    pub async fn has_running_job(&self, schedule_id: Uuid) -> CadenceResult<bool> {
        let jobs = self.get_job_status(schedule_id).await?;
        Ok(jobs.iter().any(|j| j.status == JobStatus::Running))
    }
}

/// True when `jobs` hold a non-cancelled job for every stage.
pub fn jobs_cover_all_stages(jobs: &[LifecycleJob]) -> bool {
    Stage::ALL.iter().all(|stage| {
        jobs.iter()
            .any(|j| j.stage == *stage && j.status.is_active())
    })
}
