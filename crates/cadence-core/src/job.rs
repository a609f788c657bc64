use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle stage a job drives for its round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Heads-up notification a day ahead.
    #[serde(rename = "PRE_NOTIFY")]
    PreNotify,
    /// Readiness checklist against the provider.
    #[serde(rename = "PRE_FLIGHT")]
    PreFlight,
    /// Final notification minutes before the send.
    #[serde(rename = "COUNTDOWN")]
    Countdown,
    /// The send itself.
    #[serde(rename = "LAUNCH")]
    Launch,
    /// Statistics retrieval and assessment after the send.
    #[serde(rename = "WRAPUP")]
    WrapUp,
}

impl Stage {
    /// All stages in firing order.
    pub const ALL: [Stage; 5] = [
        Stage::PreNotify,
        Stage::PreFlight,
        Stage::Countdown,
        Stage::Launch,
        Stage::WrapUp,
    ];

    /// Wire name of the stage.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::PreNotify => "PRE_NOTIFY",
            Stage::PreFlight => "PRE_FLIGHT",
            Stage::Countdown => "COUNTDOWN",
            Stage::Launch => "LAUNCH",
            Stage::WrapUp => "WRAPUP",
        }
    }

    /// Inverse of [`Stage::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a job in the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for its fire time.
    Pending,
    /// Claimed by a runner.
    Running,
    /// Handler returned success.
    Completed,
    /// Handler returned an error.
    Failed,
    /// Cancelled or replaced before it ran.
    Cancelled,
}

impl JobStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Inverse of [`JobStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Any status other than `cancelled` counts as active for the
    /// single-active-job rule.
    pub fn is_active(self) -> bool {
        self != JobStatus::Cancelled
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic identity of a lifecycle job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Round the job belongs to.
    pub schedule_id: Uuid,
    /// Stage the job drives.
    pub stage: Stage,
}

impl JobKey {
    /// Key for one stage of one round.
    pub fn new(schedule_id: Uuid, stage: Stage) -> Self {
        Self { schedule_id, stage }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.schedule_id, self.stage)
    }
}

/// A delayed task that fires one lifecycle stage of one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleJob {
    /// Round the job belongs to.
    pub schedule_id: Uuid,
    /// Stage the job drives.
    pub stage: Stage,
    /// Absolute fire time.
    pub fire_at: DateTime<Utc>,
    /// Execution status.
    pub status: JobStatus,
    /// Number of times the job has been claimed by a runner.
    #[serde(default)]
    pub attempts: u32,
    /// Bumped every time the key is re-materialized by the scheduler.
    #[serde(default)]
    pub generation: u32,
    /// Handler error of the last failed run.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When a runner claimed it; used to requeue stale claims.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the job was first written.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl LifecycleJob {
    /// A pending job for `stage` firing at `fire_at`.
    pub fn new(schedule_id: Uuid, stage: Stage, fire_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            schedule_id,
            stage,
            fire_at,
            status: JobStatus::Pending,
            attempts: 0,
            generation: 0,
            last_error: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The job's `(schedule_id, stage)` identity.
    pub fn key(&self) -> JobKey {
        JobKey::new(self.schedule_id, self.stage)
    }

    /// Pending and past its fire time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.fire_at <= now
    }
}
