use crate::partition::{partition, verify_partition, PartitionPolicy};
use crate::scheduler::{LifecycleScheduler, ScheduleOutcome};
use cadence_core::{
    resolve_instant, CadenceError, CadenceResult, RoundSchedule, RoundStatus, ROUND_COUNT,
};
use cadence_store::RoundStore;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A campaign creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    /// Unique campaign name.
    pub campaign_name: String,
    /// One provider audience reference per round.
    pub audience_refs: Vec<String>,
    /// Subject line shared by every round.
    pub subject: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// Sender address; must be verified at the provider before launch.
    pub sender_email: String,
    /// Audience size split across the rounds.
    pub total_recipients: u64,
    /// Send date of round 1.
    pub start_date: NaiveDate,
    /// Local send time of every round.
    pub send_time: NaiveTime,
    /// Offset of the local time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Days between consecutive rounds.
    #[serde(default = "default_interval")]
    pub round_interval_days: u32,
    /// Provider draft or template checked during pre-flight.
    #[serde(default)]
    pub draft_ref: Option<String>,
}

fn default_interval() -> u32 {
    1
}

/// A persisted round whose jobs could not all be enqueued.
#[derive(Debug, Clone, Serialize)]
pub struct UnscheduledRound {
    /// The persisted round.
    pub schedule_id: Uuid,
    /// Its position within the campaign.
    pub round_number: u32,
    /// Why scheduling failed.
    pub error: String,
}

/// Rounds created for one campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCampaignResult {
    /// Name the rounds were created under.
    pub campaign_name: String,
    /// One record per round, in round order.
    pub schedules: Vec<RoundSchedule>,
    /// Rounds that need `schedule_round` to be retried.
    pub unscheduled: Vec<UnscheduledRound>,
}

/// Creates a campaign's round records from one request.
pub struct RoundPlanner {
    rounds: Arc<dyn RoundStore>,
    scheduler: Arc<LifecycleScheduler>,
    policy: PartitionPolicy,
    create_lock: tokio::sync::Mutex<()>,
}

fn require(field: &str, value: &str) -> CadenceResult<()> {
    if value.trim().is_empty() {
        return Err(CadenceError::Validation(format!("{field} must not be blank")));
    }
    Ok(())
}

impl RoundPlanner {
    /// Planner splitting audiences with `policy`.
    pub fn new(
        rounds: Arc<dyn RoundStore>,
        scheduler: Arc<LifecycleScheduler>,
        policy: PartitionPolicy,
    ) -> Self {
        Self {
            rounds,
            scheduler,
            policy,
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Check a request and build its rounds without persisting anything.
    pub fn plan(&self, req: &CreateCampaignRequest) -> CadenceResult<Vec<RoundSchedule>> {
        require("campaign_name", &req.campaign_name)?;
        require("subject", &req.subject)?;
        require("sender_name", &req.sender_name)?;
        require("sender_email", &req.sender_email)?;
        if !req.sender_email.contains('@') {
            return Err(CadenceError::Validation(format!(
                "sender_email '{}' is not an email address",
                req.sender_email
            )));
        }
        if req.audience_refs.len() != ROUND_COUNT {
            return Err(CadenceError::Validation(format!(
                "exactly {ROUND_COUNT} audience_refs are required, got {}",
                req.audience_refs.len()
            )));
        }
        let mut seen = HashSet::new();
        for (i, audience) in req.audience_refs.iter().enumerate() {
            require(&format!("audience_refs[{i}]"), audience)?;
            if !seen.insert(audience.trim()) {
                return Err(CadenceError::Validation(format!(
                    "audience reference '{audience}' is used by more than one round"
                )));
            }
        }
        if req.total_recipients < ROUND_COUNT as u64 {
            return Err(CadenceError::Validation(format!(
                "total_recipients must be at least {ROUND_COUNT}, got {}",
                req.total_recipients
            )));
        }
        if req.round_interval_days == 0 {
            return Err(CadenceError::Validation(
                "round_interval_days must be at least 1".into(),
            ));
        }
        let first_launch = resolve_instant(req.start_date, req.send_time, req.utc_offset_minutes)?;
        if first_launch <= Utc::now() {
            return Err(CadenceError::Validation(format!(
                "round 1 launch time {first_launch} is not in the future"
            )));
        }
        if let Some(draft) = &req.draft_ref {
            require("draft_ref", draft)?;
        }

        let slices = partition(req.total_recipients, ROUND_COUNT, &self.policy)?;
        let mut rounds = Vec::with_capacity(ROUND_COUNT);
        for (i, (audience, slice)) in req.audience_refs.iter().zip(slices).enumerate() {
            let date = req.start_date
                + Duration::days(i as i64 * i64::from(req.round_interval_days));
            let mut round = RoundSchedule::new(
                req.campaign_name.trim(),
                i as u32 + 1,
                audience.trim(),
                slice,
                req.total_recipients,
                req.subject.trim(),
                req.sender_name.trim(),
                req.sender_email.trim(),
                date,
                req.send_time,
                req.utc_offset_minutes,
            );
            round.draft_ref = req.draft_ref.as_ref().map(|d| d.trim().to_string());
            rounds.push(round);
        }

        let ranges: Vec<_> = rounds.iter().map(RoundSchedule::recipient_range).collect();
        verify_partition(&ranges, req.total_recipients)?;
        Ok(rounds)
    }

    /// Validate, persist the rounds atomically, then materialize each
    /// round's jobs. Rounds whose jobs failed stay persisted and are listed
    /// in `unscheduled`.
    pub async fn create_campaign(
        &self,
        req: CreateCampaignRequest,
    ) -> CadenceResult<CreateCampaignResult> {
        let rounds = self.plan(&req)?;
        let campaign_name = rounds[0].campaign_name.clone();

        {
            let _guard = self.create_lock.lock().await;
            if self.rounds.campaign_exists(&campaign_name).await? {
                return Err(CadenceError::Validation(format!(
                    "campaign '{campaign_name}' already exists"
                )));
            }
            self.rounds.insert_rounds(&rounds).await?;
        }
        info!(
            campaign = %campaign_name,
            total_recipients = req.total_recipients,
            "Campaign rounds created"
        );

        let mut unscheduled = Vec::new();
        for round in &rounds {
            let failure = match self.scheduler.schedule_lifecycle_jobs(round).await {
                Ok(outcome) if outcome.is_complete() => None,
                Ok(outcome) => Some(describe_failures(&outcome)),
                Err(e) => Some(e.to_string()),
            };
            if let Some(error) = failure {
                warn!(schedule_id = %round.schedule_id, error = %error, "Round left unscheduled");
                unscheduled.push(UnscheduledRound {
                    schedule_id: round.schedule_id,
                    round_number: round.round_number,
                    error,
                });
            }
        }

        Ok(CreateCampaignResult {
            campaign_name,
            schedules: rounds,
            unscheduled,
        })
    }

    /// Retry job materialization for one persisted round.
    pub async fn schedule_round(&self, schedule_id: Uuid) -> CadenceResult<ScheduleOutcome> {
        let round = self
            .rounds
            .get(schedule_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("schedule {schedule_id}")))?;
        if !round.status.is_cancellable() {
            return Err(CadenceError::InvalidTransition {
                from: round.status,
                to: RoundStatus::Scheduled,
            });
        }
        let outcome = self.scheduler.schedule_lifecycle_jobs(&round).await?;
        if !outcome.is_complete() {
            return Err(CadenceError::Scheduling(describe_failures(&outcome)));
        }
        Ok(outcome)
    }
}

fn describe_failures(outcome: &ScheduleOutcome) -> String {
    outcome
        .failed
        .iter()
        .map(|(stage, e)| format!("{stage}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
