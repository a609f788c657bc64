use crate::scheduler::{jobs_cover_all_stages, LifecycleScheduler};
use cadence_core::{CadenceError, CadenceResult, LifecycleJob, RoundSchedule, RoundStatus};
use cadence_store::RoundStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One round with its jobs.
#[derive(Debug, Clone, Serialize)]
pub struct RoundView {
    /// The stored round record.
    #[serde(flatten)]
    pub round: RoundSchedule,
    /// Absolute launch instant; absent when the stored date is invalid.
    pub launch_at: Option<DateTime<Utc>>,
    /// The round's jobs in stage order.
    pub jobs: Vec<LifecycleJob>,
    /// Every stage has a live job.
    pub jobs_scheduled: bool,
}

/// Aggregate figures over a campaign's rounds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignTotals {
    /// Number of rounds.
    pub rounds: usize,
    /// Declared audience size.
    pub total_recipients: u64,
    /// Recipients of rounds the provider accepted.
    pub recipients_launched: u64,
    /// Round count per status.
    pub by_status: BTreeMap<RoundStatus, usize>,
}

/// Status of one campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatus {
    /// The campaign.
    pub campaign_name: String,
    /// Its rounds in order.
    pub rounds: Vec<RoundView>,
    /// Aggregates over the rounds.
    pub totals: CampaignTotals,
}

/// Read-only view composing round records and job state.
pub struct StatusAggregator {
    rounds: Arc<dyn RoundStore>,
    scheduler: Arc<LifecycleScheduler>,
}

impl StatusAggregator {
    /// View over `rounds` and their jobs.
    pub fn new(rounds: Arc<dyn RoundStore>, scheduler: Arc<LifecycleScheduler>) -> Self {
        Self { rounds, scheduler }
    }

    /// Rounds ordered by `round_number`, each with its jobs, plus totals.
    pub async fn get_campaign_status(&self, campaign_name: &str) -> CadenceResult<CampaignStatus> {
        let rounds = self.rounds.list_by_campaign(campaign_name).await?;
        if rounds.is_empty() {
            return Err(CadenceError::NotFound(format!("campaign '{campaign_name}'")));
        }

        let mut totals = CampaignTotals {
            rounds: rounds.len(),
            total_recipients: rounds[0].total_recipients,
            ..CampaignTotals::default()
        };
        let mut views = Vec::with_capacity(rounds.len());
        for round in rounds {
            let jobs = self.scheduler.get_job_status(round.schedule_id).await?;
            *totals.by_status.entry(round.status).or_default() += 1;
            if round.status.is_launched() {
                totals.recipients_launched += round.recipient_count;
            }
            views.push(RoundView {
                launch_at: round.launch_instant().ok(),
                jobs_scheduled: jobs_cover_all_stages(&jobs),
                jobs,
                round,
            });
        }

        Ok(CampaignStatus {
            campaign_name: campaign_name.to_string(),
            rounds: views,
            totals,
        })
    }
}
