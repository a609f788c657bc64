use crate::round::RoundStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Pre-flight ---

/// Items of the pre-flight checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Provider audience size matches `recipient_count` within tolerance.
    AudienceSize,
    /// The referenced draft/template exists at the provider.
    DraftExists,
    /// The sender address is verified at the provider.
    SenderVerified,
    /// The round carries no unresolved launch failure.
    NoUnresolvedFailure,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckKind::AudienceSize => "audience_size",
            CheckKind::DraftExists => "draft_exists",
            CheckKind::SenderVerified => "sender_verified",
            CheckKind::NoUnresolvedFailure => "no_unresolved_failure",
        };
        f.write_str(s)
    }
}

/// Result of one checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreFlightCheck {
    /// Which item this is.
    pub check: CheckKind,
    /// Whether the item passed.
    pub passed: bool,
    /// Human-readable explanation.
    pub detail: String,
}

impl PreFlightCheck {
    /// A passed item.
    pub fn pass(check: CheckKind, detail: impl Into<String>) -> Self {
        Self {
            check,
            passed: true,
            detail: detail.into(),
        }
    }

    /// A failed item.
    pub fn fail(check: CheckKind, detail: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Itemized pre-flight result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreFlightReport {
    /// Round that was checked.
    pub schedule_id: Uuid,
    /// True when every item passed.
    pub passed: bool,
    /// One entry per checklist item.
    pub checks: Vec<PreFlightCheck>,
    /// Round status after the run.
    pub status: RoundStatus,
    /// When the checklist ran.
    pub checked_at: DateTime<Utc>,
    /// Set when the checklist was not run because the round is past pre-flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl PreFlightReport {
    /// Report over `checks`, passed when all of them passed.
    pub fn from_checks(
        schedule_id: Uuid,
        checks: Vec<PreFlightCheck>,
        status: RoundStatus,
    ) -> Self {
        Self {
            schedule_id,
            passed: checks.iter().all(|c| c.passed),
            checks,
            status,
            checked_at: Utc::now(),
            skipped: None,
        }
    }

    /// Report for a round whose status makes the checklist meaningless.
    pub fn skipped(schedule_id: Uuid, status: RoundStatus, reason: impl Into<String>) -> Self {
        Self {
            schedule_id,
            passed: false,
            checks: Vec::new(),
            status,
            checked_at: Utc::now(),
            skipped: Some(reason.into()),
        }
    }

    /// `check: detail` for every failed item, joined with `; `.
    pub fn failure_summary(&self) -> Option<String> {
        let failed: Vec<String> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.check, c.detail))
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(failed.join("; "))
        }
    }
}

// --- Launch ---

/// Result of a launch call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// This call performed the send.
    Launched {
        /// Provider campaign id.
        provider_ref: String,
        /// When the provider accepted the send.
        launched_at: DateTime<Utc>,
        /// Launched with `skip_pre_flight`.
        override_used: bool,
    },
    /// The round had already been launched; nothing was sent.
    AlreadyLaunched {
        /// Provider campaign id of the earlier send.
        provider_ref: Option<String>,
        /// When the earlier send was accepted.
        launched_at: Option<DateTime<Utc>>,
        /// Current round status.
        status: RoundStatus,
    },
    /// Another caller is mid-send; nothing was sent.
    InProgress,
}

// --- Statistics & assessment ---

/// Post-send delivery and engagement counters for one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignStats {
    /// Messages sent.
    pub recipients: u64,
    /// Messages accepted by recipient servers.
    pub delivered: u64,
    /// Recipients who opened at least once.
    pub unique_opens: u64,
    /// Recipients who clicked at least once.
    pub unique_clicks: u64,
    /// Hard and soft bounces.
    pub bounces: u64,
    /// Recipients who unsubscribed.
    pub unsubscribes: u64,
    /// Spam complaints.
    pub complaints: u64,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64 * 100.0
    }
}

impl CampaignStats {
    /// Unique opens per delivered message, in percent.
    pub fn open_rate(&self) -> f64 {
        ratio(self.unique_opens, self.delivered)
    }

    /// Unique clicks per delivered message, in percent.
    pub fn click_rate(&self) -> f64 {
        ratio(self.unique_clicks, self.delivered)
    }

    /// Bounces per recipient, in percent.
    pub fn bounce_rate(&self) -> f64 {
        ratio(self.bounces, self.recipients)
    }
}

/// Percentage-point change from the previous round to this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsDeltas {
    /// Open rate change, in points.
    pub open_rate: f64,
    /// Click rate change, in points.
    pub click_rate: f64,
    /// Bounce rate change, in points.
    pub bounce_rate: f64,
}

impl StatsDeltas {
    /// Rate changes from `previous` to `current`.
    pub fn between(previous: &CampaignStats, current: &CampaignStats) -> Self {
        Self {
            open_rate: current.open_rate() - previous.open_rate(),
            click_rate: current.click_rate() - previous.click_rate(),
            bounce_rate: current.bounce_rate() - previous.bounce_rate(),
        }
    }
}

/// Trend comparison against the preceding round.
///
/// `Unavailable` carries only a reason: there is deliberately no numeric
/// baseline in that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Comparison {
    /// The previous round's statistics were retrieved.
    Available {
        /// Number of the round compared against.
        previous_round: u32,
        /// Its statistics.
        previous: CampaignStats,
        /// Change from it to this round.
        deltas: StatsDeltas,
    },
    /// No baseline; `reason` says why.
    Unavailable {
        /// Why no baseline exists.
        reason: String,
    },
}

impl Comparison {
    /// Whether a baseline was retrieved.
    pub fn is_available(&self) -> bool {
        matches!(self, Comparison::Available { .. })
    }

    /// Baseline statistics, when available.
    pub fn previous_stats(&self) -> Option<&CampaignStats> {
        match self {
            Comparison::Available { previous, .. } => Some(previous),
            Comparison::Unavailable { .. } => None,
        }
    }
}

/// Overall health verdict of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Within normal ranges.
    Healthy,
    /// Needs attention.
    Warning,
    /// Needs action before the next round.
    Critical,
}

/// Direction of engagement against the previous round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Engagement is up.
    Improving,
    /// No meaningful change.
    Stable,
    /// Engagement is down.
    Declining,
    /// No previous round to compare with.
    Unknown,
}

/// What the assessor receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentInput {
    /// Statistics of the round being assessed.
    pub current_stats: CampaignStats,
    /// Statistics of the round before it, if retrieved.
    pub previous_stats: Option<CampaignStats>,
    /// Describes the round's audience slice.
    pub audience_segment_label: String,
}

/// Assessor forecasts for the next round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    /// Expected open rate, in percent.
    #[serde(default)]
    pub next_round_open_rate: Option<f64>,
    /// Expected click rate, in percent.
    #[serde(default)]
    pub next_round_click_rate: Option<f64>,
    /// Free-text caveats.
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Structured quality assessment produced by the assessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// 0–100.
    pub quality_score: u8,
    /// Overall verdict.
    pub health_status: HealthStatus,
    /// Direction against the previous round.
    pub trend: Trend,
    /// One-paragraph summary.
    pub executive_summary: String,
    /// Observations.
    #[serde(default)]
    pub insights: Vec<String>,
    /// Suggested changes for the next round.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Forecasts for the next round.
    #[serde(default)]
    pub predictions: Predictions,
}

// --- Wrap-up ---

/// Everything wrap-up attaches to a launched round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapUpReport {
    /// Round that was wrapped up.
    pub schedule_id: Uuid,
    /// Its position within the campaign.
    pub round_number: u32,
    /// Its statistics.
    pub current: CampaignStats,
    /// Trend against the previous round.
    pub comparison: Comparison,
    /// Assessor output.
    pub assessment: Assessment,
    /// When wrap-up finished.
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn stats(delivered: u64, opens: u64) -> CampaignStats {
        CampaignStats {
            recipients: 1000,
            delivered,
            unique_opens: opens,
            unique_clicks: opens / 10,
            bounces: 1000 - delivered,
            ..Default::default()
        }
    }

    #[test]
    fn test_rates_guard_zero() {
        let s = CampaignStats::default();
        assert_eq!(s.open_rate(), 0.0);
        assert_eq!(s.bounce_rate(), 0.0);
    }

    #[test]
    fn test_deltas() {
        let prev = stats(1000, 200);
        let cur = stats(1000, 300);
        let d = StatsDeltas::between(&prev, &cur);
        assert!((d.open_rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_unavailable_comparison_has_no_numbers() {
        let c = Comparison::Unavailable {
            reason: "round 1 has no predecessor".into(),
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert!(json.get("previous").is_none());
        assert!(json.get("deltas").is_none());
        assert!(c.previous_stats().is_none());
    }

    #[test]
    fn test_failure_summary_names_checks() {
        let report = PreFlightReport::from_checks(
            Uuid::new_v4(),
            vec![
                PreFlightCheck::fail(CheckKind::AudienceSize, "950 vs 1000"),
                PreFlightCheck::pass(CheckKind::DraftExists, "ok"),
            ],
            RoundStatus::PreFlightFailed,
        );
        assert!(!report.passed);
        assert_eq!(
            report.failure_summary().unwrap(),
            "audience_size: 950 vs 1000"
        );
    }

    #[test]
    fn test_launch_outcome_tagging() {
        let json = serde_json::to_value(LaunchOutcome::InProgress).unwrap();
        assert_eq!(json["outcome"], "in_progress");
    }

    #[test]
    fn test_assessment_defaults_optional_lists() {
        let json = r#"{
            "quality_score": 81,
            "health_status": "healthy",
            "trend": "stable",
            "executive_summary": "Solid round."
        }"#;
        let a: Assessment = serde_json::from_str(json).unwrap();
        assert!(a.insights.is_empty());
        assert_eq!(a.predictions, Predictions::default());
    }
}
