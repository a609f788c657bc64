use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Stage offsets relative to a round's launch instant.
///
/// Lead times are subtracted from the launch instant; `wrap_up_delay_minutes`
/// is added to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pre-notify fires this long before launch.
    #[serde(default = "default_pre_notify_lead")]
    pub pre_notify_lead_minutes: i64,
    /// Pre-flight fires this long before launch.
    #[serde(default = "default_pre_flight_lead")]
    pub pre_flight_lead_minutes: i64,
    /// Countdown fires this long before launch.
    #[serde(default = "default_countdown_lead")]
    pub countdown_lead_minutes: i64,
    /// Wrap-up fires this long after launch.
    #[serde(default = "default_wrap_up_delay")]
    pub wrap_up_delay_minutes: i64,
}

fn default_pre_notify_lead() -> i64 {
    24 * 60
}
fn default_pre_flight_lead() -> i64 {
    2 * 60
}
fn default_countdown_lead() -> i64 {
    15
}
fn default_wrap_up_delay() -> i64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pre_notify_lead_minutes: default_pre_notify_lead(),
            pre_flight_lead_minutes: default_pre_flight_lead(),
            countdown_lead_minutes: default_countdown_lead(),
            wrap_up_delay_minutes: default_wrap_up_delay(),
        }
    }
}

impl SchedulerConfig {
    /// Countdown lead as a duration.
    pub fn countdown_lead(&self) -> Duration {
        Duration::minutes(self.countdown_lead_minutes)
    }
}

/// Poll loop settings for the [`crate::JobRunner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Delay between polls of the job store.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Running jobs claimed longer ago than this are redelivered.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Most jobs claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Most jobs running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_stale_after_secs() -> u64 {
    600
}
fn default_batch_size() -> usize {
    16
}
fn default_max_concurrency() -> usize {
    4
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Timeouts and thresholds used by the [`crate::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on any single provider call.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Upper bound on one assessor call.
    #[serde(default = "default_assessment_timeout_secs")]
    pub assessment_timeout_secs: u64,
    /// Accepted deviation between provider list size and `recipient_count`, in percent.
    #[serde(default = "default_audience_tolerance_pct")]
    pub audience_tolerance_pct: f64,
}

fn default_provider_timeout_secs() -> u64 {
    30
}
fn default_assessment_timeout_secs() -> u64 {
    60
}
fn default_audience_tolerance_pct() -> f64 {
    2.0
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
            assessment_timeout_secs: default_assessment_timeout_secs(),
            audience_tolerance_pct: default_audience_tolerance_pct(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sections_fill_defaults() {
        let cfg: SchedulerConfig =
            serde_json::from_str(r#"{"wrap_up_delay_minutes": 90}"#).unwrap();
        assert_eq!(cfg.wrap_up_delay_minutes, 90);
        assert_eq!(cfg.pre_notify_lead_minutes, 24 * 60);

        let runner: RunnerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(runner, RunnerConfig::default());

        let orch: OrchestratorConfig =
            serde_json::from_str(r#"{"audience_tolerance_pct": 5.0}"#).unwrap();
        assert_eq!(orch.provider_timeout_secs, 30);
        assert!((orch.audience_tolerance_pct - 5.0).abs() < f64::EPSILON);
    }
}
