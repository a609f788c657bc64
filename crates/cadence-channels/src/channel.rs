use async_trait::async_trait;
use cadence_core::{CadenceResult, NotificationKind, RoundSchedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A lifecycle notification about one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Round the notification is about.
    pub schedule_id: Uuid,
    /// Its campaign.
    pub campaign_name: String,
    /// Its position within the campaign.
    pub round_number: u32,
    /// Lifecycle stage being reported.
    pub kind: NotificationKind,
    /// Rendered message, headline included.
    pub text: String,
    /// When the notification was built.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification for `round`, prefixing the text with the
    /// campaign and round so every channel shows the same headline.
    pub fn for_round(round: &RoundSchedule, kind: NotificationKind, detail: &str) -> Self {
        let text = format!(
            "[{}] round {}: {}",
            round.campaign_name, round.round_number, detail
        );
        Self {
            schedule_id: round.schedule_id,
            campaign_name: round.campaign_name.clone(),
            round_number: round.round_number,
            kind,
            text,
            created_at: Utc::now(),
        }
    }
}

/// A notification sink such as a log or a chat webhook.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name; also the key in delivery reports.
    fn name(&self) -> &str;
    /// Deliver one notification.
    async fn send(&self, notification: Notification) -> CadenceResult<()>;
}
