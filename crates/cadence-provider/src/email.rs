use async_trait::async_trait;
use cadence_core::{CadenceResult, CampaignStats, RoundSchedule};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything the provider needs to send one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    /// Also used as the idempotency key.
    pub schedule_id: Uuid,
    /// Campaign the round belongs to.
    pub campaign_name: String,
    /// Position of the round.
    pub round_number: u32,
    /// Provider audience to send to.
    pub target_list_ref: String,
    /// Start of the round's slice.
    pub recipient_offset: u64,
    /// Size of the round's slice.
    pub recipient_count: u64,
    /// Subject line.
    pub subject: String,
    /// Sender display name.
    pub sender_name: String,
    /// Sender address.
    pub sender_email: String,
    /// Draft or template to send, if any.
    pub draft_ref: Option<String>,
}

impl From<&RoundSchedule> for SendRequest {
    fn from(round: &RoundSchedule) -> Self {
        Self {
            schedule_id: round.schedule_id,
            campaign_name: round.campaign_name.clone(),
            round_number: round.round_number,
            target_list_ref: round.target_list_ref.clone(),
            recipient_offset: round.recipient_offset,
            recipient_count: round.recipient_count,
            subject: round.subject.clone(),
            sender_name: round.sender_name.clone(),
            sender_email: round.sender_email.clone(),
            draft_ref: round.draft_ref.clone(),
        }
    }
}

/// Provider acknowledgement of an accepted send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider campaign id for later statistics lookups.
    pub provider_ref: String,
}

/// Email-delivery provider.
///
/// Every call is a network suspension point; callers bound them with
/// timeouts and treat failures as data (a failed check, a failed launch).
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Number of contacts currently on the referenced list.
    async fn audience_size(&self, list_ref: &str) -> CadenceResult<u64>;

    /// Whether the referenced draft or template exists.
    async fn draft_exists(&self, draft_ref: &str) -> CadenceResult<bool>;

    /// Whether the sender address is verified.
    async fn sender_verified(&self, sender_email: &str) -> CadenceResult<bool>;

    /// Hand the round to the provider for delivery.
    async fn send(&self, request: SendRequest) -> CadenceResult<SendReceipt>;

    /// Delivery statistics for a previously sent campaign.
    async fn campaign_stats(&self, provider_ref: &str) -> CadenceResult<CampaignStats>;
}
