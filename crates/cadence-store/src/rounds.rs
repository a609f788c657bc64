use async_trait::async_trait;
use cadence_core::{CadenceResult, RoundSchedule, RoundStatus};
use uuid::Uuid;

/// Storage for [`RoundSchedule`] records. Rows are never deleted.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Insert all rounds in one atomic step.
    ///
    /// Fails without writing anything if any `schedule_id` or
    /// `(campaign_name, round_number)` pair already exists.
    async fn insert_rounds(&self, rounds: &[RoundSchedule]) -> CadenceResult<()>;

    /// The round with this id.
    async fn get(&self, schedule_id: Uuid) -> CadenceResult<Option<RoundSchedule>>;

    /// All rounds of a campaign ordered by `round_number`.
    async fn list_by_campaign(&self, campaign_name: &str) -> CadenceResult<Vec<RoundSchedule>>;

    /// Overwrite the stored round only if its persisted status still equals
    /// `expected`. Returns `false` when another writer moved it first.
    async fn update_if_status(
        &self,
        round: &RoundSchedule,
        expected: RoundStatus,
    ) -> CadenceResult<bool>;

    /// Whether any round of the campaign exists.
    async fn campaign_exists(&self, campaign_name: &str) -> CadenceResult<bool> {
        Ok(!self.list_by_campaign(campaign_name).await?.is_empty())
    }
}
