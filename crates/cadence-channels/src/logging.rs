use crate::channel::{Channel, Notification};
use async_trait::async_trait;
use cadence_core::CadenceResult;
use tracing::info;

/// Writes notifications to the tracing pipeline. Always succeeds.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    /// Channel that writes notifications to the tracing log.
    pub fn new() -> Self {
        Self { name: "log".into() }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: Notification) -> CadenceResult<()> {
        info!(
            schedule_id = %notification.schedule_id,
            campaign = %notification.campaign_name,
            round = notification.round_number,
            kind = %notification.kind,
            "{}",
            notification.text
        );
        Ok(())
    }
}
