use crate::channel::{Channel, Notification};
use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult, NotificationKind};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Slack channel adapter.
///
/// Posts to a Slack incoming-webhook URL. The webhook answers `200 ok` on
/// success; anything else is reported as a channel error.
pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

fn emoji(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::PreNotify => ":calendar:",
        NotificationKind::PreFlightPassed => ":white_check_mark:",
        NotificationKind::PreFlightFailed => ":warning:",
        NotificationKind::Countdown => ":hourglass_flowing_sand:",
        NotificationKind::Launched => ":rocket:",
        NotificationKind::LaunchFailed => ":x:",
        NotificationKind::WrappedUp => ":bar_chart:",
        NotificationKind::Cancelled => ":no_entry_sign:",
    }
}

impl SlackChannel {
    /// Create a new `SlackChannel`.
    ///
    /// * `webhook_url` – Incoming-webhook URL (`https://hooks.slack.com/...`).
    /// * `timeout` – Per-request timeout.
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> CadenceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CadenceError::Channel(format!("Slack client error: {e}")))?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, notification: Notification) -> CadenceResult<()> {
        let text = format!("{} {}", emoji(notification.kind), notification.text);
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&WebhookPayload { text: &text })
            .send()
            .await
            .map_err(|e| CadenceError::Channel(format!("Slack webhook error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CadenceError::Channel(format!(
                "Slack webhook returned {status}: {body}"
            )));
        }

        debug!(
            schedule_id = %notification.schedule_id,
            kind = %notification.kind,
            "Slack notification sent"
        );
        Ok(())
    }
}
