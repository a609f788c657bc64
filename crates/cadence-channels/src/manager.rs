use crate::channel::{Channel, Notification};
use cadence_core::CadenceError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of fanning one notification out to every channel.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Channels that accepted the notification.
    pub delivered: Vec<String>,
    /// Channels that rejected it, with the error.
    pub failed: Vec<(String, CadenceError)>,
}

impl BroadcastReport {
    /// True when at least one channel accepted the notification.
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Manages the notification channels of one deployment.
///
/// Channels are kept in name order so broadcasts are deterministic.
pub struct ChannelManager {
    channels: BTreeMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    /// Manager with no channels; broadcasts deliver nothing.
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
        }
    }

    /// Add a channel; a channel with the same name is replaced.
    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        self.channels.insert(name, channel);
    }

    /// Broadcast a notification to all registered channels.
    /// Failures are collected, never propagated.
    pub async fn broadcast(&self, notification: &Notification) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (name, channel) in &self.channels {
            match channel.send(notification.clone()).await {
                Ok(()) => report.delivered.push(name.clone()),
                Err(e) => {
                    tracing::warn!(
                        channel = %name,
                        schedule_id = %notification.schedule_id,
                        kind = %notification.kind,
                        error = %e,
                        "Notification send failed"
                    );
                    report.failed.push((name.clone(), e));
                }
            }
        }
        report
    }

    /// List all registered channel names.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
