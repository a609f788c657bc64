//! Notification channels for round lifecycle events.
//!
//! Provides a [`Channel`] trait, concrete implementations, and a manager
//! that fans one [`Notification`] out to every registered channel.
//!
//! # Main types
//!
//! - [`Channel`] — Trait for delivering a notification to one destination.
//! - [`ChannelManager`] — Routes and broadcasts notifications.
//! - [`SlackChannel`] — Slack incoming-webhook channel.
//! - [`LogChannel`] — Emits notifications as structured log events.

/// Core channel trait and notification type.
pub mod channel;
/// Log-only channel.
pub mod logging;
/// Channel manager for broadcast delivery.
pub mod manager;
/// Slack incoming-webhook channel.
pub mod slack;

pub use channel::{Channel, Notification};
pub use logging::LogChannel;
pub use manager::{BroadcastReport, ChannelManager};
pub use slack::SlackChannel;
