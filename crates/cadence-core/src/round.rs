use crate::report::{PreFlightReport, WrapUpReport};
use crate::{CadenceError, CadenceResult};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use uuid::Uuid;

/// Number of rounds every campaign is split into.
pub const ROUND_COUNT: usize = 3;

/// Largest accepted UTC offset, in minutes (±14h).
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// Status of a single campaign round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    /// Created, jobs (possibly) pending, nothing checked yet.
    Scheduled,
    /// Last pre-flight checklist passed.
    PreFlightPassed,
    /// Last pre-flight checklist failed; see `last_error`.
    PreFlightFailed,
    /// A send is in progress with the provider.
    Launching,
    /// The provider accepted the send.
    Launched,
    /// The provider rejected the send; requires a human decision.
    LaunchFailed,
    /// Post-launch assessment attached.
    WrappedUp,
    /// Cancelled before launch.
    Cancelled,
}

impl RoundStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [RoundStatus; 8] = [
        RoundStatus::Scheduled,
        RoundStatus::PreFlightPassed,
        RoundStatus::PreFlightFailed,
        RoundStatus::Launching,
        RoundStatus::Launched,
        RoundStatus::LaunchFailed,
        RoundStatus::WrappedUp,
        RoundStatus::Cancelled,
    ];

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Scheduled => "SCHEDULED",
            RoundStatus::PreFlightPassed => "PRE_FLIGHT_PASSED",
            RoundStatus::PreFlightFailed => "PRE_FLIGHT_FAILED",
            RoundStatus::Launching => "LAUNCHING",
            RoundStatus::Launched => "LAUNCHED",
            RoundStatus::LaunchFailed => "LAUNCH_FAILED",
            RoundStatus::WrappedUp => "WRAPPED_UP",
            RoundStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse a wire name back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Statuses from which a round may still be cancelled or rescheduled.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            RoundStatus::Scheduled | RoundStatus::PreFlightPassed | RoundStatus::PreFlightFailed
        )
    }

    /// True once the provider has accepted the send.
    pub fn is_launched(self) -> bool {
        matches!(self, RoundStatus::Launched | RoundStatus::WrappedUp)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `LAUNCHED` and `WRAPPED_UP` only move forward; `CANCELLED` is final.
    pub fn can_transition_to(self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        match self {
            Scheduled | PreFlightPassed | PreFlightFailed => matches!(
                next,
                Scheduled | PreFlightPassed | PreFlightFailed | Launching | Cancelled
            ),
            Launching => matches!(next, Launched | LaunchFailed),
            LaunchFailed => matches!(next, Launching),
            Launched => matches!(next, WrappedUp),
            WrappedUp | Cancelled => false,
        }
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage notifications tracked on the round to avoid duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Heads-up a day before launch.
    PreNotify,
    /// Checklist passed.
    PreFlightPassed,
    /// Checklist failed.
    PreFlightFailed,
    /// Shortly before launch.
    Countdown,
    /// Provider accepted the send.
    Launched,
    /// Provider rejected the send.
    LaunchFailed,
    /// Assessment attached.
    WrappedUp,
    /// Round cancelled.
    Cancelled,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationKind::PreNotify => "pre_notify",
            NotificationKind::PreFlightPassed => "pre_flight_passed",
            NotificationKind::PreFlightFailed => "pre_flight_failed",
            NotificationKind::Countdown => "countdown",
            NotificationKind::Launched => "launched",
            NotificationKind::LaunchFailed => "launch_failed",
            NotificationKind::WrappedUp => "wrapped_up",
            NotificationKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Delivery record for one notification kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// At least one channel accepted it.
    pub sent: bool,
    /// When it was accepted.
    pub sent_at: Option<DateTime<Utc>>,
}

/// One entry of a round's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// Status before the step.
    pub from: RoundStatus,
    /// Status after the step.
    pub to: RoundStatus,
    /// When the step happened.
    pub at: DateTime<Utc>,
    /// Free-text reason, e.g. a failure summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Marker left on a round launched with `skip_pre_flight`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOverride {
    /// When the override was used.
    pub at: DateTime<Utc>,
    /// Status the round was in when the override was used.
    pub prior_status: RoundStatus,
}

/// One scheduled round of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSchedule {
    /// Unique id of this round.
    pub schedule_id: Uuid,
    /// Campaign the round belongs to.
    pub campaign_name: String,
    /// 1-based position within the campaign.
    pub round_number: u32,

    /// External audience identifier at the email provider.
    pub target_list_ref: String,
    /// Start of this round's slice within the campaign audience.
    pub recipient_offset: u64,
    /// Number of recipients in this round's slice.
    pub recipient_count: u64,
    /// Declared audience size of the whole campaign.
    pub total_recipients: u64,
    /// Email subject line.
    pub subject: String,
    /// Sender display name.
    pub sender_name: String,
    /// Sender address checked during pre-flight.
    pub sender_email: String,
    /// Provider draft or template, if any.
    #[serde(default)]
    pub draft_ref: Option<String>,

    /// Local launch date.
    pub scheduled_date: NaiveDate,
    /// Local launch time.
    pub scheduled_time: NaiveTime,
    /// Offset of the local launch time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Current lifecycle status.
    pub status: RoundStatus,
    /// Stage notifications already delivered.
    #[serde(default)]
    pub notification_status: BTreeMap<NotificationKind, NotificationRecord>,
    /// Latest pre-flight or launch failure.
    #[serde(default)]
    pub last_error: Option<String>,

    /// Latest pre-flight report.
    #[serde(default)]
    pub pre_flight: Option<PreFlightReport>,
    /// Provider campaign id, set on launch.
    #[serde(default)]
    pub provider_ref: Option<String>,
    /// When the provider accepted the send.
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
    /// Set when launched with `skip_pre_flight`.
    #[serde(default)]
    pub launch_override: Option<LaunchOverride>,
    /// Stored wrap-up result.
    #[serde(default)]
    pub wrap_up: Option<WrapUpReport>,
    /// Latest wrap-up failure; the round stays `LAUNCHED`.
    #[serde(default)]
    pub wrap_up_error: Option<String>,
    /// Operator-supplied reason for cancelling.
    #[serde(default)]
    pub cancel_reason: Option<String>,
    /// Every status change, oldest first.
    #[serde(default)]
    pub history: Vec<StatusTransition>,

    /// When the round was created.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl RoundSchedule {
    /// Build a fresh `SCHEDULED` round.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaign_name: impl Into<String>,
        round_number: u32,
        target_list_ref: impl Into<String>,
        recipients: Range<u64>,
        total_recipients: u64,
        subject: impl Into<String>,
        sender_name: impl Into<String>,
        sender_email: impl Into<String>,
        scheduled_date: NaiveDate,
        scheduled_time: NaiveTime,
        utc_offset_minutes: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            schedule_id: Uuid::new_v4(),
            campaign_name: campaign_name.into(),
            round_number,
            target_list_ref: target_list_ref.into(),
            recipient_offset: recipients.start,
            recipient_count: recipients.end - recipients.start,
            total_recipients,
            subject: subject.into(),
            sender_name: sender_name.into(),
            sender_email: sender_email.into(),
            draft_ref: None,
            scheduled_date,
            scheduled_time,
            utc_offset_minutes,
            status: RoundStatus::Scheduled,
            notification_status: BTreeMap::new(),
            last_error: None,
            pre_flight: None,
            provider_ref: None,
            launched_at: None,
            launch_override: None,
            wrap_up: None,
            wrap_up_error: None,
            cancel_reason: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The absolute instant this round launches at.
    pub fn launch_instant(&self) -> CadenceResult<DateTime<Utc>> {
        resolve_instant(
            self.scheduled_date,
            self.scheduled_time,
            self.utc_offset_minutes,
        )
    }

    /// Half-open slice of the campaign audience this round targets.
    pub fn recipient_range(&self) -> Range<u64> {
        self.recipient_offset..self.recipient_offset + self.recipient_count
    }

    /// Move to `to`, recording the step in `history`.
    ///
    /// Staying in the same status is allowed only where the state machine
    /// permits it (e.g. re-running pre-flight).
    pub fn transition(&mut self, to: RoundStatus, note: Option<String>) -> CadenceResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(CadenceError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        self.history.push(StatusTransition {
            from: self.status,
            to,
            at: now,
            note,
        });
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Whether a notification of this kind already went out.
    pub fn notification_sent(&self, kind: NotificationKind) -> bool {
        self.notification_status
            .get(&kind)
            .is_some_and(|r| r.sent)
    }

    /// Record a delivered notification of `kind`.
    pub fn mark_notified(&mut self, kind: NotificationKind, at: DateTime<Utc>) {
        self.notification_status.insert(
            kind,
            NotificationRecord {
                sent: true,
                sent_at: Some(at),
            },
        );
        self.updated_at = Utc::now();
    }

    /// Label passed to the assessor to describe this round's audience.
    pub fn segment_label(&self) -> String {
        format!(
            "{}, round {} of {} ({})",
            self.campaign_name, self.round_number, ROUND_COUNT, self.target_list_ref
        )
    }
}

/// Resolve a calendar date and wall-clock time at a fixed UTC offset.
pub fn resolve_instant(
    date: NaiveDate,
    time: NaiveTime,
    utc_offset_minutes: i32,
) -> CadenceResult<DateTime<Utc>> {
    if utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
        return Err(CadenceError::Validation(format!(
            "utc_offset_minutes {utc_offset_minutes} is outside ±{MAX_OFFSET_MINUTES}"
        )));
    }
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
        CadenceError::Validation(format!("invalid utc offset: {utc_offset_minutes}"))
    })?;
    date.and_time(time)
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CadenceError::Validation(format!("ambiguous local time {date} {time}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round() -> RoundSchedule {
        RoundSchedule::new(
            "Spring Launch",
            1,
            "list-a",
            0..1000,
            3000,
            "Hello",
            "Team",
            "team@example.com",
            NaiveDate::from_ymd_opt(2030, 3, 1).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            60,
        )
    }

    #[test]
    fn test_new_round_is_scheduled() {
        let r = round();
        assert_eq!(r.status, RoundStatus::Scheduled);
        assert_eq!(r.recipient_count, 1000);
        assert_eq!(r.recipient_range(), 0..1000);
        assert!(r.history.is_empty());
    }

    #[test]
    fn test_launch_instant_applies_offset() {
        let r = round();
        let expected = Utc.with_ymd_and_hms(2030, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(r.launch_instant().unwrap(), expected);
    }

    #[test]
    fn test_resolve_instant_rejects_wild_offset() {
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let time = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert!(matches!(
            resolve_instant(date, time, 15 * 60),
            Err(CadenceError::Validation(_))
        ));
    }

    #[test]
    fn test_launched_never_moves_backward() {
        for to in RoundStatus::ALL {
            let allowed = RoundStatus::Launched.can_transition_to(to);
            assert_eq!(allowed, to == RoundStatus::WrappedUp, "LAUNCHED -> {to}");
        }
    }

    #[test]
    fn test_cancel_only_from_pre_launch_states() {
        for from in RoundStatus::ALL {
            assert_eq!(
                from.can_transition_to(RoundStatus::Cancelled),
                from.is_cancellable(),
                "{from} -> CANCELLED"
            );
        }
    }

    #[test]
    fn test_transition_records_history() {
        let mut r = round();
        r.transition(RoundStatus::PreFlightPassed, None).unwrap();
        r.transition(RoundStatus::Launching, Some("go".into())).unwrap();
        assert_eq!(r.history.len(), 2);
        assert_eq!(r.history[1].from, RoundStatus::PreFlightPassed);
        assert_eq!(r.history[1].note.as_deref(), Some("go"));
    }

    #[test]
    fn test_invalid_transition_leaves_round_untouched() {
        let mut r = round();
        let err = r.transition(RoundStatus::WrappedUp, None).unwrap_err();
        assert!(matches!(
            err,
            CadenceError::InvalidTransition {
                from: RoundStatus::Scheduled,
                to: RoundStatus::WrappedUp
            }
        ));
        assert_eq!(r.status, RoundStatus::Scheduled);
        assert!(r.history.is_empty());
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&RoundStatus::PreFlightFailed).unwrap();
        assert_eq!(json, "\"PRE_FLIGHT_FAILED\"");
        for s in RoundStatus::ALL {
            assert_eq!(RoundStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_notification_tracking() {
        let mut r = round();
        assert!(!r.notification_sent(NotificationKind::PreNotify));
        r.mark_notified(NotificationKind::PreNotify, Utc::now());
        assert!(r.notification_sent(NotificationKind::PreNotify));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["notification_status"]["pre_notify"]["sent"], true);
    }
}
