use crate::config::OrchestratorConfig;
use crate::locks::{ClaimSet, ScheduleLocks};
use crate::runner::JobHandler;
use crate::scheduler::LifecycleScheduler;
use async_trait::async_trait;
use cadence_channels::{ChannelManager, Notification};
use cadence_core::{
    AssessmentInput, CadenceError, CadenceResult, CampaignStats, CheckKind, Comparison,
    LaunchOutcome, LaunchOverride, LifecycleJob, NotificationKind, PreFlightCheck,
    PreFlightReport, RoundSchedule, RoundStatus, Stage, StatsDeltas, WrapUpReport,
};
use cadence_provider::{Assessor, EmailProvider, SendRequest};
use cadence_security::{AuditLog, AuditOutcome};
use cadence_store::RoundStore;
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// New launch date and time for a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    /// Local calendar date of the new launch.
    pub scheduled_date: NaiveDate,
    /// Local wall-clock time of the new launch.
    pub scheduled_time: NaiveTime,
    /// Keeps the round's current offset when absent.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// A rescheduled round and its fresh job set.
#[derive(Debug, Clone, Serialize)]
pub struct RescheduleResult {
    /// The round as persisted, back in `SCHEDULED`.
    pub round: RoundSchedule,
    /// Replacement jobs for every stage.
    pub jobs: Vec<LifecycleJob>,
}

/// The per-round state machine.
///
/// The only component that changes `RoundSchedule.status`. Mutations of one
/// round are serialized by an in-process lock per `schedule_id` plus a
/// status-guarded store write, and no lock is held across a provider,
/// assessor, or channel call.
pub struct Orchestrator {
    rounds: Arc<dyn RoundStore>,
    scheduler: Arc<LifecycleScheduler>,
    provider: Arc<dyn EmailProvider>,
    assessor: Arc<dyn Assessor>,
    channels: Arc<ChannelManager>,
    audit: Arc<AuditLog>,
    config: OrchestratorConfig,
    locks: ScheduleLocks,
    notifying: ClaimSet<(Uuid, NotificationKind)>,
}

/// Run `fut` with a deadline, folding a timeout into a provider error.
async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = CadenceResult<T>>,
) -> CadenceResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CadenceError::Provider(format!(
            "{what} timed out after {}s",
            limit.as_secs()
        ))),
    }
}

impl Orchestrator {
    /// Wire the state machine to its stores and collaborators.
    pub fn new(
        rounds: Arc<dyn RoundStore>,
        scheduler: Arc<LifecycleScheduler>,
        provider: Arc<dyn EmailProvider>,
        assessor: Arc<dyn Assessor>,
        channels: Arc<ChannelManager>,
        audit: Arc<AuditLog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            rounds,
            scheduler,
            provider,
            assessor,
            channels,
            audit,
            config,
            locks: ScheduleLocks::default(),
            notifying: ClaimSet::new(),
        }
    }

    /// Job scheduler used for cancel and reschedule.
    pub fn scheduler(&self) -> &Arc<LifecycleScheduler> {
        &self.scheduler
    }

    /// Round store every status change is written to.
    pub fn rounds(&self) -> &Arc<dyn RoundStore> {
        &self.rounds
    }

    fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.config.provider_timeout_secs)
    }

    /// Load a round or fail with `NotFound`.
    pub async fn load(&self, schedule_id: Uuid) -> CadenceResult<RoundSchedule> {
        self.rounds
            .get(schedule_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("schedule {schedule_id}")))
    }

    /// Write `round` if the stored status is still `expected`.
    async fn persist(&self, round: &RoundSchedule, expected: RoundStatus) -> CadenceResult<()> {
        if self.rounds.update_if_status(round, expected).await? {
            Ok(())
        } else {
            Err(CadenceError::Conflict(format!(
                "schedule {} changed concurrently (expected {expected})",
                round.schedule_id
            )))
        }
    }

    // --- Pre-flight ---

    /// Run the readiness checklist for a round.
    ///
    /// A failed checklist is a report, not an error. Rounds past pre-flight
    /// get a skipped report describing their current status.
    pub async fn run_pre_flight(&self, schedule_id: Uuid) -> CadenceResult<PreFlightReport> {
        let snapshot = self.load(schedule_id).await?;
        if let Some(reason) = pre_flight_skip_reason(snapshot.status) {
            debug!(schedule_id = %schedule_id, status = %snapshot.status, "Pre-flight skipped");
            return Ok(PreFlightReport::skipped(schedule_id, snapshot.status, reason));
        }

        let checks = self.run_checks(&snapshot).await;

        let report = {
            let _guard = self.locks.acquire(schedule_id).await;
            let mut round = self.load(schedule_id).await?;
            if let Some(reason) = pre_flight_skip_reason(round.status) {
                return Ok(PreFlightReport::skipped(schedule_id, round.status, reason));
            }
            let prior = round.status;
            let mut checks = checks;
            // The failure check reflects the status at write time.
            if let Some(c) = checks
                .iter_mut()
                .find(|c| c.check == CheckKind::NoUnresolvedFailure)
            {
                *c = failure_check(prior);
            }
            let passed = checks.iter().all(|c| c.passed);
            let next = match prior {
                RoundStatus::LaunchFailed => RoundStatus::LaunchFailed,
                _ if passed => RoundStatus::PreFlightPassed,
                _ => RoundStatus::PreFlightFailed,
            };
            let report = PreFlightReport::from_checks(schedule_id, checks, next);
            if next != prior {
                round.transition(next, report.failure_summary())?;
            }
            // A failed launch keeps its own detail in `last_error`.
            if prior != RoundStatus::LaunchFailed {
                round.last_error = report.failure_summary();
            }
            round.pre_flight = Some(report.clone());
            round.updated_at = Utc::now();
            self.persist(&round, prior).await?;
            report
        };

        info!(
            schedule_id = %schedule_id,
            passed = report.passed,
            status = %report.status,
            "Pre-flight complete"
        );
        let (kind, detail) = if report.passed {
            (NotificationKind::PreFlightPassed, "pre-flight passed".to_string())
        } else {
            (
                NotificationKind::PreFlightFailed,
                format!(
                    "pre-flight failed: {}",
                    report.failure_summary().unwrap_or_default()
                ),
            )
        };
        self.notify_quietly(schedule_id, kind, &detail).await;
        Ok(report)
    }

    async fn run_checks(&self, round: &RoundSchedule) -> Vec<PreFlightCheck> {
        let limit = self.provider_timeout();

        let audience = bounded(
            limit,
            "audience lookup",
            self.provider.audience_size(&round.target_list_ref),
        )
        .await;
        let audience = match audience {
            Ok(actual) => audience_check(
                actual,
                round.recipient_count,
                self.config.audience_tolerance_pct,
            ),
            Err(e) => PreFlightCheck::fail(CheckKind::AudienceSize, e.to_string()),
        };

        let draft = match &round.draft_ref {
            None => PreFlightCheck::pass(CheckKind::DraftExists, "no draft referenced"),
            Some(draft_ref) => {
                let found =
                    bounded(limit, "draft lookup", self.provider.draft_exists(draft_ref)).await;
                match found {
                    Ok(true) => PreFlightCheck::pass(
                        CheckKind::DraftExists,
                        format!("draft {draft_ref} found"),
                    ),
                    Ok(false) => PreFlightCheck::fail(
                        CheckKind::DraftExists,
                        format!("draft {draft_ref} not found"),
                    ),
                    Err(e) => PreFlightCheck::fail(CheckKind::DraftExists, e.to_string()),
                }
            }
        };

        let sender_email = &round.sender_email;
        let verified = bounded(
            limit,
            "sender lookup",
            self.provider.sender_verified(sender_email),
        )
        .await;
        let sender = match verified {
            Ok(true) => PreFlightCheck::pass(
                CheckKind::SenderVerified,
                format!("{sender_email} is verified"),
            ),
            Ok(false) => PreFlightCheck::fail(
                CheckKind::SenderVerified,
                format!("{sender_email} is not verified"),
            ),
            Err(e) => PreFlightCheck::fail(CheckKind::SenderVerified, e.to_string()),
        };

        vec![audience, draft, sender, failure_check(round.status)]
    }

    // --- Launch ---

    /// Send a round through the provider, at most once.
    ///
    /// Without `skip_pre_flight` the round must be `PRE_FLIGHT_PASSED`. A
    /// launched round reports its existing result and sends nothing.
    pub async fn launch_campaign(
        &self,
        schedule_id: Uuid,
        skip_pre_flight: bool,
    ) -> CadenceResult<LaunchOutcome> {
        let (round, override_used) = {
            let _guard = self.locks.acquire(schedule_id).await;
            let mut round = self.load(schedule_id).await?;
            let prior = round.status;
            match prior {
                RoundStatus::Launched | RoundStatus::WrappedUp => {
                    return Ok(already_launched(&round));
                }
                RoundStatus::Launching => return Ok(LaunchOutcome::InProgress),
                RoundStatus::Cancelled => {
                    return Err(CadenceError::InvalidTransition {
                        from: prior,
                        to: RoundStatus::Launching,
                    })
                }
                RoundStatus::PreFlightPassed => {}
                RoundStatus::LaunchFailed if !skip_pre_flight => {
                    return Err(CadenceError::Gating(format!(
                        "previous launch failed ({}); relaunch requires skip_pre_flight",
                        round.last_error.as_deref().unwrap_or("no detail")
                    )));
                }
                _ if !skip_pre_flight => {
                    return Err(CadenceError::Gating(format!(
                        "pre-flight has not passed (status {prior})"
                    )));
                }
                _ => {}
            }

            // Any launch requested with the override is recorded as one.
            let override_used = skip_pre_flight;
            let note = if override_used {
                round.launch_override = Some(LaunchOverride {
                    at: Utc::now(),
                    prior_status: prior,
                });
                Some(format!("launch override from {prior}"))
            } else {
                None
            };
            round.transition(RoundStatus::Launching, note)?;
            if !self.rounds.update_if_status(&round, prior).await? {
                // Another process moved the round first.
                let current = self.load(schedule_id).await?;
                return match current.status {
                    RoundStatus::Launching => Ok(LaunchOutcome::InProgress),
                    s if s.is_launched() => Ok(already_launched(&current)),
                    s => Err(CadenceError::Conflict(format!(
                        "schedule {schedule_id} moved to {s} during launch"
                    ))),
                };
            }
            if override_used {
                self.audit.log_action(
                    schedule_id,
                    &round.campaign_name,
                    "launch_override",
                    serde_json::json!({ "prior_status": prior }),
                    AuditOutcome::Success,
                );
                warn!(
                    schedule_id = %schedule_id,
                    prior = %prior,
                    "Launching with pre-flight override"
                );
            }
            (round, override_used)
        };

        info!(
            schedule_id = %schedule_id,
            campaign = %round.campaign_name,
            round = round.round_number,
            recipients = round.recipient_count,
            "Launching round"
        );
        let sent = bounded(
            self.provider_timeout(),
            "send",
            self.provider.send(SendRequest::from(&round)),
        )
        .await;

        let _guard = self.locks.acquire(schedule_id).await;
        let mut round = self.load(schedule_id).await?;
        if round.status != RoundStatus::Launching {
            error!(
                schedule_id = %schedule_id,
                status = %round.status,
                "Round left LAUNCHING during send"
            );
            return Err(CadenceError::Conflict(format!(
                "schedule {schedule_id} is {} after send",
                round.status
            )));
        }
        match sent {
            Ok(receipt) => {
                let launched_at = Utc::now();
                round.provider_ref = Some(receipt.provider_ref.clone());
                round.launched_at = Some(launched_at);
                round.last_error = None;
                round.transition(
                    RoundStatus::Launched,
                    Some(format!("provider ref {}", receipt.provider_ref)),
                )?;
                self.persist(&round, RoundStatus::Launching).await?;
                drop(_guard);

                self.audit.log_action(
                    schedule_id,
                    &round.campaign_name,
                    "launch",
                    serde_json::json!({
                        "provider_ref": receipt.provider_ref,
                        "override": override_used,
                    }),
                    AuditOutcome::Success,
                );
                info!(
                    schedule_id = %schedule_id,
                    provider_ref = %receipt.provider_ref,
                    "Round launched"
                );
                self.notify_quietly(
                    schedule_id,
                    NotificationKind::Launched,
                    &format!("launched to {} recipients", round.recipient_count),
                )
                .await;
                Ok(LaunchOutcome::Launched {
                    provider_ref: receipt.provider_ref,
                    launched_at,
                    override_used,
                })
            }
            Err(e) => {
                let detail = e.to_string();
                round.last_error = Some(detail.clone());
                round.transition(RoundStatus::LaunchFailed, Some(detail.clone()))?;
                self.persist(&round, RoundStatus::Launching).await?;
                drop(_guard);

                self.audit.log_action(
                    schedule_id,
                    &round.campaign_name,
                    "launch",
                    serde_json::json!({ "error": detail, "override": override_used }),
                    AuditOutcome::Error,
                );
                error!(schedule_id = %schedule_id, error = %detail, "Launch failed");
                self.notify_quietly(
                    schedule_id,
                    NotificationKind::LaunchFailed,
                    &format!("launch failed: {detail}"),
                )
                .await;
                Err(CadenceError::Launch(detail))
            }
        }
    }

    // --- Wrap-up ---

    /// Fetch statistics, compare with the previous round, and attach an
    /// assessment. Failures are recorded in `wrap_up_error` and never move
    /// the round out of `LAUNCHED`.
    pub async fn run_wrap_up(&self, schedule_id: Uuid) -> CadenceResult<WrapUpReport> {
        let round = self.load(schedule_id).await?;
        match round.status {
            RoundStatus::WrappedUp => return stored_wrap_up(&round),
            RoundStatus::Launched => {}
            other => {
                return Err(CadenceError::InvalidTransition {
                    from: other,
                    to: RoundStatus::WrappedUp,
                })
            }
        }

        let Some(provider_ref) = round.provider_ref.clone() else {
            let msg = "launched round has no provider reference".to_string();
            self.record_wrap_up_error(schedule_id, &msg).await;
            return Err(CadenceError::DataUnavailable(msg));
        };

        let stats = bounded(
            self.provider_timeout(),
            "statistics",
            self.provider.campaign_stats(&provider_ref),
        )
        .await;
        let current = match stats {
            Ok(stats) => stats,
            Err(e) => {
                let msg = format!("current statistics unavailable: {e}");
                self.record_wrap_up_error(schedule_id, &msg).await;
                return Err(CadenceError::DataUnavailable(msg));
            }
        };

        let comparison = self.compare_with_previous(&round, &current).await;
        let input = AssessmentInput {
            current_stats: current.clone(),
            previous_stats: comparison.previous_stats().cloned(),
            audience_segment_label: round.segment_label(),
        };
        let assessment = match tokio::time::timeout(
            Duration::from_secs(self.config.assessment_timeout_secs),
            self.assessor.assess(&input),
        )
        .await
        {
            Ok(Ok(a)) => a,
            Ok(Err(e)) => {
                let msg = e.to_string();
                self.record_wrap_up_error(schedule_id, &msg).await;
                return Err(CadenceError::Assessment(msg));
            }
            Err(_) => {
                let msg = format!(
                    "assessment timed out after {}s",
                    self.config.assessment_timeout_secs
                );
                self.record_wrap_up_error(schedule_id, &msg).await;
                return Err(CadenceError::Assessment(msg));
            }
        };

        let report = WrapUpReport {
            schedule_id,
            round_number: round.round_number,
            current,
            comparison,
            assessment,
            completed_at: Utc::now(),
        };

        {
            let _guard = self.locks.acquire(schedule_id).await;
            let mut round = self.load(schedule_id).await?;
            match round.status {
                RoundStatus::WrappedUp => return stored_wrap_up(&round),
                RoundStatus::Launched => {}
                other => {
                    return Err(CadenceError::InvalidTransition {
                        from: other,
                        to: RoundStatus::WrappedUp,
                    })
                }
            }
            round.wrap_up = Some(report.clone());
            round.wrap_up_error = None;
            round.transition(
                RoundStatus::WrappedUp,
                Some(format!("quality score {}", report.assessment.quality_score)),
            )?;
            self.persist(&round, RoundStatus::Launched).await?;
        }

        info!(
            schedule_id = %schedule_id,
            score = report.assessment.quality_score,
            comparison = report.comparison.is_available(),
            "Wrap-up complete"
        );
        self.notify_quietly(
            schedule_id,
            NotificationKind::WrappedUp,
            &format!(
                "wrap-up: score {}, {}",
                report.assessment.quality_score, report.assessment.executive_summary
            ),
        )
        .await;
        Ok(report)
    }

    async fn compare_with_previous(
        &self,
        round: &RoundSchedule,
        current: &CampaignStats,
    ) -> Comparison {
        if round.round_number <= 1 {
            return Comparison::Unavailable {
                reason: "first round has no predecessor".into(),
            };
        }
        let previous_number = round.round_number - 1;
        let previous = match self.rounds.list_by_campaign(&round.campaign_name).await {
            Ok(rounds) => rounds.into_iter().find(|r| r.round_number == previous_number),
            Err(e) => {
                return Comparison::Unavailable {
                    reason: format!("round {previous_number} could not be loaded: {e}"),
                }
            }
        };
        let Some(previous) = previous else {
            return Comparison::Unavailable {
                reason: format!("round {previous_number} does not exist"),
            };
        };
        let Some(provider_ref) = previous.provider_ref.as_deref() else {
            return Comparison::Unavailable {
                reason: format!(
                    "round {previous_number} was not launched (status {})",
                    previous.status
                ),
            };
        };
        let stats = bounded(
            self.provider_timeout(),
            "previous statistics",
            self.provider.campaign_stats(provider_ref),
        )
        .await;
        match stats {
            Ok(stats) => Comparison::Available {
                previous_round: previous_number,
                deltas: StatsDeltas::between(&stats, current),
                previous: stats,
            },
            Err(e) => Comparison::Unavailable {
                reason: format!("round {previous_number} statistics could not be retrieved: {e}"),
            },
        }
    }

    async fn record_wrap_up_error(&self, schedule_id: Uuid, msg: &str) {
        warn!(schedule_id = %schedule_id, error = %msg, "Wrap-up failed");
        let _guard = self.locks.acquire(schedule_id).await;
        let result = async {
            let mut round = self.load(schedule_id).await?;
            if round.status != RoundStatus::Launched {
                return Ok(());
            }
            round.wrap_up_error = Some(msg.to_string());
            round.updated_at = Utc::now();
            self.persist(&round, RoundStatus::Launched).await
        }
        .await;
        if let Err(e) = result {
            error!(schedule_id = %schedule_id, error = %e, "Failed to record wrap-up error");
        }
    }

    // --- Cancel & reschedule ---

    /// Cancel a round that has not started launching.
    ///
    /// Cancelling an already cancelled round is an invalid transition.
    pub async fn cancel_campaign(
        &self,
        schedule_id: Uuid,
        reason: &str,
    ) -> CadenceResult<RoundSchedule> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CadenceError::Validation("cancel reason must not be blank".into()));
        }

        let round = {
            let _guard = self.locks.acquire(schedule_id).await;
            let mut round = self.load(schedule_id).await?;
            if !round.status.is_cancellable() {
                self.audit.log_action(
                    schedule_id,
                    &round.campaign_name,
                    "cancel",
                    serde_json::json!({ "reason": reason, "status": round.status }),
                    AuditOutcome::Rejected,
                );
                return Err(CadenceError::InvalidTransition {
                    from: round.status,
                    to: RoundStatus::Cancelled,
                });
            }
            let prior = round.status;
            round.cancel_reason = Some(reason.to_string());
            round.transition(RoundStatus::Cancelled, Some(reason.to_string()))?;
            self.persist(&round, prior).await?;
            round
        };

        if let Err(e) = self.scheduler.cancel_lifecycle_jobs(schedule_id).await {
            // Jobs of a cancelled round are no-ops when they fire.
            warn!(schedule_id = %schedule_id, error = %e, "Failed to cancel pending jobs");
        }
        self.audit.log_action(
            schedule_id,
            &round.campaign_name,
            "cancel",
            serde_json::json!({ "reason": reason }),
            AuditOutcome::Success,
        );
        info!(schedule_id = %schedule_id, reason = %reason, "Round cancelled");
        self.notify_quietly(
            schedule_id,
            NotificationKind::Cancelled,
            &format!("cancelled: {reason}"),
        )
        .await;
        self.load(schedule_id).await
    }

    /// Move a not-yet-launched round to a new date and time.
    ///
    /// A passed or failed pre-flight is stale afterwards, so the round
    /// returns to `SCHEDULED`. Sent notifications stay recorded.
    pub async fn reschedule(
        &self,
        schedule_id: Uuid,
        request: RescheduleRequest,
    ) -> CadenceResult<RescheduleResult> {
        let _guard = self.locks.acquire(schedule_id).await;
        let mut round = self.load(schedule_id).await?;
        if !round.status.is_cancellable() {
            return Err(CadenceError::InvalidTransition {
                from: round.status,
                to: RoundStatus::Scheduled,
            });
        }
        let prior = round.status;
        let offset = request.utc_offset_minutes.unwrap_or(round.utc_offset_minutes);
        let launch =
            cadence_core::resolve_instant(request.scheduled_date, request.scheduled_time, offset)?;
        if launch <= Utc::now() {
            return Err(CadenceError::Validation(format!(
                "new launch time {launch} is not in the future"
            )));
        }
        if self.scheduler.has_running_job(schedule_id).await? {
            return Err(CadenceError::Conflict(format!(
                "schedule {schedule_id} has a lifecycle job running"
            )));
        }

        let previous_launch = round.launch_instant()?;
        round.scheduled_date = request.scheduled_date;
        round.scheduled_time = request.scheduled_time;
        round.utc_offset_minutes = offset;
        round.pre_flight = None;
        if prior == RoundStatus::PreFlightFailed {
            round.last_error = None;
        }
        round.transition(
            RoundStatus::Scheduled,
            Some(format!("rescheduled from {previous_launch} to {launch}")),
        )?;

        let jobs = match self.scheduler.reschedule_lifecycle_jobs(&round).await {
            Ok(jobs) => jobs,
            Err(e) => {
                // A runner may have claimed a job since the check above.
                let running = self
                    .scheduler
                    .has_running_job(schedule_id)
                    .await
                    .unwrap_or(false);
                return Err(if running {
                    CadenceError::Conflict(e.to_string())
                } else {
                    e
                });
            }
        };
        self.persist(&round, prior).await?;
        drop(_guard);

        self.audit.log_action(
            schedule_id,
            &round.campaign_name,
            "reschedule",
            serde_json::json!({ "from": previous_launch, "to": launch }),
            AuditOutcome::Success,
        );
        info!(schedule_id = %schedule_id, launch = %launch, "Round rescheduled");
        Ok(RescheduleResult { round, jobs })
    }

    // --- Notifications ---

    /// Send a stage notification through every channel, once per kind.
    ///
    /// Returns `true` when this call delivered it. The kind is claimed under
    /// the round lock before any channel is called, so concurrent callers
    /// cannot both send it, and is marked sent only when at least one
    /// channel accepted the notification.
    pub async fn notify_stage(
        &self,
        schedule_id: Uuid,
        kind: NotificationKind,
        detail: &str,
    ) -> CadenceResult<bool> {
        let (round, _claim) = {
            let _guard = self.locks.acquire(schedule_id).await;
            let round = self.load(schedule_id).await?;
            if round.notification_sent(kind) {
                debug!(schedule_id = %schedule_id, kind = %kind, "Notification already sent");
                return Ok(false);
            }
            let Some(claim) = self.notifying.try_claim((schedule_id, kind)) else {
                debug!(schedule_id = %schedule_id, kind = %kind, "Notification in flight");
                return Ok(false);
            };
            (round, claim)
        };

        let report = self
            .channels
            .broadcast(&Notification::for_round(&round, kind, detail))
            .await;
        if !report.any_delivered() {
            warn!(
                schedule_id = %schedule_id,
                kind = %kind,
                failed = report.failed.len(),
                "Notification not delivered on any channel"
            );
            return Ok(false);
        }

        let _guard = self.locks.acquire(schedule_id).await;
        let mut round = self.load(schedule_id).await?;
        let status = round.status;
        round.mark_notified(kind, Utc::now());
        self.persist(&round, status).await?;
        Ok(true)
    }

    async fn notify_quietly(&self, schedule_id: Uuid, kind: NotificationKind, detail: &str) {
        if let Err(e) = self.notify_stage(schedule_id, kind, detail).await {
            warn!(
                schedule_id = %schedule_id,
                kind = %kind,
                error = %e,
                "Notification bookkeeping failed"
            );
        }
    }
}

fn pre_flight_skip_reason(status: RoundStatus) -> Option<String> {
    match status {
        RoundStatus::Launching
        | RoundStatus::Launched
        | RoundStatus::WrappedUp
        | RoundStatus::Cancelled => Some(format!("round is {status}; pre-flight not applicable")),
        _ => None,
    }
}

fn failure_check(status: RoundStatus) -> PreFlightCheck {
    if status == RoundStatus::LaunchFailed {
        PreFlightCheck::fail(
            CheckKind::NoUnresolvedFailure,
            "previous launch failed and is unresolved",
        )
    } else {
        PreFlightCheck::pass(CheckKind::NoUnresolvedFailure, "no unresolved launch failure")
    }
}

fn audience_check(actual: u64, expected: u64, tolerance_pct: f64) -> PreFlightCheck {
    let deviation = if expected == 0 {
        if actual == 0 {
            0.0
        } else {
            100.0
        }
    } else {
        (actual as f64 - expected as f64).abs() / expected as f64 * 100.0
    };
    let detail = format!(
        "provider reports {actual} contacts, expected {expected} \
         ({deviation:.2}% off, tolerance {tolerance_pct}%)"
    );
    if deviation <= tolerance_pct {
        PreFlightCheck::pass(CheckKind::AudienceSize, detail)
    } else {
        PreFlightCheck::fail(CheckKind::AudienceSize, detail)
    }
}

fn already_launched(round: &RoundSchedule) -> LaunchOutcome {
    LaunchOutcome::AlreadyLaunched {
        provider_ref: round.provider_ref.clone(),
        launched_at: round.launched_at,
        status: round.status,
    }
}

fn stored_wrap_up(round: &RoundSchedule) -> CadenceResult<WrapUpReport> {
    round.wrap_up.clone().ok_or_else(|| {
        CadenceError::DataUnavailable(format!(
            "schedule {} is wrapped up but has no stored report",
            round.schedule_id
        ))
    })
}

#[async_trait]
impl JobHandler for Orchestrator {
    async fn handle(&self, job: &LifecycleJob) -> CadenceResult<()> {
        let round = self.load(job.schedule_id).await?;
        if round.status == RoundStatus::Cancelled {
            debug!(job = %job.key(), "Round cancelled; job is a no-op");
            return Ok(());
        }
        match job.stage {
            Stage::PreNotify => {
                let launch = round.launch_instant()?;
                self.notify_stage(
                    job.schedule_id,
                    NotificationKind::PreNotify,
                    &format!("launches at {launch} to {} recipients", round.recipient_count),
                )
                .await
                .map(drop)
            }
            Stage::PreFlight => self.run_pre_flight(job.schedule_id).await.map(drop),
            Stage::Countdown => {
                let minutes = self.scheduler.config().countdown_lead().num_minutes();
                self.notify_stage(
                    job.schedule_id,
                    NotificationKind::Countdown,
                    &format!("launching in {minutes} minutes"),
                )
                .await
                .map(drop)
            }
            Stage::Launch => self.launch_campaign(job.schedule_id, false).await.map(drop),
            Stage::WrapUp => self.run_wrap_up(job.schedule_id).await.map(drop),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_tolerance() {
        assert!(audience_check(1000, 1000, 2.0).passed);
        assert!(audience_check(980, 1000, 2.0).passed);
        assert!(audience_check(1020, 1000, 2.0).passed);
        let check = audience_check(950, 1000, 2.0);
        assert!(!check.passed);
        assert!(check.detail.contains("5.00% off"));
        assert!(!audience_check(5, 0, 2.0).passed);
    }

    #[test]
    fn test_skip_reason_only_past_pre_flight() {
        assert!(pre_flight_skip_reason(RoundStatus::Scheduled).is_none());
        assert!(pre_flight_skip_reason(RoundStatus::PreFlightFailed).is_none());
        assert!(pre_flight_skip_reason(RoundStatus::LaunchFailed).is_none());
        assert!(pre_flight_skip_reason(RoundStatus::Launched).is_some());
        assert!(pre_flight_skip_reason(RoundStatus::Cancelled).is_some());
    }

    #[test]
    fn test_failure_check_names_launch_failed() {
        assert!(failure_check(RoundStatus::Scheduled).passed);
        let c = failure_check(RoundStatus::LaunchFailed);
        assert!(!c.passed);
        assert_eq!(c.check, CheckKind::NoUnresolvedFailure);
    }
}
