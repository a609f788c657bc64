#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cadence_channels::{Channel, ChannelManager, Notification};
use cadence_core::*;
use cadence_orchestrator::*;
use cadence_provider::{Assessor, EmailProvider, SendReceipt, SendRequest};
use cadence_security::AuditLog;
use cadence_store::{JobStore, MemoryJobStore, MemoryRoundStore, RoundStore};
use chrono::{Duration, NaiveTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Fake email provider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeProvider {
    pub audiences: Mutex<HashMap<String, u64>>,
    pub drafts: Mutex<HashSet<String>>,
    pub verified: Mutex<HashSet<String>>,
    pub stats: Mutex<HashMap<String, CampaignStats>>,
    pub unavailable_stats: Mutex<HashSet<String>>,
    pub sends: Mutex<Vec<SendRequest>>,
    pub send_count: AtomicUsize,
    pub fail_send: AtomicBool,
    pub send_delay_ms: AtomicUsize,
}

impl FakeProvider {
    pub fn set_audience(&self, list: &str, size: u64) {
        self.audiences.lock().insert(list.to_string(), size);
    }
}

#[async_trait]
impl EmailProvider for FakeProvider {
    async fn audience_size(&self, list_ref: &str) -> CadenceResult<u64> {
        self.audiences
            .lock()
            .get(list_ref)
            .copied()
            .ok_or_else(|| CadenceError::Provider(format!("unknown list {list_ref}")))
    }

    async fn draft_exists(&self, draft_ref: &str) -> CadenceResult<bool> {
        Ok(self.drafts.lock().contains(draft_ref))
    }

    async fn sender_verified(&self, sender_email: &str) -> CadenceResult<bool> {
        Ok(self.verified.lock().contains(sender_email))
    }

    async fn send(&self, request: SendRequest) -> CadenceResult<SendReceipt> {
        let delay = self.send_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let n = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(CadenceError::Provider("sender domain suspended".into()));
        }
        let provider_ref = format!("cmp-{}-{n}", request.round_number);
        self.stats.lock().insert(
            provider_ref.clone(),
            CampaignStats {
                recipients: request.recipient_count,
                delivered: request.recipient_count,
                unique_opens: request.recipient_count / (2 + u64::from(request.round_number)),
                unique_clicks: request.recipient_count / 20,
                ..CampaignStats::default()
            },
        );
        self.sends.lock().push(request);
        Ok(SendReceipt { provider_ref })
    }

    async fn campaign_stats(&self, provider_ref: &str) -> CadenceResult<CampaignStats> {
        if self.unavailable_stats.lock().contains(provider_ref) {
            return Err(CadenceError::Provider("statistics endpoint unavailable".into()));
        }
        self.stats
            .lock()
            .get(provider_ref)
            .cloned()
            .ok_or_else(|| CadenceError::Provider(format!("unknown campaign {provider_ref}")))
    }
}

// ---------------------------------------------------------------------------
// Fake assessor
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeAssessor {
    pub inputs: Mutex<Vec<AssessmentInput>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Assessor for FakeAssessor {
    async fn assess(&self, input: &AssessmentInput) -> CadenceResult<Assessment> {
        self.inputs.lock().push(input.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CadenceError::Assessment("model overloaded".into()));
        }
        let trend = match &input.previous_stats {
            None => Trend::Unknown,
            Some(prev) if input.current_stats.open_rate() < prev.open_rate() => Trend::Declining,
            Some(_) => Trend::Improving,
        };
        Ok(Assessment {
            quality_score: 70,
            health_status: HealthStatus::Healthy,
            trend,
            executive_summary: "Delivery healthy".into(),
            insights: vec![],
            recommendations: vec![],
            predictions: Predictions::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Recording channel
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingChannel {
    pub received: Mutex<Vec<Notification>>,
    pub fail: AtomicBool,
    pub delay_ms: AtomicUsize,
}

impl RecordingChannel {
    pub fn kinds_for(&self, schedule_id: uuid::Uuid) -> Vec<NotificationKind> {
        self.received
            .lock()
            .iter()
            .filter(|n| n.schedule_id == schedule_id)
            .map(|n| n.kind)
            .collect()
    }
}

pub struct SharedChannel(pub Arc<RecordingChannel>);

#[async_trait]
impl Channel for SharedChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: Notification) -> CadenceResult<()> {
        let delay = self.0.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(CadenceError::Channel("webhook down".into()));
        }
        self.0.received.lock().push(notification);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub rounds: Arc<dyn RoundStore>,
    pub jobs: Arc<dyn JobStore>,
    pub scheduler: Arc<LifecycleScheduler>,
    pub planner: RoundPlanner,
    pub orchestrator: Arc<Orchestrator>,
    pub status: StatusAggregator,
    pub provider: Arc<FakeProvider>,
    pub assessor: Arc<FakeAssessor>,
    pub channel: Arc<RecordingChannel>,
    pub audit: Arc<AuditLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(
            Arc::new(MemoryRoundStore::new()),
            Arc::new(MemoryJobStore::new()),
            SchedulerConfig::default(),
        )
    }

    pub fn with_stores(
        rounds: Arc<dyn RoundStore>,
        jobs: Arc<dyn JobStore>,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        let provider = Arc::new(FakeProvider::default());
        for (list, size) in [("list-a", 1000), ("list-b", 1000), ("list-c", 1000)] {
            provider.set_audience(list, size);
        }
        provider.verified.lock().insert("news@acme.test".into());
        provider.drafts.lock().insert("draft-spring".into());

        let assessor = Arc::new(FakeAssessor::default());
        let channel = Arc::new(RecordingChannel::default());
        let mut channels = ChannelManager::new();
        channels.add_channel(Arc::new(SharedChannel(channel.clone())));
        let audit = Arc::new(AuditLog::in_memory());

        let scheduler = Arc::new(LifecycleScheduler::new(jobs.clone(), scheduler_config));
        let planner =
            RoundPlanner::new(rounds.clone(), scheduler.clone(), PartitionPolicy::EqualSplit);
        let orchestrator = Arc::new(Orchestrator::new(
            rounds.clone(),
            scheduler.clone(),
            provider.clone(),
            assessor.clone(),
            Arc::new(channels),
            audit.clone(),
            OrchestratorConfig {
                provider_timeout_secs: 2,
                assessment_timeout_secs: 2,
                audience_tolerance_pct: 2.0,
            },
        ));
        let status = StatusAggregator::new(rounds.clone(), scheduler.clone());

        Self {
            rounds,
            jobs,
            scheduler,
            planner,
            orchestrator,
            status,
            provider,
            assessor,
            channel,
            audit,
        }
    }

    /// "Spring Launch": 3000 recipients over list-a/b/c, a week from now.
    pub fn spring_request(&self) -> CreateCampaignRequest {
        CreateCampaignRequest {
            campaign_name: "Spring Launch".into(),
            audience_refs: vec!["list-a".into(), "list-b".into(), "list-c".into()],
            subject: "Spring is here".into(),
            sender_name: "Acme".into(),
            sender_email: "news@acme.test".into(),
            total_recipients: 3000,
            start_date: (Utc::now() + Duration::days(7)).date_naive(),
            send_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            utc_offset_minutes: 0,
            round_interval_days: 1,
            draft_ref: Some("draft-spring".into()),
        }
    }

    pub async fn spring(&self) -> Vec<RoundSchedule> {
        let result = self
            .planner
            .create_campaign(self.spring_request())
            .await
            .unwrap();
        assert!(result.unscheduled.is_empty());
        result.schedules
    }

    pub async fn round(&self, schedule_id: uuid::Uuid) -> RoundSchedule {
        self.rounds.get(schedule_id).await.unwrap().unwrap()
    }

    /// Pre-flight then launch, asserting both succeed.
    pub async fn launch(&self, schedule_id: uuid::Uuid) -> LaunchOutcome {
        let report = self.orchestrator.run_pre_flight(schedule_id).await.unwrap();
        assert!(report.passed, "{:?}", report.failure_summary());
        self.orchestrator
            .launch_campaign(schedule_id, false)
            .await
            .unwrap()
    }
}
