//! Wiring of stores, collaborators, and orchestration components.

use crate::config::CadenceConfig;
use cadence_channels::{ChannelManager, LogChannel, SlackChannel};
use cadence_gateway::AppState;
use cadence_orchestrator::{
    JobRunner, LifecycleScheduler, Orchestrator, RoundPlanner, StatusAggregator,
};
use cadence_provider::{AssessorConfig, HttpEmailProvider, LlmAssessor, ProviderConfig};
use cadence_security::AuditLog;
use cadence_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a `serve` or `worker` process needs.
pub struct Engine {
    pub store: Arc<SqliteStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub planner: Arc<RoundPlanner>,
    pub status: Arc<StatusAggregator>,
}

impl Engine {
    pub async fn build(config: &CadenceConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let db = config.database_path();
        let store = Arc::new(SqliteStore::open(&db)?);
        info!(path = %db.display(), "Store opened");

        let audit = Arc::new(AuditLog::new(config.data_dir.join("audit")));
        let scheduler = Arc::new(LifecycleScheduler::new(store.clone(), config.scheduler.clone()));

        if config.provider.api_key.is_empty() {
            warn!("No email provider API key configured");
        }
        let provider = Arc::new(HttpEmailProvider::new(ProviderConfig {
            base_url: config.provider.base_url.clone(),
            api_key: config.provider.api_key.clone(),
            timeout: Duration::from_secs(config.orchestrator.provider_timeout_secs),
        })?);
        let assessor = Arc::new(LlmAssessor::new(AssessorConfig {
            api_base_url: config.assessor.api_base_url.clone(),
            api_key: config.assessor.api_key.clone(),
            model_id: config.assessor.model_id.clone(),
            max_tokens: config.assessor.max_tokens,
            timeout: Duration::from_secs(config.orchestrator.assessment_timeout_secs),
        })?);

        let mut channels = ChannelManager::new();
        if config.channels.log {
            channels.add_channel(Arc::new(LogChannel::new()));
        }
        if let Some(url) = &config.channels.slack_webhook_url {
            channels.add_channel(Arc::new(SlackChannel::new(
                url.clone(),
                Duration::from_secs(config.channels.timeout_secs),
            )?));
        }
        info!(channels = ?channels.channel_names(), "Notification channels ready");

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            scheduler.clone(),
            provider,
            assessor,
            Arc::new(channels),
            audit,
            config.orchestrator.clone(),
        ));
        let planner = Arc::new(RoundPlanner::new(
            store.clone(),
            scheduler.clone(),
            config.partition.clone(),
        ));
        let status = Arc::new(StatusAggregator::new(store.clone(), scheduler));

        Ok(Self {
            store,
            orchestrator,
            planner,
            status,
        })
    }

    pub fn runner(&self, config: &CadenceConfig) -> Arc<JobRunner> {
        Arc::new(JobRunner::new(
            self.store.clone(),
            self.orchestrator.clone(),
            config.runner.clone(),
        ))
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            planner: self.planner.clone(),
            orchestrator: self.orchestrator.clone(),
            status: self.status.clone(),
        })
    }
}
