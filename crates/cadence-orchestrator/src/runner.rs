use crate::config::RunnerConfig;
use async_trait::async_trait;
use cadence_core::{CadenceResult, LifecycleJob};
use cadence_store::{JobOutcome, JobStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound for `stale_after_secs` (one year).
const MAX_STALE_SECS: u64 = 365 * 24 * 3600;

/// Executes one claimed lifecycle job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one claimed job; an error marks the job failed.
    async fn handle(&self, job: &LifecycleJob) -> CadenceResult<()>;
}

/// Durable delayed-task executor over a [`JobStore`].
///
/// Each tick requeues stale claims, claims due jobs, and runs them on a
/// bounded pool. Delivery is at-least-once: a job whose runner died is
/// redelivered after `stale_after_secs`.
pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: RunnerConfig,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    /// Runner dispatching jobs from `jobs` to `handler`.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        config: RunnerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            jobs,
            handler,
            config,
            permits,
        }
    }

    /// Claim and dispatch due jobs once, returning the spawned tasks.
    ///
    /// Never claims more jobs than there are free execution slots, so a
    /// claimed job is always executing.
    pub async fn dispatch_due(&self) -> CadenceResult<Vec<JoinHandle<()>>> {
        let now = Utc::now();
        let stale_secs = self.config.stale_after_secs.min(MAX_STALE_SECS) as i64;
        let requeued = self
            .jobs
            .requeue_stale(now - chrono::Duration::seconds(stale_secs))
            .await?;
        if requeued > 0 {
            warn!(requeued, "Requeued stale lifecycle jobs");
        }

        let free = self.permits.available_permits().min(self.config.batch_size);
        if free == 0 {
            return Ok(Vec::new());
        }
        let claimed = self.jobs.claim_due(now, free).await?;
        let mut handles = Vec::with_capacity(claimed.len());
        for job in claimed {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let jobs = self.jobs.clone();
            let handler = self.handler.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                execute(jobs, handler, job).await;
            }));
        }
        Ok(handles)
    }

    /// One tick that waits for every dispatched job. Returns how many ran.
    pub async fn run_once(&self) -> CadenceResult<usize> {
        let handles = self.dispatch_due().await?;
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Lifecycle job task panicked");
            }
        }
        Ok(count)
    }

    /// Poll until `shutdown` flips to `true`, then wait for in-flight jobs.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(10));
        info!(
            poll_ms = self.config.poll_interval_ms,
            batch = self.config.batch_size,
            concurrency = self.config.max_concurrency,
            "Job runner started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.dispatch_due().await {
                error!(error = %e, "Job runner tick failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let slots = u32::try_from(self.config.max_concurrency.max(1)).unwrap_or(u32::MAX);
        let _drained = self.permits.acquire_many(slots).await;
        info!("Job runner stopped");
    }
}

async fn execute(jobs: Arc<dyn JobStore>, handler: Arc<dyn JobHandler>, job: LifecycleJob) {
    let key = job.key();
    debug!(job = %key, attempt = job.attempts, "Executing lifecycle job");
    let outcome = match handler.handle(&job).await {
        Ok(()) => JobOutcome::Completed,
        Err(e) => {
            warn!(job = %key, error = %e, "Lifecycle job failed");
            JobOutcome::Failed(e.to_string())
        }
    };
    match jobs.finish(key, job.generation, outcome).await {
        Ok(true) => {}
        Ok(false) => debug!(job = %key, "Job was replaced while running; result dropped"),
        Err(e) => error!(job = %key, error = %e, "Failed to record job result"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cadence_core::{CadenceError, JobStatus, Stage};
    use cadence_store::MemoryJobStore;
    use parking_lot::Mutex;
    use uuid::Uuid;

    /// Records every job it sees; fails launch jobs.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<(Uuid, Stage)>>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: &LifecycleJob) -> CadenceResult<()> {
            self.seen.lock().push((job.schedule_id, job.stage));
            if job.stage == Stage::Launch {
                return Err(CadenceError::Gating("pre-flight has not passed".into()));
            }
            Ok(())
        }
    }

    fn runner(store: Arc<MemoryJobStore>, handler: Arc<RecordingHandler>) -> JobRunner {
        JobRunner::new(store, handler, RunnerConfig::default())
    }

    #[tokio::test]
    async fn test_runs_due_jobs_once() {
        let store = Arc::new(MemoryJobStore::new());
        let handler = Arc::new(RecordingHandler::default());
        let id = Uuid::new_v4();
        let now = Utc::now();
        store.upsert(LifecycleJob::new(id, Stage::PreNotify, now)).await.unwrap();
        store.upsert(LifecycleJob::new(id, Stage::Launch, now)).await.unwrap();
        store
            .upsert(LifecycleJob::new(id, Stage::WrapUp, now + chrono::Duration::hours(1)))
            .await
            .unwrap();

        let r = runner(store.clone(), handler.clone());
        assert_eq!(r.run_once().await.unwrap(), 2);
        assert_eq!(r.run_once().await.unwrap(), 0);
        assert_eq!(handler.seen.lock().len(), 2);

        let jobs = store.list_for_schedule(id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[1].status, JobStatus::Failed);
        assert!(jobs[1].last_error.as_deref().unwrap().contains("pre-flight"));
        assert_eq!(jobs[2].status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_respects_concurrency_limit() {
        let store = Arc::new(MemoryJobStore::new());
        let handler = Arc::new(RecordingHandler::default());
        let now = Utc::now();
        for _ in 0..5 {
            store
                .upsert(LifecycleJob::new(Uuid::new_v4(), Stage::PreNotify, now))
                .await
                .unwrap();
        }
        let r = JobRunner::new(
            store.clone(),
            handler.clone(),
            RunnerConfig {
                max_concurrency: 2,
                ..RunnerConfig::default()
            },
        );
        assert_eq!(r.run_once().await.unwrap(), 2);
        assert_eq!(r.run_once().await.unwrap(), 2);
        assert_eq!(r.run_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_claim_is_redelivered() {
        let store = Arc::new(MemoryJobStore::new());
        let handler = Arc::new(RecordingHandler::default());
        let id = Uuid::new_v4();
        let past = Utc::now() - chrono::Duration::minutes(30);
        store.upsert(LifecycleJob::new(id, Stage::Countdown, past)).await.unwrap();
        // A runner that died twenty minutes ago.
        store.claim_due(past, 1).await.unwrap();

        let r = runner(store.clone(), handler.clone());
        assert_eq!(r.run_once().await.unwrap(), 1);
        let job = store.list_for_schedule(id).await.unwrap().remove(0);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let store = Arc::new(MemoryJobStore::new());
        let handler = Arc::new(RecordingHandler::default());
        let r = Arc::new(JobRunner::new(
            store,
            handler,
            RunnerConfig {
                poll_interval_ms: 20,
                ..RunnerConfig::default()
            },
        ));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(r.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
