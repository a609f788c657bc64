use crate::jobs::{JobOutcome, JobStore};
use crate::rounds::RoundStore;
use async_trait::async_trait;
use cadence_core::{
    CadenceError, CadenceResult, JobKey, JobStatus, LifecycleJob, RoundSchedule, RoundStatus,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory round store. Good for tests and single-process dry runs.
#[derive(Default)]
pub struct MemoryRoundStore {
    rounds: RwLock<HashMap<Uuid, RoundSchedule>>,
}

impl MemoryRoundStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoundStore for MemoryRoundStore {
    async fn insert_rounds(&self, rounds: &[RoundSchedule]) -> CadenceResult<()> {
        let mut stored = self.rounds.write().await;
        for (i, round) in rounds.iter().enumerate() {
            let clash = stored.contains_key(&round.schedule_id)
                || stored.values().chain(&rounds[..i]).any(|r| {
                    r.campaign_name == round.campaign_name && r.round_number == round.round_number
                });
            if clash {
                return Err(CadenceError::Store(format!(
                    "round {} of '{}' already exists",
                    round.round_number, round.campaign_name
                )));
            }
        }
        for round in rounds {
            stored.insert(round.schedule_id, round.clone());
        }
        Ok(())
    }

    async fn get(&self, schedule_id: Uuid) -> CadenceResult<Option<RoundSchedule>> {
        Ok(self.rounds.read().await.get(&schedule_id).cloned())
    }

    async fn list_by_campaign(&self, campaign_name: &str) -> CadenceResult<Vec<RoundSchedule>> {
        let mut rounds: Vec<RoundSchedule> = self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| r.campaign_name == campaign_name)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.round_number);
        Ok(rounds)
    }

    async fn update_if_status(
        &self,
        round: &RoundSchedule,
        expected: RoundStatus,
    ) -> CadenceResult<bool> {
        let mut stored = self.rounds.write().await;
        match stored.get_mut(&round.schedule_id) {
            Some(current) if current.status == expected => {
                *current = round.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CadenceError::NotFound(format!(
                "schedule {}",
                round.schedule_id
            ))),
        }
    }
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobKey, LifecycleJob>>,
}

impl MemoryJobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn running_conflict(job: &LifecycleJob) -> CadenceError {
    CadenceError::Scheduling(format!("job {} is running", job.key()))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, mut job: LifecycleJob) -> CadenceResult<LifecycleJob> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        if let Some(existing) = jobs.get(&job.key()) {
            match existing.status {
                JobStatus::Running => return Err(running_conflict(existing)),
                JobStatus::Pending => {
                    job.generation = existing.generation;
                    job.created_at = existing.created_at;
                }
                _ => job.generation = existing.generation + 1,
            }
        }
        job.status = JobStatus::Pending;
        job.attempts = 0;
        job.claimed_at = None;
        job.last_error = None;
        job.updated_at = now;
        jobs.insert(job.key(), job.clone());
        Ok(job)
    }

    async fn replace_for_schedule(
        &self,
        schedule_id: Uuid,
        new_jobs: Vec<LifecycleJob>,
    ) -> CadenceResult<Vec<LifecycleJob>> {
        let mut jobs = self.jobs.write().await;
        if let Some(busy) = jobs
            .values()
            .find(|j| j.schedule_id == schedule_id && j.status == JobStatus::Running)
        {
            return Err(running_conflict(busy));
        }

        let now = Utc::now();
        for job in jobs.values_mut().filter(|j| j.schedule_id == schedule_id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Cancelled;
                job.updated_at = now;
            }
        }

        let mut stored = Vec::with_capacity(new_jobs.len());
        for mut job in new_jobs {
            job.generation = jobs.get(&job.key()).map_or(0, |old| old.generation + 1);
            job.status = JobStatus::Pending;
            job.attempts = 0;
            job.claimed_at = None;
            job.updated_at = now;
            jobs.insert(job.key(), job.clone());
            stored.push(job);
        }
        Ok(stored)
    }

    async fn get(&self, key: JobKey) -> CadenceResult<Option<LifecycleJob>> {
        Ok(self.jobs.read().await.get(&key).cloned())
    }

    async fn list_for_schedule(&self, schedule_id: Uuid) -> CadenceResult<Vec<LifecycleJob>> {
        let mut list: Vec<LifecycleJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.schedule_id == schedule_id)
            .cloned()
            .collect();
        list.sort_by_key(|j| j.stage);
        Ok(list)
    }

    async fn cancel_pending(&self, schedule_id: Uuid) -> CadenceResult<usize> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut cancelled = 0;
        for job in jobs
            .values_mut()
            .filter(|j| j.schedule_id == schedule_id && j.status == JobStatus::Pending)
        {
            job.status = JobStatus::Cancelled;
            job.updated_at = now;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> CadenceResult<Vec<LifecycleJob>> {
        let mut jobs = self.jobs.write().await;
        let mut due: Vec<JobKey> = jobs
            .values()
            .filter(|j| j.is_due(now))
            .map(LifecycleJob::key)
            .collect();
        due.sort_by_key(|k| jobs.get(k).map(|j| (j.fire_at, j.stage)));
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for key in due {
            if let Some(job) = jobs.get_mut(&key) {
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.claimed_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn finish(
        &self,
        key: JobKey,
        generation: u32,
        outcome: JobOutcome,
    ) -> CadenceResult<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&key) else {
            return Ok(false);
        };
        if job.generation != generation || job.status != JobStatus::Running {
            return Ok(false);
        }
        match outcome {
            JobOutcome::Completed => {
                job.status = JobStatus::Completed;
                job.last_error = None;
            }
            JobOutcome::Failed(err) => {
                job.status = JobStatus::Failed;
                job.last_error = Some(err);
            }
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> CadenceResult<usize> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut requeued = 0;
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Running
                && job.claimed_at.is_some_and(|at| at < cutoff);
            if stale {
                job.status = JobStatus::Pending;
                job.claimed_at = None;
                job.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}
