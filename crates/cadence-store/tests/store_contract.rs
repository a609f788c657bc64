#![allow(clippy::unwrap_used, clippy::expect_used)]

use cadence_core::*;
use cadence_store::*;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

fn round(campaign: &str, n: u32) -> RoundSchedule {
    RoundSchedule::new(
        campaign,
        n,
        format!("list-{n}"),
        (u64::from(n) - 1) * 100..u64::from(n) * 100,
        300,
        "Subject",
        "Acme",
        "news@acme.test",
        NaiveDate::from_ymd_opt(2033, 5, n).unwrap(),
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        0,
    )
}

fn backends() -> Vec<(&'static str, Arc<dyn RoundStore>, Arc<dyn JobStore>)> {
    let sqlite = Arc::new(SqliteStore::open_in_memory().unwrap());
    let memory_rounds: Arc<dyn RoundStore> = Arc::new(MemoryRoundStore::new());
    let memory_jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let sqlite_rounds: Arc<dyn RoundStore> = sqlite.clone();
    let sqlite_jobs: Arc<dyn JobStore> = sqlite;
    vec![
        ("memory", memory_rounds, memory_jobs),
        ("sqlite", sqlite_rounds, sqlite_jobs),
    ]
}

// ---------------------------------------------------------------------------
// 1. Rounds: atomic insert, ordering, conditional update
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rounds_insert_list_and_conditional_update() {
    for (name, rounds, _) in backends() {
        let batch = vec![round("Spring", 3), round("Spring", 1), round("Spring", 2)];
        rounds.insert_rounds(&batch).await.unwrap();

        let listed = rounds.list_by_campaign("Spring").await.unwrap();
        let numbers: Vec<u32> = listed.iter().map(|r| r.round_number).collect();
        assert_eq!(numbers, vec![1, 2, 3], "{name}");
        assert!(rounds.campaign_exists("Spring").await.unwrap(), "{name}");
        assert!(!rounds.campaign_exists("Autumn").await.unwrap(), "{name}");

        let mut first = listed[0].clone();
        first
            .transition(RoundStatus::PreFlightPassed, None)
            .unwrap();
        assert!(
            rounds
                .update_if_status(&first, RoundStatus::Scheduled)
                .await
                .unwrap(),
            "{name}"
        );
        // Stale writer expecting the old status loses.
        assert!(
            !rounds
                .update_if_status(&first, RoundStatus::Scheduled)
                .await
                .unwrap(),
            "{name}"
        );
        let stored = rounds.get(first.schedule_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RoundStatus::PreFlightPassed, "{name}");
    }
}

#[tokio::test]
async fn test_rounds_insert_is_all_or_nothing() {
    for (name, rounds, _) in backends() {
        rounds.insert_rounds(&[round("Summer", 2)]).await.unwrap();
        let result = rounds
            .insert_rounds(&[round("Summer", 1), round("Summer", 2), round("Summer", 3)])
            .await;
        assert!(result.is_err(), "{name}");
        assert_eq!(
            rounds.list_by_campaign("Summer").await.unwrap().len(),
            1,
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_rounds_update_unknown_is_not_found() {
    for (name, rounds, _) in backends() {
        let orphan = round("Ghost", 1);
        let err = rounds
            .update_if_status(&orphan, RoundStatus::Scheduled)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found", "{name}");
    }
}

// ---------------------------------------------------------------------------
// 2. Jobs: one row per key, generations, claims
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_jobs_upsert_keeps_one_row_per_stage() {
    for (name, _, jobs) in backends() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        jobs.upsert(LifecycleJob::new(id, Stage::Launch, now + Duration::hours(1)))
            .await
            .unwrap();
        let again = jobs
            .upsert(LifecycleJob::new(id, Stage::Launch, now + Duration::hours(2)))
            .await
            .unwrap();
        assert_eq!(again.generation, 0, "{name}");

        let listed = jobs.list_for_schedule(id).await.unwrap();
        assert_eq!(listed.len(), 1, "{name}");
        assert_eq!(
            listed[0].fire_at.timestamp_millis(),
            (now + Duration::hours(2)).timestamp_millis(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_jobs_claim_is_exclusive_and_ordered() {
    for (name, _, jobs) in backends() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        jobs.upsert(LifecycleJob::new(id, Stage::Countdown, now - Duration::minutes(1)))
            .await
            .unwrap();
        jobs.upsert(LifecycleJob::new(id, Stage::PreFlight, now - Duration::minutes(5)))
            .await
            .unwrap();
        jobs.upsert(LifecycleJob::new(id, Stage::Launch, now + Duration::minutes(10)))
            .await
            .unwrap();

        let claimed = jobs.claim_due(now, 10).await.unwrap();
        let stages: Vec<Stage> = claimed.iter().map(|j| j.stage).collect();
        assert_eq!(stages, vec![Stage::PreFlight, Stage::Countdown], "{name}");
        assert!(claimed.iter().all(|j| j.status == JobStatus::Running));
        assert!(claimed.iter().all(|j| j.attempts == 1));

        assert!(jobs.claim_due(now, 10).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_jobs_running_row_blocks_upsert_and_replace() {
    for (name, _, jobs) in backends() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        jobs.upsert(LifecycleJob::new(id, Stage::Launch, now))
            .await
            .unwrap();
        jobs.claim_due(now, 1).await.unwrap();

        let err = jobs
            .upsert(LifecycleJob::new(id, Stage::Launch, now + Duration::hours(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "scheduling", "{name}");

        let err = jobs
            .replace_for_schedule(
                id,
                vec![LifecycleJob::new(id, Stage::Launch, now + Duration::hours(1))],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "scheduling", "{name}");
    }
}

#[tokio::test]
async fn test_jobs_finish_ignores_replaced_generation() {
    for (name, _, jobs) in backends() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        jobs.upsert(LifecycleJob::new(id, Stage::WrapUp, now))
            .await
            .unwrap();
        let claimed = jobs.claim_due(now, 1).await.unwrap().remove(0);

        assert!(
            !jobs
                .finish(claimed.key(), claimed.generation + 1, JobOutcome::Completed)
                .await
                .unwrap(),
            "{name}"
        );
        assert!(
            jobs.finish(
                claimed.key(),
                claimed.generation,
                JobOutcome::Failed("provider down".into())
            )
            .await
            .unwrap(),
            "{name}"
        );
        let stored = jobs.get(claimed.key()).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed, "{name}");
        assert_eq!(stored.last_error.as_deref(), Some("provider down"), "{name}");

        // A finished row is replaced by a fresh generation.
        let fresh = jobs
            .upsert(LifecycleJob::new(id, Stage::WrapUp, now))
            .await
            .unwrap();
        assert_eq!(fresh.generation, claimed.generation + 1, "{name}");
        assert_eq!(fresh.status, JobStatus::Pending, "{name}");
    }
}

#[tokio::test]
async fn test_jobs_replace_cancels_and_bumps_generation() {
    for (name, _, jobs) in backends() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let first: Vec<LifecycleJob> = Stage::ALL
            .iter()
            .map(|s| LifecycleJob::new(id, *s, now + Duration::days(1)))
            .collect();
        jobs.replace_for_schedule(id, first).await.unwrap();

        let second = vec![
            LifecycleJob::new(id, Stage::Launch, now + Duration::days(2)),
            LifecycleJob::new(id, Stage::WrapUp, now + Duration::days(2)),
        ];
        let stored = jobs.replace_for_schedule(id, second).await.unwrap();
        assert!(stored.iter().all(|j| j.generation == 1), "{name}");

        let listed = jobs.list_for_schedule(id).await.unwrap();
        let active: Vec<Stage> = listed
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.stage)
            .collect();
        assert_eq!(active, vec![Stage::Launch, Stage::WrapUp], "{name}");
        let cancelled = listed
            .iter()
            .filter(|j| j.status == JobStatus::Cancelled)
            .count();
        assert_eq!(cancelled, 3, "{name}");
    }
}

#[tokio::test]
async fn test_jobs_cancel_and_requeue() {
    for (name, _, jobs) in backends() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        jobs.upsert(LifecycleJob::new(id, Stage::PreNotify, now))
            .await
            .unwrap();
        jobs.upsert(LifecycleJob::new(id, Stage::Launch, now + Duration::hours(3)))
            .await
            .unwrap();

        let claimed = jobs.claim_due(now, 5).await.unwrap();
        assert_eq!(claimed.len(), 1, "{name}");

        // Only the pending launch job is cancelled; the running one is untouched.
        assert_eq!(jobs.cancel_pending(id).await.unwrap(), 1, "{name}");

        assert_eq!(
            jobs.requeue_stale(now - Duration::minutes(1)).await.unwrap(),
            0,
            "{name}"
        );
        assert_eq!(
            jobs.requeue_stale(now + Duration::minutes(1)).await.unwrap(),
            1,
            "{name}"
        );
        let redelivered = jobs.claim_due(now, 5).await.unwrap();
        assert_eq!(redelivered.len(), 1, "{name}");
        assert_eq!(redelivered[0].attempts, 2, "{name}");
    }
}
