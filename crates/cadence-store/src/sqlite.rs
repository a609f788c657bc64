use crate::jobs::{JobOutcome, JobStore};
use crate::rounds::RoundStore;
use async_trait::async_trait;
use cadence_core::{
    CadenceError, CadenceResult, JobKey, JobStatus, LifecycleJob, RoundSchedule, RoundStatus,
    Stage,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rounds (
    schedule_id   TEXT PRIMARY KEY,
    campaign_name TEXT NOT NULL,
    round_number  INTEGER NOT NULL,
    status        TEXT NOT NULL,
    doc           TEXT NOT NULL,
    updated_at    INTEGER NOT NULL,
    UNIQUE (campaign_name, round_number)
);
CREATE TABLE IF NOT EXISTS lifecycle_jobs (
    schedule_id TEXT NOT NULL,
    stage       TEXT NOT NULL,
    fire_at     INTEGER NOT NULL,
    status      TEXT NOT NULL,
    attempts    INTEGER NOT NULL DEFAULT 0,
    generation  INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT,
    claimed_at  INTEGER,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (schedule_id, stage)
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON lifecycle_jobs (status, fire_at);
";

/// Stage firing order, for ties on `fire_at`.
const STAGE_ORDER: &str = "CASE stage WHEN 'PRE_NOTIFY' THEN 0 WHEN 'PRE_FLIGHT' THEN 1 \
                           WHEN 'COUNTDOWN' THEN 2 WHEN 'LAUNCH' THEN 3 ELSE 4 END";

const JOB_COLUMNS: &str = "schedule_id, stage, fire_at, status, attempts, generation, \
                           last_error, claimed_at, created_at, updated_at";

/// SQLite-backed round and job store.
///
/// A single connection behind a mutex; every call runs on the blocking pool.
/// Conditional updates and claims run inside transactions, so several
/// processes sharing the file still launch a round at most once.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> CadenceError {
    CadenceError::Store(format!("{context}: {e}"))
}

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

fn conversion_err(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("invalid {what}: {value}").into(),
    )
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<LifecycleJob> {
    let schedule_id: String = row.get(0)?;
    let stage: String = row.get(1)?;
    let status: String = row.get(3)?;
    let claimed_at: Option<i64> = row.get(7)?;
    Ok(LifecycleJob {
        schedule_id: Uuid::parse_str(&schedule_id)
            .map_err(|_| conversion_err("schedule id", &schedule_id))?,
        stage: Stage::parse(&stage).ok_or_else(|| conversion_err("stage", &stage))?,
        fire_at: from_millis(row.get(2)?)?,
        status: JobStatus::parse(&status).ok_or_else(|| conversion_err("status", &status))?,
        attempts: row.get(4)?,
        generation: row.get(5)?,
        last_error: row.get(6)?,
        claimed_at: claimed_at.map(from_millis).transpose()?,
        created_at: from_millis(row.get(8)?)?,
        updated_at: from_millis(row.get(9)?)?,
    })
}

fn write_job(tx: &Transaction<'_>, job: &LifecycleJob) -> rusqlite::Result<()> {
    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO lifecycle_jobs ({JOB_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            job.schedule_id.to_string(),
            job.stage.as_str(),
            millis(job.fire_at),
            job.status.as_str(),
            job.attempts,
            job.generation,
            job.last_error,
            job.claimed_at.map(millis),
            millis(job.created_at),
            millis(job.updated_at),
        ],
    )?;
    Ok(())
}

fn read_job(tx: &Transaction<'_>, key: JobKey) -> rusqlite::Result<Option<LifecycleJob>> {
    tx.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM lifecycle_jobs WHERE schedule_id = ?1 AND stage = ?2"),
        params![key.schedule_id.to_string(), key.stage.as_str()],
        job_from_row,
    )
    .optional()
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> CadenceResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| store_err("Failed to open database", e))?;
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> CadenceResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| store_err("Failed to open in-memory database", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> CadenceResult<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(|e| store_err("Failed to configure database", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| store_err("Failed to apply schema", e))?;
        debug!("SQLite store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> CadenceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> CadenceResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| store_err("Store task failed", e))?
    }
}

fn round_from_doc(doc: String) -> CadenceResult<RoundSchedule> {
    serde_json::from_str(&doc).map_err(|e| store_err("Corrupt round document", e))
}

#[async_trait]
impl RoundStore for SqliteStore {
    async fn insert_rounds(&self, rounds: &[RoundSchedule]) -> CadenceResult<()> {
        let docs = rounds
            .iter()
            .map(|r| Ok((r.clone(), serde_json::to_string(r)?)))
            .collect::<CadenceResult<Vec<_>>>()?;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| store_err("Failed to begin transaction", e))?;
            for (round, doc) in &docs {
                tx.execute(
                    "INSERT INTO rounds
                         (schedule_id, campaign_name, round_number, status, doc, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        round.schedule_id.to_string(),
                        round.campaign_name,
                        round.round_number,
                        round.status.as_str(),
                        doc,
                        millis(round.updated_at),
                    ],
                )
                .map_err(|e| {
                    store_err(
                        &format!(
                            "Failed to insert round {} of '{}'",
                            round.round_number, round.campaign_name
                        ),
                        e,
                    )
                })?;
            }
            tx.commit().map_err(|e| store_err("Failed to commit rounds", e))
        })
        .await
    }

    async fn get(&self, schedule_id: Uuid) -> CadenceResult<Option<RoundSchedule>> {
        let doc: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT doc FROM rounds WHERE schedule_id = ?1",
                    params![schedule_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| store_err("Failed to load round", e))
            })
            .await?;
        doc.map(round_from_doc).transpose()
    }

    async fn list_by_campaign(&self, campaign_name: &str) -> CadenceResult<Vec<RoundSchedule>> {
        let name = campaign_name.to_string();
        let docs: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT doc FROM rounds WHERE campaign_name = ?1 ORDER BY round_number",
                    )
                    .map_err(|e| store_err("Failed to prepare query", e))?;
                let rows = stmt
                    .query_map(params![name], |row| row.get(0))
                    .map_err(|e| store_err("Failed to list rounds", e))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
                    .map_err(|e| store_err("Failed to read rounds", e))
            })
            .await?;
        docs.into_iter().map(round_from_doc).collect()
    }

    async fn update_if_status(
        &self,
        round: &RoundSchedule,
        expected: RoundStatus,
    ) -> CadenceResult<bool> {
        let doc = serde_json::to_string(round)?;
        let id = round.schedule_id;
        let status = round.status;
        let updated_at = millis(round.updated_at);
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE rounds SET status = ?1, doc = ?2, updated_at = ?3
                     WHERE schedule_id = ?4 AND status = ?5",
                    params![
                        status.as_str(),
                        doc,
                        updated_at,
                        id.to_string(),
                        expected.as_str()
                    ],
                )
                .map_err(|e| store_err("Failed to update round", e))?;
            if changed == 1 {
                return Ok(true);
            }
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM rounds WHERE schedule_id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| store_err("Failed to check round", e))?;
            match exists {
                Some(_) => Ok(false),
                None => Err(CadenceError::NotFound(format!("schedule {id}"))),
            }
        })
        .await
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn upsert(&self, job: LifecycleJob) -> CadenceResult<LifecycleJob> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| store_err("Failed to begin transaction", e))?;
            let mut job = job;
            let now = Utc::now();
            if let Some(existing) =
                read_job(&tx, job.key()).map_err(|e| store_err("Failed to read job", e))?
            {
                match existing.status {
                    JobStatus::Running => {
                        return Err(CadenceError::Scheduling(format!(
                            "job {} is running",
                            existing.key()
                        )))
                    }
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
            write_job(&tx, &job).map_err(|e| store_err("Failed to write job", e))?;
            tx.commit().map_err(|e| store_err("Failed to commit job", e))?;
            Ok(job)
        })
        .await
    }

    async fn replace_for_schedule(
        &self,
        schedule_id: Uuid,
        jobs: Vec<LifecycleJob>,
    ) -> CadenceResult<Vec<LifecycleJob>> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| store_err("Failed to begin transaction", e))?;
            let running: Option<String> = tx
                .query_row(
                    "SELECT stage FROM lifecycle_jobs
                     WHERE schedule_id = ?1 AND status = 'running' LIMIT 1",
                    params![schedule_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| store_err("Failed to check running jobs", e))?;
            if let Some(stage) = running {
                return Err(CadenceError::Scheduling(format!(
                    "job {schedule_id}:{stage} is running"
                )));
            }

            let now = Utc::now();
            tx.execute(
                "UPDATE lifecycle_jobs SET status = 'cancelled', updated_at = ?1
                 WHERE schedule_id = ?2 AND status = 'pending'",
                params![millis(now), schedule_id.to_string()],
            )
            .map_err(|e| store_err("Failed to retire jobs", e))?;

            let mut stored = Vec::with_capacity(jobs.len());
            for mut job in jobs {
                let previous =
                    read_job(&tx, job.key()).map_err(|e| store_err("Failed to read job", e))?;
                job.generation = previous.map_or(0, |old| old.generation + 1);
                job.status = JobStatus::Pending;
                job.attempts = 0;
                job.claimed_at = None;
                job.updated_at = now;
                write_job(&tx, &job).map_err(|e| store_err("Failed to write job", e))?;
                stored.push(job);
            }
            tx.commit()
                .map_err(|e| store_err("Failed to commit job set", e))?;
            Ok(stored)
        })
        .await
    }

    async fn get(&self, key: JobKey) -> CadenceResult<Option<LifecycleJob>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM lifecycle_jobs WHERE schedule_id = ?1 AND stage = ?2"
                ),
                params![key.schedule_id.to_string(), key.stage.as_str()],
                job_from_row,
            )
            .optional()
            .map_err(|e| store_err("Failed to load job", e))
        })
        .await
    }

    async fn list_for_schedule(&self, schedule_id: Uuid) -> CadenceResult<Vec<LifecycleJob>> {
        let mut jobs = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM lifecycle_jobs WHERE schedule_id = ?1"
                    ))
                    .map_err(|e| store_err("Failed to prepare query", e))?;
                let rows = stmt
                    .query_map(params![schedule_id.to_string()], job_from_row)
                    .map_err(|e| store_err("Failed to list jobs", e))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| store_err("Failed to read jobs", e))
            })
            .await?;
        jobs.sort_by_key(|j| j.stage);
        Ok(jobs)
    }

    async fn cancel_pending(&self, schedule_id: Uuid) -> CadenceResult<usize> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE lifecycle_jobs SET status = 'cancelled', updated_at = ?1
                 WHERE schedule_id = ?2 AND status = 'pending'",
                params![millis(Utc::now()), schedule_id.to_string()],
            )
            .map_err(|e| store_err("Failed to cancel jobs", e))
        })
        .await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> CadenceResult<Vec<LifecycleJob>> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| store_err("Failed to begin claim", e))?;
            let due = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM lifecycle_jobs
                         WHERE status = 'pending' AND fire_at <= ?1
                         ORDER BY fire_at, {STAGE_ORDER} LIMIT ?2"
                    ))
                    .map_err(|e| store_err("Failed to prepare claim", e))?;
                let rows = stmt
                    .query_map(params![millis(now), limit as i64], job_from_row)
                    .map_err(|e| store_err("Failed to query due jobs", e))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| store_err("Failed to read due jobs", e))?
            };

            let mut claimed = Vec::with_capacity(due.len());
            for mut job in due {
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.claimed_at = Some(now);
                job.updated_at = now;
                write_job(&tx, &job).map_err(|e| store_err("Failed to claim job", e))?;
                claimed.push(job);
            }
            tx.commit().map_err(|e| store_err("Failed to commit claim", e))?;
            Ok(claimed)
        })
        .await
    }

    async fn finish(
        &self,
        key: JobKey,
        generation: u32,
        outcome: JobOutcome,
    ) -> CadenceResult<bool> {
        let (status, error) = match outcome {
            JobOutcome::Completed => (JobStatus::Completed, None),
            JobOutcome::Failed(e) => (JobStatus::Failed, Some(e)),
        };
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE lifecycle_jobs SET status = ?1, last_error = ?2, updated_at = ?3
                     WHERE schedule_id = ?4 AND stage = ?5 AND generation = ?6
                       AND status = 'running'",
                    params![
                        status.as_str(),
                        error,
                        millis(Utc::now()),
                        key.schedule_id.to_string(),
                        key.stage.as_str(),
                        generation,
                    ],
                )
                .map_err(|e| store_err("Failed to finish job", e))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> CadenceResult<usize> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE lifecycle_jobs SET status = 'pending', claimed_at = NULL, updated_at = ?1
                 WHERE status = 'running' AND claimed_at < ?2",
                params![millis(Utc::now()), millis(cutoff)],
            )
            .map_err(|e| store_err("Failed to requeue stale jobs", e))
        })
        .await
    }
}
