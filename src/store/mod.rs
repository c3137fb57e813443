//! SQLite-backed durable store for jobs and queue configuration.
//!
//! Every worker process opens its own [`Store`]; coordination between workers
//! happens entirely through the database. Each operation is a single short
//! statement (or a compare-and-set pair), so no lock is ever held while a
//! job's command runs.

mod settings;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::error::QueueError;
use crate::queue::{Job, JobState, StateMachine, Transition};

pub use settings::ConfigProvider;

/// How often a statement is re-run after SQLite reports the database busy.
const BUSY_RETRIES: u32 = 5;

const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, next_retry_at, output, created_at, updated_at";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        command TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        next_retry_at TEXT,
        output TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_job_state_retry
        ON jobs(state, next_retry_at, created_at);
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    INSERT OR IGNORE INTO config (key, value) VALUES ('max_retries', '3');
    INSERT OR IGNORE INTO config (key, value) VALUES ('backoff_base', '2');
";

/// Number of jobs in each state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateCounts(HashMap<JobState, u64>);

impl StateCounts {
    pub fn get(&self, state: JobState) -> u64 {
        self.0.get(&state).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// `busy_timeout` bounds how long a statement waits on another process's lock.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened job store");

        let store = Self { conn };
        store.with_retry(|conn| conn.execute_batch(SCHEMA))?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    /// Persists a freshly validated job. Fails if the id is already taken.
    pub fn insert(&self, job: &Job) -> Result<(), QueueError> {
        let result = self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO jobs
                 (id, command, state, attempts, max_retries, next_retry_at, output, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id,
                    job.command,
                    job.state.as_str(),
                    job.attempts,
                    job.max_retries,
                    job.next_retry_at.as_ref().map(fmt_ts),
                    job.output,
                    fmt_ts(&job.created_at),
                    fmt_ts(&job.updated_at),
                ],
            )
        });

        match result {
            Ok(_) => {
                info!(job_id = %job.id, "job enqueued");
                Ok(())
            }
            Err(QueueError::Store(e)) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(QueueError::DuplicateId(job.id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn find(&self, id: &str) -> Result<Option<Job>, QueueError> {
        self.with_retry(|conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()
        })
    }

    /// Atomically claims the oldest eligible job and marks it `processing`.
    ///
    /// Eligible means `pending`, or `failed` with `next_retry_at` at or before
    /// `now`. Selection and marking happen in one UPDATE, so concurrent
    /// claimers in other processes can never receive the same row.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, QueueError> {
        let now = fmt_ts(&now);
        let sql = format!(
            "UPDATE jobs
             SET state = 'processing', next_retry_at = NULL, updated_at = ?1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE state IN ('pending', 'failed')
                   AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        );
        self.with_retry(|conn| conn.query_row(&sql, params![now], job_from_row).optional())
    }

    /// Persists the outcome of a job this worker claimed.
    ///
    /// `claimed` is the row as returned by [`Store::claim_next`]; the update
    /// only applies while the row is still `processing` with the same attempt
    /// count, and the attempt increment lands in the same statement as the
    /// state change.
    pub fn record(
        &self,
        claimed: &Job,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        let mut job = claimed.clone();
        transition.apply(&mut job, now.trunc_subsecs(6));

        let changed = self.with_retry(|conn| {
            conn.execute(
                "UPDATE jobs
                 SET state = ?1, attempts = ?2, next_retry_at = ?3, output = ?4, updated_at = ?5
                 WHERE id = ?6 AND state = 'processing' AND attempts = ?7",
                params![
                    job.state.as_str(),
                    job.attempts,
                    job.next_retry_at.as_ref().map(fmt_ts),
                    job.output,
                    fmt_ts(&job.updated_at),
                    job.id,
                    claimed.attempts,
                ],
            )
        })?;

        if changed == 0 {
            return Err(QueueError::LostOwnership(job.id));
        }
        Ok(job)
    }

    /// Operator retry: moves a `dead` job back to `pending` with attempts reset.
    pub fn retry_dead(&self, id: &str, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let mut job = self
            .find(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if job.state != JobState::Dead {
            return Err(QueueError::Precondition {
                id: id.to_string(),
                state: job.state,
            });
        }

        StateMachine::reset(&mut job, now.trunc_subsecs(6));
        let changed = self.with_retry(|conn| {
            conn.execute(
                "UPDATE jobs
                 SET state = 'pending', attempts = 0, next_retry_at = NULL, output = NULL, updated_at = ?1
                 WHERE id = ?2 AND state = 'dead'",
                params![fmt_ts(&job.updated_at), id],
            )
        })?;

        if changed == 0 {
            // Someone else moved it between the read and the update.
            let state = self
                .find(id)?
                .map(|j| j.state)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            return Err(QueueError::Precondition {
                id: id.to_string(),
                state,
            });
        }

        info!(job_id = %id, "dead job moved back to pending");
        Ok(job)
    }

    pub fn counts(&self) -> Result<StateCounts, QueueError> {
        let rows = self.with_retry(|conn| {
            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut counts = HashMap::new();
        for (state, count) in rows {
            let state: JobState = state.parse()?;
            counts.insert(state, u64::try_from(count).unwrap_or(0));
        }
        Ok(StateCounts(counts))
    }

    /// Jobs in `state`, oldest first.
    pub fn list(&self, state: JobState) -> Result<Vec<Job>, QueueError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at ASC, rowid ASC"
            ),
            state,
        )
    }

    /// The dead letter queue, most recently updated first.
    pub fn list_dead(&self) -> Result<Vec<Job>, QueueError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY updated_at DESC, rowid DESC"
            ),
            JobState::Dead,
        )
    }

    fn query_jobs(&self, sql: &str, state: JobState) -> Result<Vec<Job>, QueueError> {
        self.with_retry(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![state.as_str()], job_from_row)?;
            rows.collect()
        })
    }

    /// Runs `op`, transparently re-running it while SQLite reports contention.
    ///
    /// Blocks the calling thread for at most the busy timeout per attempt plus
    /// half a second of sleeps. Longer waits belong to the caller; see
    /// `Worker::record_owned`.
    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, QueueError> {
        let mut attempt = 1;
        loop {
            match op(&self.conn) {
                Ok(value) => return Ok(value),
                Err(e) if QueueError::is_busy(&e) => {
                    if attempt >= BUSY_RETRIES {
                        return Err(QueueError::Contention {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    debug!(attempt, error = %e, "store busy, retrying");
                    std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Fixed-width UTC timestamp so lexical order in SQL matches time order.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let state: String = row.get(2)?;
    let state = state
        .parse::<JobState>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let next_retry_at = row
        .get::<_, Option<String>>(5)?
        .map(|raw| parse_ts(5, &raw))
        .transpose()?;

    Ok(Job {
        id: row.get(0)?,
        command: row.get(1)?,
        state,
        attempts: row.get(3)?,
        max_retries: row.get(4)?,
        next_retry_at,
        output: row.get(6)?,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_ts(8, &row.get::<_, String>(8)?)?,
    })
}
