//! SQLite-backed run store.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{
    ErrorKind, Job, JobError, JobOutcome, JobStatus, Run, RunStatus, RunStore, RunSummary,
};
use crate::store::{
    format_timestamp, lock, open_sqlite, open_sqlite_in_memory, parse_timestamp, StoreError,
};

const JOB_COLUMNS: &str = "job_id, run_id, raw_input, status, resolved_channel_id, attempts, \
                           last_error_kind, last_error_message, created_at, updated_at";

/// SQLite-backed run store.
///
/// Several processes may open the same database file; every transition is a
/// single conditional `UPDATE` (or one immediate transaction), so the
/// compare-and-set guarantees hold across processes.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

/// Raw job row before validation.
struct JobRow {
    job_id: String,
    run_id: String,
    raw_input: String,
    status: String,
    resolved_channel_id: Option<String>,
    attempts: u32,
    last_error_kind: Option<String>,
    last_error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            run_id: row.get(1)?,
            raw_input: row.get(2)?,
            status: row.get(3)?,
            resolved_channel_id: row.get(4)?,
            attempts: row.get(5)?,
            last_error_kind: row.get(6)?,
            last_error_message: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.job_id.clone(),
            reason,
        };

        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown job status '{}'", self.status)))?;

        let last_error = match &self.last_error_kind {
            Some(kind) => {
                let kind = ErrorKind::parse(kind)
                    .ok_or_else(|| corrupt(format!("unknown error kind '{}'", kind)))?;
                Some(JobError::new(
                    kind,
                    self.last_error_message.clone().unwrap_or_default(),
                ))
            }
            None => None,
        };

        Ok(Job {
            created_at: parse_timestamp(&self.job_id, &self.created_at)?,
            updated_at: parse_timestamp(&self.job_id, &self.updated_at)?,
            job_id: self.job_id,
            run_id: self.run_id,
            raw_input: self.raw_input,
            status,
            resolved_channel_id: self.resolved_channel_id,
            attempts: self.attempts,
            last_error,
        })
    }
}

impl SqliteRunStore {
    /// Open (or create) the store in the given database file.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = open_sqlite(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = open_sqlite_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                analysis_id INTEGER NOT NULL,
                owner_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                remaining INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                finished_at TEXT,
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                raw_input TEXT NOT NULL,
                status TEXT NOT NULL,
                resolved_channel_id TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error_kind TEXT,
                last_error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_run_id ON jobs(run_id, position);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, updated_at);
            "#,
        )?;
        Ok(())
    }

    fn load_run(conn: &Connection, run_id: &str) -> Result<Option<Run>, StoreError> {
        let row = conn
            .query_row(
                "SELECT run_id, analysis_id, owner_id, status, created_at, finished_at, summary
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((run_id, analysis_id, owner_id, status, created_at, finished_at, summary)) = row
        else {
            return Ok(None);
        };

        let status = RunStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            id: run_id.clone(),
            reason: format!("unknown run status '{}'", status),
        })?;

        let summary = summary
            .map(|raw| serde_json::from_str::<RunSummary>(&raw))
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                id: run_id.clone(),
                reason: format!("bad summary: {}", e),
            })?;

        let finished_at = finished_at
            .map(|raw| parse_timestamp(&run_id, &raw))
            .transpose()?;

        let mut stmt =
            conn.prepare("SELECT job_id FROM jobs WHERE run_id = ?1 ORDER BY position")?;
        let job_ids = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Run {
            created_at: parse_timestamp(&run_id, &created_at)?,
            run_id,
            analysis_id,
            owner_id,
            status,
            job_ids,
            finished_at,
            summary,
        }))
    }
}

impl RunStore for SqliteRunStore {
    fn create_run(&self, run: &Run, jobs: &[Job]) -> Result<(), StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let summary = run
            .summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO runs (run_id, analysis_id, owner_id, status, remaining, created_at, finished_at, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.analysis_id,
                run.owner_id,
                run.status.as_str(),
                jobs.len() as i64,
                format_timestamp(&run.created_at),
                run.finished_at.as_ref().map(format_timestamp),
                summary,
            ],
        )?;

        for (position, job) in jobs.iter().enumerate() {
            tx.execute(
                "INSERT INTO jobs (job_id, run_id, position, raw_input, status, resolved_channel_id,
                                   attempts, last_error_kind, last_error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    job.job_id,
                    job.run_id,
                    position as i64,
                    job.raw_input,
                    job.status.as_str(),
                    job.resolved_channel_id,
                    job.attempts,
                    job.last_error.as_ref().map(|e| e.kind.as_str()),
                    job.last_error.as_ref().map(|e| e.message.as_str()),
                    format_timestamp(&job.created_at),
                    format_timestamp(&job.updated_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let conn = lock(&self.conn)?;
        Self::load_run(&conn, run_id)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLUMNS),
            params![job_id],
            JobRow::from_row,
        )
        .optional()?
        .map(JobRow::into_job)
        .transpose()
    }

    fn list_jobs(&self, run_id: &str) -> Result<Vec<Job>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE run_id = ?1 ORDER BY position",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![run_id], JobRow::from_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }

    fn claim_job(&self, job_id: &str, max_attempts: u32) -> Result<Option<Job>, StoreError> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            &format!(
                "UPDATE jobs SET status = 'PROCESSING', attempts = attempts + 1, updated_at = ?3
                 WHERE job_id = ?1 AND status = 'PENDING' AND attempts < ?2
                 RETURNING {}",
                JOB_COLUMNS
            ),
            params![job_id, max_attempts, format_timestamp(&Utc::now())],
            JobRow::from_row,
        )
        .optional()?
        .map(JobRow::into_job)
        .transpose()
    }

    fn release_job(&self, job_id: &str, error: &JobError) -> Result<bool, StoreError> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE jobs SET status = 'PENDING', last_error_kind = ?2, last_error_message = ?3,
                             updated_at = ?4
             WHERE job_id = ?1 AND status = 'PROCESSING'",
            params![
                job_id,
                error.kind.as_str(),
                error.message,
                format_timestamp(&Utc::now())
            ],
        )?;
        Ok(changed == 1)
    }

    fn complete_job(
        &self,
        run_id: &str,
        job_id: &str,
        outcome: &JobOutcome,
    ) -> Result<Option<u32>, StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let error = outcome.error();
        let changed = tx.execute(
            "UPDATE jobs SET status = ?3, resolved_channel_id = ?4,
                             last_error_kind = COALESCE(?5, last_error_kind),
                             last_error_message = COALESCE(?6, last_error_message),
                             updated_at = ?7
             WHERE job_id = ?1 AND run_id = ?2 AND status IN ('PENDING', 'PROCESSING')",
            params![
                job_id,
                run_id,
                outcome.status().as_str(),
                outcome.channel_id(),
                error.as_ref().map(|e| e.kind.as_str()),
                error.as_ref().map(|e| e.message.as_str()),
                format_timestamp(&Utc::now()),
            ],
        )?;
        if changed == 0 {
            // Dropping the transaction rolls it back.
            return Ok(None);
        }

        let remaining: Option<i64> = tx
            .query_row(
                "UPDATE runs SET remaining = MAX(remaining - 1, 0) WHERE run_id = ?1
                 RETURNING remaining",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(remaining) = remaining else {
            return Ok(None);
        };
        tx.commit()?;
        Ok(Some(remaining as u32))
    }

    fn finish_run(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Result<bool, StoreError> {
        let summary =
            serde_json::to_string(summary).map_err(|e| StoreError::Database(e.to_string()))?;
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE runs SET status = 'FINISHED', finished_at = ?2, summary = ?3
             WHERE run_id = ?1 AND status = 'RUNNING'",
            params![run_id, format_timestamp(&finished_at), summary],
        )?;
        Ok(changed == 1)
    }

    fn list_running_runs(&self) -> Result<Vec<String>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT run_id FROM runs WHERE status = 'RUNNING' ORDER BY created_at, run_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn list_pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = 'PENDING' ORDER BY created_at, position",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map([], JobRow::from_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }

    fn reset_stale_jobs(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "UPDATE jobs SET status = 'PENDING', updated_at = ?2
             WHERE status = 'PROCESSING' AND updated_at < ?1
             RETURNING {}",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![format_timestamp(&older_than), format_timestamp(&Utc::now())],
            JobRow::from_row,
        )?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn seed(store: &SqliteRunStore, inputs: &[&str]) -> (Run, Vec<Job>) {
        let mut run = Run::new(7, 42);
        let jobs: Vec<Job> = inputs.iter().map(|i| Job::new(&run.run_id, *i)).collect();
        run.job_ids = jobs.iter().map(|j| j.job_id.clone()).collect();
        store.create_run(&run, &jobs).unwrap();
        (run, jobs)
    }

    #[test]
    fn test_create_and_get_run() {
        let store = SqliteRunStore::in_memory().unwrap();
        let (run, jobs) = seed(&store, &["@a", "@b"]);

        let loaded = store.get_run(&run.run_id).unwrap().unwrap();
        assert_eq!(loaded.analysis_id, 7);
        assert_eq!(loaded.owner_id, 42);
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.job_ids, run.job_ids);

        let job = store.get_job(&jobs[1].job_id).unwrap().unwrap();
        assert_eq!(job.raw_input, "@b");
        assert_eq!(job.status, JobStatus::Pending);

        assert!(store.get_run("missing").unwrap().is_none());
        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_claim_release_complete() {
        let store = SqliteRunStore::in_memory().unwrap();
        let (run, jobs) = seed(&store, &["@a"]);
        let id = &jobs[0].job_id;

        let claimed = store.claim_job(id, 3).unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
        assert!(store.claim_job(id, 3).unwrap().is_none());

        let error = JobError::new(ErrorKind::ApiQuota, "quotaExceeded");
        assert!(store.release_job(id, &error).unwrap());
        let reclaimed = store.claim_job(id, 3).unwrap().unwrap();
        assert_eq!(reclaimed.attempts, 2);
        assert_eq!(reclaimed.last_error, Some(error.clone()));

        store.release_job(id, &error).unwrap();
        store.claim_job(id, 3).unwrap().unwrap();
        store.release_job(id, &error).unwrap();
        assert!(store.claim_job(id, 3).unwrap().is_none());
        assert_eq!(store.get_job(id).unwrap().unwrap().attempts, 3);

        let done = JobOutcome::Done {
            channel_id: "UCX6OQ3DkcsbYNE6H8uQQuVA".into(),
        };
        assert_eq!(store.complete_job(&run.run_id, id, &done).unwrap(), Some(0));
        assert_eq!(store.complete_job(&run.run_id, id, &done).unwrap(), None);

        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(
            job.resolved_channel_id.as_deref(),
            Some("UCX6OQ3DkcsbYNE6H8uQQuVA")
        );
    }

    #[test]
    fn test_needs_search_records_reason() {
        let store = SqliteRunStore::in_memory().unwrap();
        let (run, jobs) = seed(&store, &["@ghost"]);
        let outcome = JobOutcome::NeedsSearch {
            reason: "no channel for @ghost".into(),
        };
        store
            .complete_job(&run.run_id, &jobs[0].job_id, &outcome)
            .unwrap();

        let job = store.get_job(&jobs[0].job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::NeedsSearch);
        assert_eq!(
            job.last_error.map(|e| e.kind),
            Some(ErrorKind::AmbiguousOrNotFound)
        );
    }

    #[test]
    fn test_finish_run_persists_summary() {
        let store = SqliteRunStore::in_memory().unwrap();
        let (run, _) = seed(&store, &["a"]);
        let mut counts = crate::run::StatusCounts::new();
        counts.insert(JobStatus::Done, 1);
        let summary = RunSummary {
            total: 1,
            status_counts: counts,
            duration_secs: 1.5,
        };

        assert!(store.finish_run(&run.run_id, Utc::now(), &summary).unwrap());
        assert!(!store.finish_run(&run.run_id, Utc::now(), &summary).unwrap());

        let loaded = store.get_run(&run.run_id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Finished);
        assert!(loaded.finished_at.is_some());
        assert_eq!(loaded.summary, Some(summary));
    }

    #[test]
    fn test_list_running_runs() {
        let store = SqliteRunStore::in_memory().unwrap();
        let (first, _) = seed(&store, &["a"]);
        let (second, _) = seed(&store, &["b"]);
        let summary = RunSummary {
            total: 1,
            status_counts: Default::default(),
            duration_secs: 0.0,
        };
        store.finish_run(&first.run_id, Utc::now(), &summary).unwrap();

        assert_eq!(store.list_running_runs().unwrap(), vec![second.run_id]);
    }

    #[test]
    fn test_concurrent_completions_count_down_once_each() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("runs.db");
        let setup = SqliteRunStore::new(&path).unwrap();
        let inputs: Vec<String> = (0..20).map(|i| format!("@c{}", i)).collect();
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let (run, jobs) = seed(&setup, &refs);
        let run_id = Arc::new(run.run_id);

        // One connection per thread, like separate worker processes.
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let path = path.clone();
                let run_id = Arc::clone(&run_id);
                std::thread::spawn(move || {
                    let store = SqliteRunStore::new(&path).unwrap();
                    let outcome = JobOutcome::NeedsSearch {
                        reason: "x".into(),
                    };
                    let first = store.complete_job(&run_id, &job.job_id, &outcome).unwrap();
                    let second = store.complete_job(&run_id, &job.job_id, &outcome).unwrap();
                    assert!(second.is_none());
                    first.unwrap()
                })
            })
            .collect();

        let mut remaining: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        remaining.sort_unstable();
        assert_eq!(remaining, (0..20).collect::<Vec<u32>>());
    }

    #[test]
    fn test_reset_stale_jobs() {
        let store = SqliteRunStore::in_memory().unwrap();
        let (_, jobs) = seed(&store, &["a", "b"]);
        store.claim_job(&jobs[1].job_id, 3).unwrap();

        assert!(store
            .reset_stale_jobs(Utc::now() - chrono::Duration::seconds(300))
            .unwrap()
            .is_empty());

        let reset = store
            .reset_stale_jobs(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].job_id, jobs[1].job_id);
        assert_eq!(reset[0].status, JobStatus::Pending);
        assert_eq!(reset[0].attempts, 1);

        let pending = store.list_pending_jobs().unwrap();
        let ids: Vec<&str> = pending.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&jobs[0].job_id.as_str()));
        assert!(ids.contains(&jobs[1].job_id.as_str()));
    }
}
