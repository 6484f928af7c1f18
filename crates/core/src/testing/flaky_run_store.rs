//! Run store wrapper with injected failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::run::{Job, JobError, JobOutcome, Run, RunStore, RunSummary};
use crate::store::StoreError;

/// Delegates to an inner [`RunStore`], failing the next N calls of selected
/// operations, and counts the `finish_run` calls that finalized a run.
pub struct FlakyRunStore {
    inner: Arc<dyn RunStore>,
    get_run_failures: AtomicU32,
    complete_job_failures: AtomicU32,
    finish_run_failures: AtomicU32,
    finalized: AtomicU32,
}

impl FlakyRunStore {
    pub fn new(inner: Arc<dyn RunStore>) -> Self {
        Self {
            inner,
            get_run_failures: AtomicU32::new(0),
            complete_job_failures: AtomicU32::new(0),
            finish_run_failures: AtomicU32::new(0),
            finalized: AtomicU32::new(0),
        }
    }

    pub fn fail_get_run(&self, count: u32) {
        self.get_run_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_complete_job(&self, count: u32) {
        self.complete_job_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_finish_run(&self, count: u32) {
        self.finish_run_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `finish_run` calls that returned `true`.
    pub fn finalized(&self) -> u32 {
        self.finalized.load(Ordering::SeqCst)
    }
}

fn should_fail(counter: &AtomicU32, operation: &str) -> Result<(), StoreError> {
    let fail = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if fail {
        Err(StoreError::Database(format!("injected {} failure", operation)))
    } else {
        Ok(())
    }
}

impl RunStore for FlakyRunStore {
    fn create_run(&self, run: &Run, jobs: &[Job]) -> Result<(), StoreError> {
        self.inner.create_run(run, jobs)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        should_fail(&self.get_run_failures, "get_run")?;
        self.inner.get_run(run_id)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(job_id)
    }

    fn list_jobs(&self, run_id: &str) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs(run_id)
    }

    fn claim_job(&self, job_id: &str, max_attempts: u32) -> Result<Option<Job>, StoreError> {
        self.inner.claim_job(job_id, max_attempts)
    }

    fn release_job(&self, job_id: &str, error: &JobError) -> Result<bool, StoreError> {
        self.inner.release_job(job_id, error)
    }

    fn complete_job(
        &self,
        run_id: &str,
        job_id: &str,
        outcome: &JobOutcome,
    ) -> Result<Option<u32>, StoreError> {
        should_fail(&self.complete_job_failures, "complete_job")?;
        self.inner.complete_job(run_id, job_id, outcome)
    }

    fn finish_run(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Result<bool, StoreError> {
        should_fail(&self.finish_run_failures, "finish_run")?;
        let finished = self.inner.finish_run(run_id, finished_at, summary)?;
        if finished {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
        Ok(finished)
    }

    fn list_running_runs(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_running_runs()
    }

    fn list_pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_pending_jobs()
    }

    fn reset_stale_jobs(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        self.inner.reset_stale_jobs(older_than)
    }
}
