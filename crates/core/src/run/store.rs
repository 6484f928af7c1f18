//! Run/job storage trait.

use chrono::{DateTime, Utc};

use super::{Job, JobError, JobOutcome, Run, RunSummary};
use crate::store::StoreError;

/// Storage for runs and jobs.
///
/// Workers in different processes coordinate only through this trait, so
/// every state transition is a compare-and-set on the current status:
/// a transition whose precondition no longer holds is a no-op reported
/// through the return value, never an error.
pub trait RunStore: Send + Sync {
    /// Persist a new run together with its jobs. The run's remaining
    /// counter starts at `jobs.len()`.
    fn create_run(&self, run: &Run, jobs: &[Job]) -> Result<(), StoreError>;

    fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Jobs of a run in creation order.
    fn list_jobs(&self, run_id: &str) -> Result<Vec<Job>, StoreError>;

    /// PENDING -> PROCESSING, incrementing `attempts`, while `attempts` is
    /// below `max_attempts`.
    /// Returns the claimed job, or `None` if the job was not PENDING or has
    /// no attempts left.
    fn claim_job(&self, job_id: &str, max_attempts: u32) -> Result<Option<Job>, StoreError>;

    /// PROCESSING -> PENDING, recording the error.
    fn release_job(&self, job_id: &str, error: &JobError) -> Result<bool, StoreError>;

    /// Non-terminal -> terminal, and decrement the run's remaining counter
    /// in the same atomic step.
    ///
    /// Returns the remaining count after the decrement, or `None` if the job
    /// was already terminal (or unknown) and nothing was written.
    fn complete_job(
        &self,
        run_id: &str,
        job_id: &str,
        outcome: &JobOutcome,
    ) -> Result<Option<u32>, StoreError>;

    /// RUNNING -> FINISHED. Returns `true` only for the caller that made the
    /// transition.
    fn finish_run(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Result<bool, StoreError>;

    /// IDs of RUNNING runs, oldest first.
    fn list_running_runs(&self) -> Result<Vec<String>, StoreError>;

    /// PENDING jobs of every run, oldest first.
    fn list_pending_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Put PROCESSING jobs last updated before `older_than` back to PENDING.
    fn reset_stale_jobs(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;
}
