//! Run aggregator: creation, progress and exactly-once finalization.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    count_statuses, FailedJob, Job, JobOutcome, JobStatus, Run, RunStatus, RunStatusReport,
    RunStore, RunSummary,
};
use crate::metrics::{JOB_TRANSITIONS, RUNS_FINALIZED, RUNS_STARTED};
use crate::resolver::dedupe_key;
use crate::store::StoreError;

/// Tries of `finalize_run` by the write that drained a run.
const FINALIZE_ATTEMPTS: u32 = 3;

/// Owns the job set of each run and finalizes runs.
///
/// Finalization is guarded twice: the store decrements a per-run remaining
/// counter atomically with each terminal job write, and only the write that
/// brings it to zero calls [`finalize_run`](Self::finalize_run), which itself
/// is a compare-and-set on the run status.
///
/// If that call keeps failing, the run stays RUNNING with every job terminal
/// until [`finalize_stalled_runs`](Self::finalize_stalled_runs) or an
/// explicit [`finalize_run`](Self::finalize_run) picks it up.
pub struct RunAggregator {
    store: Arc<dyn RunStore>,
}

impl RunAggregator {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Create a run with one PENDING job per distinct input.
    ///
    /// Blank inputs are dropped. A run left with no jobs is finalized
    /// immediately.
    pub fn create_run(
        &self,
        analysis_id: i64,
        owner_id: i64,
        inputs: &[String],
    ) -> Result<(Run, Vec<Job>), StoreError> {
        let mut run = Run::new(analysis_id, owner_id);
        let mut seen = HashSet::new();
        let jobs: Vec<Job> = inputs
            .iter()
            .filter(|raw| dedupe_key(raw).is_some_and(|key| seen.insert(key)))
            .map(|raw| Job::new(&run.run_id, raw.trim()))
            .collect();
        run.job_ids = jobs.iter().map(|j| j.job_id.clone()).collect();

        self.store.create_run(&run, &jobs)?;
        RUNS_STARTED.inc();
        info!(
            run_id = %run.run_id,
            analysis_id,
            owner_id,
            inputs = inputs.len(),
            jobs = jobs.len(),
            "Run created"
        );

        if jobs.is_empty() {
            self.finalize_run(&run.run_id)?;
            if let Some(finished) = self.store.get_run(&run.run_id)? {
                run = finished;
            }
        }

        Ok((run, jobs))
    }

    /// Write a job's terminal status, finalizing the run if it was the last.
    ///
    /// Returns `false` when the job was already terminal (duplicate
    /// delivery); nothing is written in that case.
    pub fn record_job_terminal(
        &self,
        run_id: &str,
        job_id: &str,
        outcome: &JobOutcome,
    ) -> Result<bool, StoreError> {
        let Some(remaining) = self.store.complete_job(run_id, job_id, outcome)? else {
            debug!(run_id, job_id, "Job already terminal, ignoring");
            return Ok(false);
        };

        let status = outcome.status();
        JOB_TRANSITIONS.with_label_values(&[status.as_str()]).inc();
        debug!(run_id, job_id, status = %status, remaining, "Job reached terminal status");

        if remaining == 0 {
            self.finalize_with_retry(run_id)?;
        }
        Ok(true)
    }

    fn finalize_with_retry(&self, run_id: &str) -> Result<bool, StoreError> {
        let mut attempt = 1;
        loop {
            match self.finalize_run(run_id) {
                Ok(finalized) => return Ok(finalized),
                Err(e) if attempt < FINALIZE_ATTEMPTS => {
                    warn!(run_id, attempt, "Run finalization failed, retrying: {}", e);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(run_id, "Run finalization failed, deferring: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Finalize every RUNNING run whose jobs are all terminal.
    ///
    /// Returns how many runs this call finalized.
    pub fn finalize_stalled_runs(&self) -> Result<usize, StoreError> {
        let mut finalized = 0;
        for run_id in self.store.list_running_runs()? {
            if self.finalize_run(&run_id)? {
                info!(run_id = %run_id, "Finalized stalled run");
                finalized += 1;
            }
        }
        Ok(finalized)
    }

    /// Mark the run FINISHED and store its summary.
    ///
    /// Safe to call repeatedly and concurrently: returns `true` only for the
    /// call that actually finalized. Does nothing while jobs are still
    /// pending or processing.
    pub fn finalize_run(&self, run_id: &str) -> Result<bool, StoreError> {
        let Some(run) = self.store.get_run(run_id)? else {
            return Ok(false);
        };
        if run.status == RunStatus::Finished {
            return Ok(false);
        }

        let jobs = self.store.list_jobs(run_id)?;
        if let Some(open) = jobs.iter().find(|j| !j.status.is_terminal()) {
            debug!(run_id, job_id = %open.job_id, "Run still has open jobs");
            return Ok(false);
        }

        let finished_at = Utc::now();
        let duration_ms = (finished_at - run.created_at).num_milliseconds().max(0);
        let summary = RunSummary {
            total: jobs.len() as u32,
            status_counts: count_statuses(&jobs),
            duration_secs: duration_ms as f64 / 1000.0,
        };

        let finalized = self.store.finish_run(run_id, finished_at, &summary)?;
        if finalized {
            RUNS_FINALIZED.inc();
            info!(
                run_id,
                total = summary.total,
                counts = ?summary.status_counts,
                duration_secs = summary.duration_secs,
                "Run finished"
            );
        }
        Ok(finalized)
    }

    /// Current status of a run, `None` if unknown.
    pub fn get_run_status(&self, run_id: &str) -> Result<Option<RunStatusReport>, StoreError> {
        let Some(run) = self.store.get_run(run_id)? else {
            return Ok(None);
        };

        let jobs = self.store.list_jobs(run_id)?;
        let total = jobs.len() as u32;
        let terminal = jobs.iter().filter(|j| j.status.is_terminal()).count();
        let progress = if total == 0 {
            1.0
        } else {
            terminal as f64 / total as f64
        };

        Ok(Some(RunStatusReport {
            run_id: run.run_id,
            run_status: run.status,
            progress,
            total_jobs: total,
            status_counts: count_statuses(&jobs),
            finished_at: run.finished_at,
            summary: run.summary,
        }))
    }

    /// All jobs of a run, `None` if the run is unknown.
    pub fn list_jobs(&self, run_id: &str) -> Result<Option<Vec<Job>>, StoreError> {
        if self.store.get_run(run_id)?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.store.list_jobs(run_id)?))
    }

    /// FAILED jobs of a run with their last error, `None` if the run is unknown.
    pub fn list_failed_jobs(&self, run_id: &str) -> Result<Option<Vec<FailedJob>>, StoreError> {
        Ok(self.list_jobs(run_id)?.map(|jobs| {
            jobs.iter()
                .filter(|j| j.status == JobStatus::Failed)
                .map(FailedJob::from)
                .collect()
        }))
    }
}
