//! In-memory run store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{Job, JobError, JobOutcome, JobStatus, Run, RunStatus, RunStore, RunSummary};
use crate::store::{lock, StoreError};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<String, StoredRun>,
    jobs: HashMap<String, Job>,
}

#[derive(Debug)]
struct StoredRun {
    run: Run,
    remaining: u32,
}

/// Run store for single-process deployments and tests.
///
/// One mutex guards all runs and jobs, which makes every operation atomic
/// with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    inner: Mutex<Inner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryRunStore {
    fn create_run(&self, run: &Run, jobs: &[Job]) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner)?;
        inner.runs.insert(
            run.run_id.clone(),
            StoredRun {
                run: run.clone(),
                remaining: jobs.len() as u32,
            },
        );
        for job in jobs {
            inner.jobs.insert(job.job_id.clone(), job.clone());
        }
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(lock(&self.inner)?.runs.get(run_id).map(|r| r.run.clone()))
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(lock(&self.inner)?.jobs.get(job_id).cloned())
    }

    fn list_jobs(&self, run_id: &str) -> Result<Vec<Job>, StoreError> {
        let inner = lock(&self.inner)?;
        let Some(stored) = inner.runs.get(run_id) else {
            return Ok(Vec::new());
        };
        Ok(stored
            .run
            .job_ids
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    fn claim_job(&self, job_id: &str, max_attempts: u32) -> Result<Option<Job>, StoreError> {
        let mut inner = lock(&self.inner)?;
        match inner.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Pending && job.attempts < max_attempts => {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    fn release_job(&self, job_id: &str, error: &JobError) -> Result<bool, StoreError> {
        let mut inner = lock(&self.inner)?;
        match inner.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Pending;
                job.last_error = Some(error.clone());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn complete_job(
        &self,
        run_id: &str,
        job_id: &str,
        outcome: &JobOutcome,
    ) -> Result<Option<u32>, StoreError> {
        let mut inner = lock(&self.inner)?;
        if !inner.runs.contains_key(run_id) {
            return Ok(None);
        }

        match inner.jobs.get_mut(job_id) {
            Some(job) if job.run_id == run_id && !job.status.is_terminal() => {
                job.status = outcome.status();
                job.resolved_channel_id = outcome.channel_id().map(str::to_string);
                if let Some(error) = outcome.error() {
                    job.last_error = Some(error);
                }
                job.updated_at = Utc::now();
            }
            _ => return Ok(None),
        }

        Ok(inner.runs.get_mut(run_id).map(|stored| {
            stored.remaining = stored.remaining.saturating_sub(1);
            stored.remaining
        }))
    }

    fn finish_run(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Result<bool, StoreError> {
        let mut inner = lock(&self.inner)?;
        match inner.runs.get_mut(run_id) {
            Some(stored) if stored.run.status == RunStatus::Running => {
                stored.run.status = RunStatus::Finished;
                stored.run.finished_at = Some(finished_at);
                stored.run.summary = Some(summary.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_running_runs(&self) -> Result<Vec<String>, StoreError> {
        let inner = lock(&self.inner)?;
        let mut running: Vec<&Run> = inner
            .runs
            .values()
            .map(|stored| &stored.run)
            .filter(|run| run.status == RunStatus::Running)
            .collect();
        running.sort_by_key(|run| run.created_at);
        Ok(running.into_iter().map(|run| run.run_id.clone()).collect())
    }

    fn list_pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let inner = lock(&self.inner)?;
        let mut pending: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        Ok(pending)
    }

    fn reset_stale_jobs(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let mut inner = lock(&self.inner)?;
        let now = Utc::now();
        let mut reset = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < older_than {
                job.status = JobStatus::Pending;
                job.updated_at = now;
                reset.push(job.clone());
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ErrorKind;

    fn seeded(inputs: &[&str]) -> (MemoryRunStore, Run, Vec<Job>) {
        let store = MemoryRunStore::new();
        let mut run = Run::new(1, 1);
        let jobs: Vec<Job> = inputs.iter().map(|i| Job::new(&run.run_id, *i)).collect();
        run.job_ids = jobs.iter().map(|j| j.job_id.clone()).collect();
        store.create_run(&run, &jobs).unwrap();
        (store, run, jobs)
    }

    #[test]
    fn test_list_jobs_in_creation_order() {
        let (store, run, jobs) = seeded(&["a", "b", "c"]);
        let listed = store.list_jobs(&run.run_id).unwrap();
        let ids: Vec<&str> = listed.iter().map(|j| j.job_id.as_str()).collect();
        let expected: Vec<&str> = jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, expected);
        assert!(store.list_jobs("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_claim_only_once() {
        let (store, _, jobs) = seeded(&["a"]);
        let claimed = store.claim_job(&jobs[0].job_id, 3).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert!(store.claim_job(&jobs[0].job_id, 3).unwrap().is_none());
    }

    #[test]
    fn test_claim_stops_at_max_attempts() {
        let (store, _, jobs) = seeded(&["a"]);
        let id = &jobs[0].job_id;
        let error = JobError::new(ErrorKind::ApiTransient, "503");
        store.claim_job(id, 2).unwrap().unwrap();
        store.release_job(id, &error).unwrap();
        store.claim_job(id, 2).unwrap().unwrap();
        store.release_job(id, &error).unwrap();

        assert!(store.claim_job(id, 2).unwrap().is_none());
        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_release_then_reclaim() {
        let (store, _, jobs) = seeded(&["a"]);
        let id = &jobs[0].job_id;
        store.claim_job(id, 3).unwrap();
        let error = JobError::new(ErrorKind::ApiTransient, "503");
        assert!(store.release_job(id, &error).unwrap());
        assert!(!store.release_job(id, &error).unwrap());

        let again = store.claim_job(id, 3).unwrap().unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.last_error, Some(error));
    }

    #[test]
    fn test_complete_job_is_compare_and_set() {
        let (store, run, jobs) = seeded(&["a", "b"]);
        let done = JobOutcome::Done {
            channel_id: "UC_x".into(),
        };
        assert_eq!(
            store.complete_job(&run.run_id, &jobs[0].job_id, &done).unwrap(),
            Some(1)
        );
        assert_eq!(
            store.complete_job(&run.run_id, &jobs[0].job_id, &done).unwrap(),
            None
        );
        assert_eq!(
            store.complete_job("other-run", &jobs[1].job_id, &done).unwrap(),
            None
        );
        assert_eq!(
            store.complete_job(&run.run_id, &jobs[1].job_id, &done).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_finish_run_once() {
        let (store, run, _) = seeded(&[]);
        let summary = RunSummary {
            total: 0,
            status_counts: Default::default(),
            duration_secs: 0.0,
        };
        assert!(store.finish_run(&run.run_id, Utc::now(), &summary).unwrap());
        assert!(!store.finish_run(&run.run_id, Utc::now(), &summary).unwrap());
        assert_eq!(
            store.get_run(&run.run_id).unwrap().unwrap().status,
            RunStatus::Finished
        );
    }

    #[test]
    fn test_list_running_runs() {
        let (store, run, _) = seeded(&["a"]);
        let finished = Run::new(2, 2);
        store.create_run(&finished, &[]).unwrap();
        let summary = RunSummary {
            total: 0,
            status_counts: Default::default(),
            duration_secs: 0.0,
        };
        store
            .finish_run(&finished.run_id, Utc::now(), &summary)
            .unwrap();

        assert_eq!(store.list_running_runs().unwrap(), vec![run.run_id]);
    }

    #[test]
    fn test_list_pending_jobs() {
        let (store, _, jobs) = seeded(&["a", "b"]);
        store.claim_job(&jobs[0].job_id, 3).unwrap();
        let pending = store.list_pending_jobs().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, jobs[1].job_id);
    }

    #[test]
    fn test_reset_stale_jobs() {
        let (store, _, jobs) = seeded(&["a", "b"]);
        store.claim_job(&jobs[0].job_id, 3).unwrap();

        let none = store
            .reset_stale_jobs(Utc::now() - chrono::Duration::seconds(60))
            .unwrap();
        assert!(none.is_empty());

        let reset = store
            .reset_stale_jobs(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].job_id, jobs[0].job_id);
        assert_eq!(reset[0].status, JobStatus::Pending);
    }
}
