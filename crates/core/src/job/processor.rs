//! Job processor.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{JobExecution, JobProcessorError};
use crate::config::JobsConfig;
use crate::dispatch::{Dispatcher, JobTask};
use crate::metrics::{DUPLICATE_DELIVERIES, JOB_REQUEUES};
use crate::resolver::{ChannelResolver, ResolutionOutcome};
use crate::retry::Backoff;
use crate::run::{ErrorKind, Job, JobError, JobOutcome, JobStatus, RunAggregator};
use crate::store::StoreError;

/// Executes delivered job tasks.
///
/// Every execution starts with a PENDING -> PROCESSING claim, so a task
/// delivered twice resolves the job once. Retriable failures release the
/// job and re-dispatch it with backoff until `max_attempts` is reached.
pub struct JobProcessor {
    aggregator: Arc<RunAggregator>,
    resolver: Arc<ChannelResolver>,
    dispatcher: Arc<dyn Dispatcher>,
    max_attempts: u32,
    requeue_backoff: Backoff,
}

impl JobProcessor {
    pub fn new(
        aggregator: Arc<RunAggregator>,
        resolver: Arc<ChannelResolver>,
        dispatcher: Arc<dyn Dispatcher>,
        config: &JobsConfig,
        requeue_backoff: Backoff,
    ) -> Self {
        Self {
            aggregator,
            resolver,
            dispatcher,
            max_attempts: config.max_attempts_per_job.max(1),
            requeue_backoff,
        }
    }

    pub async fn execute(&self, task: &JobTask) -> Result<JobExecution, JobProcessorError> {
        let store = self.aggregator.store();

        let Some(job) = store.claim_job(&task.job_id, self.max_attempts)? else {
            return self.handle_unclaimed(task).await;
        };

        let owner_id = match store.get_run(&task.run_id) {
            Ok(run) => run.map(|run| run.owner_id),
            Err(e) => {
                warn!(run_id = %task.run_id, "Could not load run, skipping owner throttle: {}", e);
                None
            }
        };
        let result = match owner_id {
            Some(owner_id) => {
                self.resolver
                    .resolve_for_owner(&job.raw_input, owner_id)
                    .await
            }
            None => self.resolver.resolve(&job.raw_input).await,
        };

        let outcome = match result {
            Ok(ResolutionOutcome::Resolved(channel_id)) => JobOutcome::Done { channel_id },
            Ok(ResolutionOutcome::NeedsSearch { reason }) => JobOutcome::NeedsSearch { reason },
            Err(e) if e.kind.is_retriable() && job.attempts < self.max_attempts => {
                let error = JobError::new(e.kind, e.message);
                if !store.release_job(&job.job_id, &error)? {
                    warn!(job_id = %job.job_id, "Job left PROCESSING before release");
                    return Ok(JobExecution::Skipped);
                }
                JOB_REQUEUES.inc();

                let delay = self.requeue_backoff.delay(job.attempts);
                info!(
                    run_id = %task.run_id,
                    job_id = %job.job_id,
                    attempts = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    kind = %error.kind,
                    "Requeueing job"
                );
                self.dispatcher.dispatch_after(task.clone(), delay).await?;
                return Ok(JobExecution::Requeued {
                    attempts: job.attempts,
                });
            }
            Err(e) => {
                warn!(
                    run_id = %task.run_id,
                    job_id = %job.job_id,
                    attempts = job.attempts,
                    "Job failed: {}", e
                );
                JobOutcome::Failed(JobError::new(e.kind, e.message))
            }
        };

        self.record(task, Some(&job), &outcome).await
    }

    /// A task whose job could not be claimed: either a duplicate delivery,
    /// or a PENDING job with no attempts left (its last worker died), which
    /// fails without another lookup.
    async fn handle_unclaimed(&self, task: &JobTask) -> Result<JobExecution, JobProcessorError> {
        let job = self.aggregator.store().get_job(&task.job_id)?;
        match job {
            Some(job) if job.status == JobStatus::Pending && job.attempts >= self.max_attempts => {
                let kind = job
                    .last_error
                    .as_ref()
                    .map_or(ErrorKind::ApiTransient, |e| e.kind);
                warn!(
                    run_id = %task.run_id,
                    job_id = %job.job_id,
                    attempts = job.attempts,
                    "Job has no attempts left"
                );
                let outcome = JobOutcome::Failed(JobError::new(
                    kind,
                    format!("gave up after {} attempts", job.attempts),
                ));
                self.record(task, None, &outcome).await
            }
            _ => {
                DUPLICATE_DELIVERIES.inc();
                debug!(run_id = %task.run_id, job_id = %task.job_id, "Job not pending, skipping");
                Ok(JobExecution::Skipped)
            }
        }
    }

    /// Write the terminal outcome. A claimed job whose write fails is put
    /// back to PENDING and re-dispatched.
    async fn record(
        &self,
        task: &JobTask,
        claimed: Option<&Job>,
        outcome: &JobOutcome,
    ) -> Result<JobExecution, JobProcessorError> {
        let status = outcome.status();
        match self
            .aggregator
            .record_job_terminal(&task.run_id, &task.job_id, outcome)
        {
            Ok(true) => Ok(JobExecution::Completed(status)),
            Ok(false) => {
                DUPLICATE_DELIVERIES.inc();
                Ok(JobExecution::Skipped)
            }
            Err(e) => {
                if let Some(job) = claimed {
                    self.requeue_after_store_error(task, job, &e).await;
                }
                Err(e.into())
            }
        }
    }

    async fn requeue_after_store_error(&self, task: &JobTask, job: &Job, error: &StoreError) {
        let job_error = JobError::new(ErrorKind::StoreUnavailable, error.to_string());
        match self.aggregator.store().release_job(&job.job_id, &job_error) {
            Ok(true) => {
                JOB_REQUEUES.inc();
                let delay = self.requeue_backoff.delay(job.attempts);
                warn!(
                    job_id = %job.job_id,
                    delay_ms = delay.as_millis() as u64,
                    "Terminal write failed, requeueing job"
                );
                if let Err(e) = self.dispatcher.dispatch_after(task.clone(), delay).await {
                    warn!(job_id = %job.job_id, "Failed to requeue job: {}", e);
                }
            }
            // The terminal write landed; only finalization failed.
            Ok(false) => {}
            Err(e) => {
                warn!(job_id = %job.job_id, "Job stays PROCESSING until stale recovery: {}", e)
            }
        }
    }
}
