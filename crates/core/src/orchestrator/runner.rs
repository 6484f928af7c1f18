//! Run orchestrator implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, StoreBackend};
use crate::credential::{
    CredentialPool, CredentialState, CredentialStore, MemoryCredentialStore, SqliteCredentialStore,
};
use crate::dispatch::{local_queue, Dispatcher, JobTask, WorkerPool};
use crate::job::JobProcessor;
use crate::resolver::ChannelResolver;
use crate::retry::Backoff;
use crate::run::{
    FailedJob, Job, MemoryRunStore, RunAggregator, RunStatusReport, RunStore, SqliteRunStore,
};
use crate::youtube::ChannelApi;

use super::types::{OrchestratorError, RecoveryReport, StartRunResponse};

/// The run orchestrator: creates runs, feeds jobs to the worker pool and
/// answers status queries.
pub struct RunOrchestrator {
    aggregator: Arc<RunAggregator>,
    pool: Arc<CredentialPool>,
    dispatcher: Arc<dyn Dispatcher>,
    workers: WorkerPool,
    stale_after: chrono::Duration,
    sweep_interval: Duration,

    // Runtime state
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RunOrchestrator {
    /// Build an orchestrator with the stores selected by `config.database`.
    pub fn from_config(
        config: &Config,
        api: Arc<dyn ChannelApi>,
    ) -> Result<Self, OrchestratorError> {
        let (run_store, credential_store): (Arc<dyn RunStore>, Arc<dyn CredentialStore>) =
            match config.database.backend {
                StoreBackend::Memory => (
                    Arc::new(MemoryRunStore::new()),
                    Arc::new(MemoryCredentialStore::new()),
                ),
                StoreBackend::Sqlite => (
                    Arc::new(SqliteRunStore::new(&config.database.path)?),
                    Arc::new(SqliteCredentialStore::new(&config.database.path)?),
                ),
            };
        Self::with_stores(config, api, run_store, credential_store)
    }

    /// Build an orchestrator over explicit stores.
    pub fn with_stores(
        config: &Config,
        api: Arc<dyn ChannelApi>,
        run_store: Arc<dyn RunStore>,
        credential_store: Arc<dyn CredentialStore>,
    ) -> Result<Self, OrchestratorError> {
        let pool = Arc::new(CredentialPool::new(
            &config.youtube.api_credentials,
            credential_store,
            config.credentials.consecutive_failure_disable_threshold,
        )?);
        let resolver = ChannelResolver::new(api, Arc::clone(&pool), &config.resolver)
            .with_attempt_timeout(Duration::from_secs(u64::from(config.youtube.timeout_secs)));

        let aggregator = Arc::new(RunAggregator::new(run_store));
        let (dispatcher, receiver) = local_queue();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(dispatcher);

        let processor = Arc::new(JobProcessor::new(
            Arc::clone(&aggregator),
            Arc::new(resolver),
            Arc::clone(&dispatcher),
            &config.jobs,
            Backoff::new(config.resolver.backoff_base_ms, config.resolver.backoff_max_ms),
        ));
        let workers = WorkerPool::new(config.jobs.workers, processor, receiver);
        let stale_secs = config.jobs.stale_after_secs.min(u64::from(u32::MAX)) as i64;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            aggregator,
            pool,
            dispatcher,
            workers,
            stale_after: chrono::Duration::seconds(stale_secs),
            sweep_interval: Duration::from_secs(config.jobs.finalize_sweep_secs.max(1)),
            running: AtomicBool::new(false),
            shutdown_tx,
            sweep_handle: Mutex::new(None),
        })
    }

    /// Recover interrupted jobs and start the workers.
    pub async fn start(&self) -> Result<RecoveryReport, OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return Ok(RecoveryReport::default());
        }

        info!("Starting run orchestrator");

        let report = match self.recover().await {
            Ok(report) => report,
            Err(e) => {
                error!("Failed to recover jobs: {}", e);
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.workers.start().await;
        *self.sweep_handle.lock().await = Some(self.spawn_finalize_sweep());

        info!(
            stale_reset = report.stale_reset,
            redispatched = report.redispatched,
            finalized = report.finalized,
            "Run orchestrator started"
        );
        Ok(report)
    }

    /// Stop the workers gracefully. Jobs in flight finish first.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping run orchestrator");
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Finalize sweep ended abnormally: {}", e);
            }
        }
        self.workers.stop().await;
        info!("Run orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Periodically finalize runs whose last terminal write could not
    /// finalize them.
    fn spawn_finalize_sweep(&self) -> JoinHandle<()> {
        let aggregator = Arc::clone(&self.aggregator);
        let period = self.sweep_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; recovery has just swept.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => match aggregator.finalize_stalled_runs() {
                        Ok(0) => {}
                        Ok(finalized) => info!(finalized, "Finalize sweep closed stalled runs"),
                        Err(e) => warn!("Finalize sweep failed: {}", e),
                    },
                }
            }
            debug!("Finalize sweep stopped");
        })
    }

    /// Finalize runs left RUNNING with every job terminal, reset stale
    /// PROCESSING jobs and re-dispatch everything PENDING.
    async fn recover(&self) -> Result<RecoveryReport, OrchestratorError> {
        let store = self.aggregator.store();

        let finalized = self.aggregator.finalize_stalled_runs()?;

        let stale = store.reset_stale_jobs(Utc::now() - self.stale_after)?;
        for job in &stale {
            warn!(
                run_id = %job.run_id,
                job_id = %job.job_id,
                attempts = job.attempts,
                "Recovered stale job"
            );
        }

        let pending = store.list_pending_jobs()?;
        for job in &pending {
            self.dispatcher
                .dispatch(JobTask::new(&job.run_id, &job.job_id))
                .await?;
        }
        if !pending.is_empty() {
            info!("Re-dispatched {} pending jobs", pending.len());
        }

        Ok(RecoveryReport {
            stale_reset: stale.len(),
            redispatched: pending.len(),
            finalized,
        })
    }

    /// Create a run and dispatch one job per distinct input.
    pub async fn start_run(
        &self,
        analysis_id: i64,
        owner_id: i64,
        channel_inputs: &[String],
    ) -> Result<StartRunResponse, OrchestratorError> {
        let (run, jobs) = self
            .aggregator
            .create_run(analysis_id, owner_id, channel_inputs)?;

        for job in &jobs {
            self.dispatcher
                .dispatch(JobTask::new(&run.run_id, &job.job_id))
                .await?;
        }

        Ok(StartRunResponse {
            run_id: run.run_id,
            jobs_created: jobs.len(),
        })
    }

    pub fn get_run_status(&self, run_id: &str) -> Result<RunStatusReport, OrchestratorError> {
        self.aggregator
            .get_run_status(run_id)?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))
    }

    /// Finalize a run if all its jobs are terminal.
    ///
    /// Idempotent: returns `true` only for the call that finalized the run.
    pub fn finalize_run(&self, run_id: &str) -> Result<bool, OrchestratorError> {
        if self.aggregator.store().get_run(run_id)?.is_none() {
            return Err(OrchestratorError::RunNotFound(run_id.to_string()));
        }
        Ok(self.aggregator.finalize_run(run_id)?)
    }

    pub fn list_jobs(&self, run_id: &str) -> Result<Vec<Job>, OrchestratorError> {
        self.aggregator
            .list_jobs(run_id)?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))
    }

    pub fn list_failed_jobs(&self, run_id: &str) -> Result<Vec<FailedJob>, OrchestratorError> {
        self.aggregator
            .list_failed_jobs(run_id)?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))
    }

    pub fn credential_status(&self) -> Result<Vec<CredentialState>, OrchestratorError> {
        Ok(self.pool.status()?)
    }
}
