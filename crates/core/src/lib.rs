pub mod config;
pub mod credential;
pub mod dispatch;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod run;
pub mod store;
pub mod testing;
pub mod youtube;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    StoreBackend,
};
pub use credential::{
    CredentialPool, CredentialState, CredentialStatus, CredentialStore, MemoryCredentialStore,
    PoolError, SqliteCredentialStore,
};
pub use dispatch::{DispatchError, Dispatcher, JobTask, LocalDispatcher, WorkerPool};
pub use job::{JobExecution, JobProcessor, JobProcessorError};
pub use orchestrator::{OrchestratorError, RecoveryReport, RunOrchestrator, StartRunResponse};
pub use resolver::{ChannelReference, ChannelResolver, ResolutionError, ResolutionOutcome};
pub use run::{
    ErrorKind, FailedJob, Job, JobError, JobOutcome, JobStatus, MemoryRunStore, Run,
    RunAggregator, RunStatus, RunStatusReport, RunStore, RunSummary, SqliteRunStore,
};
pub use store::StoreError;
pub use youtube::{ApiError, ChannelApi, ChannelLookup, ChannelQuery, YoutubeClient};
