//! Run and job data types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(RunStatus::Running),
            "FINISHED" => Some(RunStatus::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a job.
///
/// ```text
/// PENDING -> PROCESSING -> DONE | FAILED | NEEDS_SEARCH
///    ^           |
///    +-----------+  (retriable failure)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
    NeedsSearch,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::NeedsSearch,
    ];

    /// Terminal statuses are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::NeedsSearch
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::NeedsSearch => "NEEDS_SEARCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Unparseable reference. Never retried.
    InvalidInput,
    /// Network failure, 5xx, timeout or rejected request.
    ApiTransient,
    /// Quota errors outlasted the allowed credential rotations.
    ApiQuota,
    /// Lookup found nothing or several channels. Not a failure.
    AmbiguousOrNotFound,
    /// No ACTIVE credential left in the pool.
    PoolExhausted,
    /// The state store failed after the job was claimed.
    StoreUnavailable,
}

impl ErrorKind {
    /// Whether a job failing with this kind may be attempted again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ApiTransient
                | ErrorKind::ApiQuota
                | ErrorKind::PoolExhausted
                | ErrorKind::StoreUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::ApiTransient => "API_TRANSIENT",
            ErrorKind::ApiQuota => "API_QUOTA",
            ErrorKind::AmbiguousOrNotFound => "AMBIGUOUS_OR_NOT_FOUND",
            ErrorKind::PoolExhausted => "POOL_EXHAUSTED",
            ErrorKind::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INVALID_INPUT" => Some(ErrorKind::InvalidInput),
            "API_TRANSIENT" => Some(ErrorKind::ApiTransient),
            "API_QUOTA" => Some(ErrorKind::ApiQuota),
            "AMBIGUOUS_OR_NOT_FOUND" => Some(ErrorKind::AmbiguousOrNotFound),
            "POOL_EXHAUSTED" => Some(ErrorKind::PoolExhausted),
            "STORE_UNAVAILABLE" => Some(ErrorKind::StoreUnavailable),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent failure recorded on a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Counts of jobs per status.
pub type StatusCounts = BTreeMap<JobStatus, u32>;

/// Computed once when a run is finalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub total: u32,
    pub status_counts: StatusCounts,
    pub duration_secs: f64,
}

/// A batch of channel resolutions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    pub analysis_id: i64,
    pub owner_id: i64,
    pub status: RunStatus,
    /// One job per distinct input, in first-seen order.
    pub job_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl Run {
    pub fn new(analysis_id: i64, owner_id: i64) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            analysis_id,
            owner_id,
            status: RunStatus::Running,
            job_ids: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
            summary: None,
        }
    }
}

/// Resolution of one channel reference within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub run_id: String,
    pub raw_input: String,
    pub status: JobStatus,
    /// Set only when `status == DONE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_channel_id: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(run_id: &str, raw_input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            raw_input: raw_input.into(),
            status: JobStatus::Pending,
            resolved_channel_id: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Terminal result written for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done { channel_id: String },
    /// Lookup was not conclusive; recorded as `AMBIGUOUS_OR_NOT_FOUND`.
    NeedsSearch { reason: String },
    Failed(JobError),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Done { .. } => JobStatus::Done,
            JobOutcome::NeedsSearch { .. } => JobStatus::NeedsSearch,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }

    /// Error to record on the job, if any.
    pub fn error(&self) -> Option<JobError> {
        match self {
            JobOutcome::Done { .. } => None,
            JobOutcome::NeedsSearch { reason } => {
                Some(JobError::new(ErrorKind::AmbiguousOrNotFound, reason.clone()))
            }
            JobOutcome::Failed(e) => Some(e.clone()),
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            JobOutcome::Done { channel_id } => Some(channel_id),
            _ => None,
        }
    }
}

/// Snapshot returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStatusReport {
    pub run_id: String,
    pub run_status: RunStatus,
    /// Terminal jobs / total jobs, in `[0, 1]`.
    pub progress: f64,
    pub total_jobs: u32,
    pub status_counts: StatusCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

/// Diagnostics for a FAILED job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedJob {
    pub job_id: String,
    pub raw_input: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl From<&Job> for FailedJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            raw_input: job.raw_input.clone(),
            attempts: job.attempts,
            error: job.last_error.clone(),
        }
    }
}

/// Count jobs per status.
pub fn count_statuses<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> StatusCounts {
    let mut counts = StatusCounts::new();
    for job in jobs {
        *counts.entry(job.status).or_insert(0) += 1;
    }
    counts
}
