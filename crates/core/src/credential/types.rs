//! Credential data types and the storage trait.

use std::fmt;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::StoreError;

/// Rotation status of a credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialStatus {
    /// Eligible for `acquire()`.
    Active,
    /// Hit its quota; out of rotation until reset or restart.
    QuotaExhausted,
    /// Too many consecutive transient failures.
    Disabled,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "ACTIVE",
            CredentialStatus::QuotaExhausted => "QUOTA_EXHAUSTED",
            CredentialStatus::Disabled => "DISABLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(CredentialStatus::Active),
            "QUOTA_EXHAUSTED" => Some(CredentialStatus::QuotaExhausted),
            "DISABLED" => Some(CredentialStatus::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, persisted state of one credential. Never contains the key itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialState {
    pub fingerprint: String,
    pub status: CredentialStatus,
    pub consecutive_failures: u32,
}

/// A credential handed out by the pool for one API call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    fingerprint: String,
    key: String,
}

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            fingerprint: fingerprint(&key),
            key,
        }
    }

    /// The secret API key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stable identifier safe to log and persist.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Short SHA-256 fingerprint of an API key.
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)[..12].to_string()
}

/// UTC offset of the YouTube quota day, which resets at midnight Pacific
/// time. Standard time is used all year, so during daylight saving the
/// reset is seen an hour late.
const QUOTA_DAY_UTC_OFFSET_HOURS: i64 = -8;

/// Start of the quota day containing `now`.
pub fn quota_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = Duration::hours(QUOTA_DAY_UTC_OFFSET_HOURS);
    let local = now + offset;
    local.date_naive().and_time(NaiveTime::MIN).and_utc() - offset
}

/// Errors from the credential pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no active API credential left in the pool")]
    Exhausted,

    #[error("credential pool has no keys configured")]
    Empty,

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

/// Storage for credential state shared by every worker.
///
/// Every mutating method must be atomic per credential: two workers reporting
/// on the same credential at once must not lose an update.
pub trait CredentialStore: Send + Sync {
    /// Register the given credentials. New entries start ACTIVE with no
    /// failures. An existing entry is re-activated only if it last changed
    /// before `quota_day_start`; otherwise its state is kept.
    fn register(
        &self,
        fingerprints: &[String],
        quota_day_start: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Current state of every registered credential.
    fn list(&self) -> Result<Vec<CredentialState>, StoreError>;

    /// Atomically read and advance the shared round-robin cursor.
    fn next_cursor(&self) -> Result<u64, StoreError>;

    /// Reset the consecutive failure counter.
    fn record_success(&self, fingerprint: &str) -> Result<(), StoreError>;

    /// Move the credential to QUOTA_EXHAUSTED.
    /// Returns `true` if this call changed its status.
    fn mark_quota_exhausted(&self, fingerprint: &str) -> Result<bool, StoreError>;

    /// Increment the failure counter; an ACTIVE credential whose counter
    /// reaches `threshold` becomes DISABLED. Returns the updated state.
    fn record_transient_failure(
        &self,
        fingerprint: &str,
        threshold: u32,
    ) -> Result<Option<CredentialState>, StoreError>;
}
