//! Channel resolver.
//!
//! Strategies, first success wins:
//! 1. canonical channel ID in the input: accepted without an API call
//! 2. `@handle`, legacy username or channel URL: one API lookup
//! 3. lookup not conclusive (not found, ambiguous) or free text: NEEDS_SEARCH
//!
//! Transient API failures are retried with exponential backoff, quota errors
//! rotate to another credential right away. Every attempt reports its result
//! to the credential pool.

mod parse;
mod throttle;

pub use parse::{dedupe_key, find_channel_id, parse_reference, ChannelReference};
pub use throttle::OwnerThrottle;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::credential::{Credential, CredentialPool, PoolError};
use crate::metrics::{API_LOOKUPS, API_LOOKUP_DURATION, RESOLUTIONS};
use crate::retry::Backoff;
use crate::run::ErrorKind;
use crate::youtube::{ApiError, ChannelApi, ChannelLookup, ChannelQuery};

/// Default bound on a single API call.
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Resolved(String),
    /// Needs out-of-band disambiguation.
    NeedsSearch { reason: String },
}

/// Failed resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ResolutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ResolutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }
}

impl From<PoolError> for ResolutionError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Exhausted | PoolError::Empty => {
                ResolutionError::new(ErrorKind::PoolExhausted, e.to_string())
            }
            PoolError::Store(_) => ResolutionError::new(ErrorKind::ApiTransient, e.to_string()),
        }
    }
}

/// Resolves raw channel references into canonical channel IDs.
pub struct ChannelResolver {
    api: Arc<dyn ChannelApi>,
    pool: Arc<CredentialPool>,
    throttle: OwnerThrottle,
    backoff: Backoff,
    max_api_retries: u32,
    quota_rotations: u32,
    attempt_timeout: Duration,
}

impl ChannelResolver {
    pub fn new(
        api: Arc<dyn ChannelApi>,
        pool: Arc<CredentialPool>,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            api,
            pool,
            throttle: OwnerThrottle::new(config.owner_requests_per_second),
            backoff: Backoff::new(config.backoff_base_ms, config.backoff_max_ms),
            max_api_retries: config.max_api_retries,
            quota_rotations: config.quota_rotations,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Bound each API call to `timeout`; an expired call counts as transient.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Resolve one reference without owner throttling.
    pub async fn resolve(&self, raw_input: &str) -> Result<ResolutionOutcome, ResolutionError> {
        self.resolve_inner(raw_input, None).await
    }

    /// Resolve one reference, throttling API calls per owner.
    pub async fn resolve_for_owner(
        &self,
        raw_input: &str,
        owner_id: i64,
    ) -> Result<ResolutionOutcome, ResolutionError> {
        self.resolve_inner(raw_input, Some(owner_id)).await
    }

    async fn resolve_inner(
        &self,
        raw_input: &str,
        owner_id: Option<i64>,
    ) -> Result<ResolutionOutcome, ResolutionError> {
        let reference = match parse_reference(raw_input) {
            Ok(reference) => reference,
            Err(e) => {
                RESOLUTIONS.with_label_values(&["error"]).inc();
                return Err(e);
            }
        };

        let result = match reference {
            ChannelReference::ChannelId(id) => {
                RESOLUTIONS.with_label_values(&["direct"]).inc();
                return Ok(ResolutionOutcome::Resolved(id));
            }
            ChannelReference::Search(text) => Ok(ResolutionOutcome::NeedsSearch {
                reason: format!("'{}' is not a handle or channel URL", text),
            }),
            ChannelReference::Lookup(query) => self.lookup(&query, owner_id).await,
        };

        let label = match &result {
            Ok(ResolutionOutcome::Resolved(_)) => "lookup",
            Ok(ResolutionOutcome::NeedsSearch { .. }) => "needs_search",
            Err(_) => "error",
        };
        RESOLUTIONS.with_label_values(&[label]).inc();
        result
    }

    async fn lookup(
        &self,
        query: &ChannelQuery,
        owner_id: Option<i64>,
    ) -> Result<ResolutionOutcome, ResolutionError> {
        let mut transient_failures = 0u32;
        let mut quota_errors = 0u32;

        loop {
            if let Some(owner_id) = owner_id {
                self.throttle.acquire(owner_id).await;
            }

            let credential = self.pool.acquire()?;
            debug!(
                query = %query,
                credential = credential.fingerprint(),
                attempt = transient_failures + quota_errors + 1,
                "Looking up channel"
            );

            match self.call_api(&credential, query).await {
                Ok(lookup) => {
                    self.pool.report_success(&credential);
                    return Ok(match lookup {
                        ChannelLookup::Found(id) => {
                            info!(query = %query, channel_id = %id, "Resolved channel");
                            ResolutionOutcome::Resolved(id)
                        }
                        ChannelLookup::NotFound => ResolutionOutcome::NeedsSearch {
                            reason: format!("no channel found for {}", query),
                        },
                        ChannelLookup::Ambiguous(ids) => ResolutionOutcome::NeedsSearch {
                            reason: format!("{} channels match {}", ids.len(), query),
                        },
                    });
                }
                Err(ApiError::Quota { reason }) => {
                    self.pool.report_quota_error(&credential);
                    quota_errors += 1;
                    if quota_errors > self.quota_rotations {
                        return Err(ResolutionError::new(
                            ErrorKind::ApiQuota,
                            format!("quota exceeded on {} credentials ({})", quota_errors, reason),
                        ));
                    }
                    warn!(
                        query = %query,
                        credential = credential.fingerprint(),
                        "Quota exceeded, rotating credential"
                    );
                }
                Err(e) => {
                    self.pool.report_transient_error(&credential);
                    transient_failures += 1;
                    if transient_failures > self.max_api_retries {
                        return Err(ResolutionError::new(ErrorKind::ApiTransient, e.to_string()));
                    }
                    let delay = self.backoff.delay(transient_failures);
                    warn!(
                        query = %query,
                        credential = credential.fingerprint(),
                        attempt = transient_failures,
                        delay_ms = delay.as_millis() as u64,
                        "API call failed, retrying: {}", e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn call_api(
        &self,
        credential: &Credential,
        query: &ChannelQuery,
    ) -> Result<ChannelLookup, ApiError> {
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.attempt_timeout,
            self.api.lookup(credential.key(), query),
        )
        .await
        .unwrap_or(Err(ApiError::Timeout));

        API_LOOKUP_DURATION
            .with_label_values(&[self.api.name()])
            .observe(start.elapsed().as_secs_f64());
        let label = match &result {
            Ok(ChannelLookup::Found(_)) => "found",
            Ok(ChannelLookup::NotFound) => "not_found",
            Ok(ChannelLookup::Ambiguous(_)) => "ambiguous",
            Err(ApiError::Quota { .. }) => "quota",
            Err(ApiError::Transient(_)) => "transient",
            Err(ApiError::Timeout) => "timeout",
            Err(ApiError::Rejected { .. }) => "rejected",
        };
        API_LOOKUPS.with_label_values(&[label]).inc();

        result
    }
}
