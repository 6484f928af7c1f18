//! In-memory credential store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{CredentialState, CredentialStatus, CredentialStore};
use crate::store::{lock, StoreError};

#[derive(Debug, Default)]
struct Inner {
    credentials: Vec<CredentialState>,
    /// Last change per fingerprint.
    updated_at: HashMap<String, DateTime<Utc>>,
    cursor: u64,
}

impl Inner {
    fn find_mut(&mut self, fingerprint: &str) -> Option<&mut CredentialState> {
        self.credentials
            .iter_mut()
            .find(|c| c.fingerprint == fingerprint)
    }

    fn touch(&mut self, fingerprint: &str) {
        self.updated_at.insert(fingerprint.to_string(), Utc::now());
    }
}

/// Credential store for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Inner>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn register(
        &self,
        fingerprints: &[String],
        quota_day_start: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner)?;
        for fp in fingerprints {
            let stale = inner
                .updated_at
                .get(fp)
                .is_none_or(|changed| *changed < quota_day_start);
            if !stale {
                continue;
            }

            match inner.find_mut(fp) {
                Some(existing) => {
                    existing.status = CredentialStatus::Active;
                    existing.consecutive_failures = 0;
                }
                None => inner.credentials.push(CredentialState {
                    fingerprint: fp.clone(),
                    status: CredentialStatus::Active,
                    consecutive_failures: 0,
                }),
            }
            inner.touch(fp);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<CredentialState>, StoreError> {
        Ok(lock(&self.inner)?.credentials.clone())
    }

    fn next_cursor(&self) -> Result<u64, StoreError> {
        let mut inner = lock(&self.inner)?;
        let current = inner.cursor;
        inner.cursor = inner.cursor.wrapping_add(1);
        Ok(current)
    }

    fn record_success(&self, fingerprint: &str) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner)?;
        if let Some(state) = inner.find_mut(fingerprint) {
            if state.consecutive_failures != 0 {
                state.consecutive_failures = 0;
                inner.touch(fingerprint);
            }
        }
        Ok(())
    }

    fn mark_quota_exhausted(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let mut inner = lock(&self.inner)?;
        match inner.find_mut(fingerprint) {
            Some(state) if state.status != CredentialStatus::QuotaExhausted => {
                state.status = CredentialStatus::QuotaExhausted;
                inner.touch(fingerprint);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn record_transient_failure(
        &self,
        fingerprint: &str,
        threshold: u32,
    ) -> Result<Option<CredentialState>, StoreError> {
        let mut inner = lock(&self.inner)?;
        let Some(state) = inner.find_mut(fingerprint) else {
            return Ok(None);
        };
        state.consecutive_failures += 1;
        if state.status == CredentialStatus::Active && state.consecutive_failures >= threshold {
            state.status = CredentialStatus::Disabled;
        }
        let state = state.clone();
        inner.touch(fingerprint);
        Ok(Some(state))
    }
}
