//! Round-robin credential pool.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    quota_day_start, Credential, CredentialState, CredentialStatus, CredentialStore, PoolError,
};
use crate::metrics::CREDENTIAL_TRANSITIONS;

/// Hands out API credentials and tracks their health.
///
/// The pool itself only holds the keys. Status, failure counters and the
/// rotation cursor live in the [`CredentialStore`], so every worker sharing
/// that store sees the same rotation.
pub struct CredentialPool {
    slots: Vec<Credential>,
    store: Arc<dyn CredentialStore>,
    disable_threshold: u32,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("slots", &self.slots)
            .field("disable_threshold", &self.disable_threshold)
            .finish()
    }
}

impl CredentialPool {
    /// Build a pool from API keys. Duplicate keys collapse into one slot.
    ///
    /// Keys already in the store keep their state unless it dates from an
    /// earlier quota day, so a process joining a shared store does not
    /// re-enable keys that are exhausted today.
    pub fn new(
        keys: &[String],
        store: Arc<dyn CredentialStore>,
        disable_threshold: u32,
    ) -> Result<Self, PoolError> {
        let mut slots: Vec<Credential> = Vec::with_capacity(keys.len());
        for key in keys {
            let credential = Credential::new(key.trim());
            if !credential.key().is_empty()
                && !slots
                    .iter()
                    .any(|c| c.fingerprint() == credential.fingerprint())
            {
                slots.push(credential);
            }
        }

        if slots.is_empty() {
            return Err(PoolError::Empty);
        }

        let fingerprints: Vec<String> =
            slots.iter().map(|c| c.fingerprint().to_string()).collect();
        store.register(&fingerprints, quota_day_start(Utc::now()))?;

        info!(credentials = slots.len(), "Credential pool initialized");

        Ok(Self {
            slots,
            store,
            disable_threshold: disable_threshold.max(1),
        })
    }

    /// Number of credentials in the pool, whatever their status.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Return the next ACTIVE credential in round-robin order.
    pub fn acquire(&self) -> Result<Credential, PoolError> {
        let cursor = self.store.next_cursor()?;
        let statuses: HashMap<String, CredentialStatus> = self
            .store
            .list()?
            .into_iter()
            .map(|s| (s.fingerprint, s.status))
            .collect();

        let n = self.slots.len();
        let start = (cursor % n as u64) as usize;
        for offset in 0..n {
            let credential = &self.slots[(start + offset) % n];
            if statuses.get(credential.fingerprint()) == Some(&CredentialStatus::Active) {
                debug!(credential = credential.fingerprint(), "Acquired credential");
                return Ok(credential.clone());
            }
        }

        warn!("All API credentials are exhausted or disabled");
        Err(PoolError::Exhausted)
    }

    /// The last call with this credential succeeded.
    pub fn report_success(&self, credential: &Credential) {
        if let Err(e) = self.store.record_success(credential.fingerprint()) {
            warn!(
                credential = credential.fingerprint(),
                "Failed to record credential success: {}", e
            );
        }
    }

    /// The last call with this credential hit its quota.
    pub fn report_quota_error(&self, credential: &Credential) {
        match self.store.mark_quota_exhausted(credential.fingerprint()) {
            Ok(true) => {
                CREDENTIAL_TRANSITIONS
                    .with_label_values(&[CredentialStatus::QuotaExhausted.as_str()])
                    .inc();
                warn!(
                    credential = credential.fingerprint(),
                    "Credential quota exhausted, removed from rotation"
                );
            }
            Ok(false) => {}
            Err(e) => warn!(
                credential = credential.fingerprint(),
                "Failed to record quota error: {}", e
            ),
        }
    }

    /// The last call with this credential failed transiently.
    pub fn report_transient_error(&self, credential: &Credential) {
        match self
            .store
            .record_transient_failure(credential.fingerprint(), self.disable_threshold)
        {
            Ok(Some(state))
                if state.status == CredentialStatus::Disabled
                    && state.consecutive_failures == self.disable_threshold =>
            {
                CREDENTIAL_TRANSITIONS
                    .with_label_values(&[CredentialStatus::Disabled.as_str()])
                    .inc();
                warn!(
                    credential = credential.fingerprint(),
                    failures = state.consecutive_failures,
                    "Credential disabled after consecutive failures"
                );
            }
            Ok(Some(state)) => debug!(
                credential = credential.fingerprint(),
                failures = state.consecutive_failures,
                "Recorded transient credential failure"
            ),
            Ok(None) => {}
            Err(e) => warn!(
                credential = credential.fingerprint(),
                "Failed to record transient error: {}", e
            ),
        }
    }

    /// State of every credential in this pool, in slot order.
    pub fn status(&self) -> Result<Vec<CredentialState>, PoolError> {
        let mut by_fp: HashMap<String, CredentialState> = self
            .store
            .list()?
            .into_iter()
            .map(|s| (s.fingerprint.clone(), s))
            .collect();

        Ok(self
            .slots
            .iter()
            .filter_map(|c| by_fp.remove(c.fingerprint()))
            .collect())
    }
}
