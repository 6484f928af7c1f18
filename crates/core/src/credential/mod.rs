//! API credential pool.
//!
//! Credentials rotate round-robin. A quota error removes a credential from
//! rotation immediately; transient errors only disable it after a run of
//! consecutive failures, so a single blip heals on the next success.

mod memory;
mod pool;
mod sqlite;
mod types;

pub use memory::MemoryCredentialStore;
pub use pool::CredentialPool;
pub use sqlite::SqliteCredentialStore;
pub use types::{
    fingerprint, quota_day_start, Credential, CredentialState, CredentialStatus, CredentialStore,
    PoolError,
};
