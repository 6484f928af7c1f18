//! Shared state-store plumbing.
//!
//! Run/job state and credential state both live behind store traits with an
//! in-memory and a SQLite implementation. The SQLite backend is the one to use
//! when several worker processes share the same state: every mutation that
//! other workers can race on is a single conditional `UPDATE`, so SQLite's
//! own locking makes it atomic across processes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Errors raised by state stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a SQLite database file configured for multi-process access.
pub(crate) fn open_sqlite(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    Ok(conn)
}

/// Open a private in-memory SQLite database.
pub(crate) fn open_sqlite_in_memory() -> Result<Connection, StoreError> {
    Ok(Connection::open_in_memory()?)
}

/// Lock a mutex, mapping poisoning to a store error.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Poisoned)
}

/// Format a timestamp column. Fixed width, so columns compare as text.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 timestamp column.
pub(crate) fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp("x", &now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_formatted_timestamps_sort_as_text() {
        let earlier = DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
        assert_eq!(format_timestamp(&earlier), "2024-01-01T10:00:00.000000Z");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("job-1", "yesterday").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "job-1"));
    }

    #[test]
    fn test_open_sqlite_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let conn = open_sqlite(&dir.path().join("state.db")).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
