//! SQLite-backed credential store.
//!
//! Every mutation is a single statement, so concurrent reports from several
//! processes sharing the database file never lose an update.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CredentialState, CredentialStatus, CredentialStore};
use crate::store::{format_timestamp, lock, open_sqlite, open_sqlite_in_memory, StoreError};

/// SQLite-backed credential store.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the store in the given database file.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = open_sqlite(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = open_sqlite_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                fingerprint TEXT PRIMARY KEY,
                slot INTEGER NOT NULL,
                status TEXT NOT NULL,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credential_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO credential_cursor (id, value) VALUES (0, 0);
            "#,
        )?;
        Ok(())
    }

    fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<(String, String, u32)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }

    fn into_state(
        (fingerprint, status, consecutive_failures): (String, String, u32),
    ) -> Result<CredentialState, StoreError> {
        let status = CredentialStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            id: fingerprint.clone(),
            reason: format!("unknown credential status '{}'", status),
        })?;
        Ok(CredentialState {
            fingerprint,
            status,
            consecutive_failures,
        })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn register(
        &self,
        fingerprints: &[String],
        quota_day_start: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let now = format_timestamp(&Utc::now());
        let day_start = format_timestamp(&quota_day_start);
        for (slot, fp) in fingerprints.iter().enumerate() {
            // SET expressions all see the pre-update row.
            tx.execute(
                "INSERT INTO credentials (fingerprint, slot, status, consecutive_failures, updated_at)
                 VALUES (?1, ?2, 'ACTIVE', 0, ?3)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    slot = excluded.slot,
                    status = CASE WHEN updated_at < ?4 THEN 'ACTIVE' ELSE status END,
                    consecutive_failures =
                        CASE WHEN updated_at < ?4 THEN 0 ELSE consecutive_failures END,
                    updated_at = CASE WHEN updated_at < ?4 THEN excluded.updated_at ELSE updated_at END",
                params![fp, slot as i64, now, day_start],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<CredentialState>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT fingerprint, status, consecutive_failures FROM credentials ORDER BY slot",
        )?;
        let rows = stmt.query_map([], Self::row_to_state)?;

        let mut states = Vec::new();
        for row in rows {
            states.push(Self::into_state(row?)?);
        }
        Ok(states)
    }

    fn next_cursor(&self) -> Result<u64, StoreError> {
        let conn = lock(&self.conn)?;
        let value: i64 = conn.query_row(
            "UPDATE credential_cursor SET value = value + 1 WHERE id = 0 RETURNING value - 1",
            [],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }

    fn record_success(&self, fingerprint: &str) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE credentials SET consecutive_failures = 0, updated_at = ?2
             WHERE fingerprint = ?1 AND consecutive_failures != 0",
            params![fingerprint, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    fn mark_quota_exhausted(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE credentials SET status = 'QUOTA_EXHAUSTED', updated_at = ?2
             WHERE fingerprint = ?1 AND status != 'QUOTA_EXHAUSTED'",
            params![fingerprint, format_timestamp(&Utc::now())],
        )?;
        Ok(changed == 1)
    }

    fn record_transient_failure(
        &self,
        fingerprint: &str,
        threshold: u32,
    ) -> Result<Option<CredentialState>, StoreError> {
        let conn = lock(&self.conn)?;
        // SET expressions all see the pre-update row.
        let row = conn
            .query_row(
                "UPDATE credentials SET
                    consecutive_failures = consecutive_failures + 1,
                    status = CASE
                        WHEN status = 'ACTIVE' AND consecutive_failures + 1 >= ?2 THEN 'DISABLED'
                        ELSE status
                    END,
                    updated_at = ?3
                 WHERE fingerprint = ?1
                 RETURNING fingerprint, status, consecutive_failures",
                params![fingerprint, threshold, format_timestamp(&Utc::now())],
                Self::row_to_state,
            )
            .optional()?;

        row.map(Self::into_state).transpose()
    }
}
