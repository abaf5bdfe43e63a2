//! Store handle and key/value state.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;
use tracing::debug;

use taskhands_protocols::TimeProvider;

use crate::codec::{format_ts, parse_ts};
use crate::error::StoreError;
use crate::schema::init_schema;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// Handle to the durable store.
///
/// Cloning is cheap; clones share the same background connection, which
/// serializes every call and transaction.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
    clock: Arc<dyn TimeProvider>,
}

impl Store {
    /// Open (or create) a file-backed store.
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn TimeProvider>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(init_schema(conn)?)
        })
        .await?;

        debug!("Opened store at {}", path.display());
        Ok(Self { conn, clock })
    }

    /// Create a new in-memory store.
    pub async fn open_in_memory(clock: Arc<dyn TimeProvider>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| Ok(init_schema(conn)?)).await?;

        Ok(Self { conn, clock })
    }

    /// Underlying connection for crates that own their own tables.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Clock used for every timestamp the store writes.
    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Set a state value.
    pub async fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        let now = format_ts(self.now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO worker_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Get a state value.
    pub async fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_state_entry(key).await?.map(|(value, _)| value))
    }

    /// Get a state value together with its last update time.
    pub async fn get_state_entry(&self, key: &str) -> Result<Option<(String, DateTime<Utc>)>, StoreError> {
        let key = key.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT value, updated_at FROM worker_state WHERE key = ?1",
                        [&key],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        match row {
            Some((value, updated_at)) => Ok(Some((value, parse_ts(&updated_at)?))),
            None => Ok(None),
        }
    }

    /// Delete a state value.
    pub async fn delete_state(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM worker_state WHERE key = ?1", [&key])?))
            .await?;
        Ok(removed > 0)
    }
}
