//! SQLite-backed sync storage.
//!
//! Persists the collection snapshot, sync state, and the pending CRDT update
//! queue in a single database file. Snapshot and state payloads pass through
//! the configured [`PayloadCipher`] before they touch disk.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};

use super::cipher::{PayloadCipher, PlaintextCipher};
use super::{PENDING_EVENT_CAP, PENDING_UPDATE_CAP, PendingUpdate, SyncData, SyncState, SyncStorage};
use crate::delta::types::SyncRecord;
use crate::error::{DriftError, Result};

/// SQLite-backed storage for sync data.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    cipher: Box<dyn PayloadCipher>,
}

impl SqliteStorage {
    /// Open or create a database at the given path, without encryption.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_cipher(path, Box::new(PlaintextCipher))
    }

    /// Open or create a database at the given path with the given cipher.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open_with_cipher<P: AsRef<Path>>(
        path: P,
        cipher: Box<dyn PayloadCipher>,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
            cipher,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database for testing.
    ///
    /// Data is lost when the storage is dropped.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
            cipher: Box::new(PlaintextCipher),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            -- Single-row key/value blobs: snapshot, state, device identity
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Queued CRDT updates awaiting replay, FIFO per session
            CREATE TABLE IF NOT EXISTS pending_updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                data BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pending_session ON pending_updates(session_id, id);
            "#,
        )?;
        Ok(())
    }

    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT data FROM blobs WHERE key = ?",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(data) => Ok(Some(data)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DriftError::Database(e)),
        }
    }

    fn write_blob(&self, key: &str, data: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT OR REPLACE INTO blobs (key, data, updated_at) VALUES (?, ?, ?)",
            params![key, data, now],
        )?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<SyncData>> {
        match self.read_blob("snapshot")? {
            Some(blob) => {
                let plain = self.cipher.decrypt(&blob)?;
                Ok(Some(serde_json::from_slice(&plain)?))
            }
            None => Ok(None),
        }
    }

    fn save_snapshot(&self, data: &SyncData) -> Result<()> {
        let plain = serde_json::to_vec(data)?;
        let blob = self.cipher.encrypt(&plain)?;
        self.write_blob("snapshot", &blob)
    }

    fn save_collection<F>(&self, records: &[SyncRecord], apply: F) -> Result<()>
    where
        F: FnOnce(&mut SyncData, Vec<SyncRecord>),
    {
        let mut data = self.load_snapshot()?.unwrap_or_default();
        apply(&mut data, records.to_vec());
        self.save_snapshot(&data)
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl SyncStorage for SqliteStorage {
    fn get_all_sync_data(&self) -> Result<Option<SyncData>> {
        self.load_snapshot()
    }

    fn save_all_sync_data(&self, data: &SyncData) -> Result<()> {
        self.save_snapshot(data)
    }

    fn save_history(&self, records: &[SyncRecord]) -> Result<()> {
        self.save_collection(records, |data, records| data.history = records)
    }

    fn save_bookmarks(&self, records: &[SyncRecord]) -> Result<()> {
        self.save_collection(records, |data, records| data.bookmarks = records)
    }

    fn save_settings(&self, records: &[SyncRecord]) -> Result<()> {
        self.save_collection(records, |data, records| data.settings = records)
    }

    fn load_state(&self) -> Result<SyncState> {
        match self.read_blob("state")? {
            Some(blob) => {
                let plain = self.cipher.decrypt(&blob)?;
                Ok(serde_json::from_slice(&plain)?)
            }
            None => Ok(SyncState::default()),
        }
    }

    fn save_state(&self, state: &SyncState) -> Result<()> {
        let plain = serde_json::to_vec(state)?;
        let blob = self.cipher.encrypt(&plain)?;
        self.write_blob("state", &blob)
    }

    fn add_event(&self, event: &serde_json::Value) -> Result<()> {
        let mut state = self.load_state()?;
        state.pending_events.push(event.clone());
        if state.pending_events.len() > PENDING_EVENT_CAP {
            let excess = state.pending_events.len() - PENDING_EVENT_CAP;
            state.pending_events.drain(..excess);
        }
        self.save_state(&state)
    }

    fn enqueue_update(&self, session_id: &str, update: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO pending_updates (session_id, data, created_at) VALUES (?, ?, ?)",
            params![session_id, update, now],
        )?;

        // Enforce the per-session cap, dropping the oldest rows
        conn.execute(
            "DELETE FROM pending_updates WHERE session_id = ?1 AND id NOT IN (
                 SELECT id FROM pending_updates WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2
             )",
            params![session_id, PENDING_UPDATE_CAP as i64],
        )?;
        Ok(())
    }

    fn queued_updates(&self, session_id: &str) -> Result<Vec<PendingUpdate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, data, created_at FROM pending_updates
             WHERE session_id = ? ORDER BY id ASC",
        )?;
        let updates = stmt
            .query_map(params![session_id], |row| {
                Ok(PendingUpdate {
                    id: row.get(0)?,
                    session_id: session_id.to_string(),
                    update: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(updates)
    }

    fn delete_updates(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM pending_updates WHERE id = ?")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn queued_update_count(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_updates WHERE session_id = ?",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn clear_session(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM pending_updates WHERE session_id = ?",
            params![session_id],
        )?;
        Ok(())
    }

    fn device_id(&self) -> Result<String> {
        if let Some(blob) = self.read_blob("device_id")? {
            return String::from_utf8(blob)
                .map_err(|e| DriftError::Storage(format!("corrupt device id: {e}")));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.write_blob("device_id", id.as_bytes())?;
        Ok(id)
    }
}
