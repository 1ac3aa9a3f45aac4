//! Storage abstraction for the synchronization core.
//!
//! This module defines the [`SyncStorage`] trait which abstracts over durable
//! local storage for one user's synchronized collections and for queued CRDT
//! updates. Both the delta sync engine and the tab CRDT sync depend only on
//! this trait, never on a specific storage technology.
//!
//! # Storage Model
//!
//! The storage maintains three kinds of data:
//! 1. **Snapshot**: the merged [`SyncData`] for all collections, one record
//! 2. **Sync state**: `{last_sync_time, pending_events, is_online}`
//! 3. **Pending update queue**: bounded FIFO of CRDT updates per session
//!
//! Their key spaces do not overlap, so the two consumers need no
//! cross-component locking.

mod cipher;
mod memory;
mod sqlite;

pub use cipher::{AesGcmCipher, PayloadCipher, PlaintextCipher};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::delta::types::SyncRecord;
use crate::error::Result;

/// Maximum queued CRDT updates per session. When the cap is exceeded, the
/// oldest entries are dropped first.
pub const PENDING_UPDATE_CAP: usize = 500;

/// Maximum events retained in the sync-state pending list.
pub const PENDING_EVENT_CAP: usize = 1000;

/// The merged snapshot of all synchronized collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    pub history: Vec<SyncRecord>,
    pub bookmarks: Vec<SyncRecord>,
    pub bookmark_folders: Vec<SyncRecord>,
    pub settings: Vec<SyncRecord>,
    pub last_synced: i64,
    pub version: u32,
}

/// Sync engine runtime state, persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync_time: i64,
    pub pending_events: Vec<serde_json::Value>,
    pub is_online: bool,
    /// Record ids known to the server at the end of the last cycle, per
    /// collection. Used to detect records deleted locally since then.
    #[serde(default)]
    pub synced_ids: BTreeMap<String, Vec<String>>,
}

/// A CRDT update queued while disconnected, keyed by session.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    /// Queue row id (autoincrement); preserves FIFO order
    pub id: i64,
    pub session_id: String,
    pub update: Vec<u8>,
    /// Unix timestamp when queued (milliseconds)
    pub created_at: i64,
}

/// Trait for durable local sync storage backends.
///
/// Implementations must degrade gracefully on quota pressure: a failed write
/// is reported as an error for the caller to log and skip, never a panic.
pub trait SyncStorage: Send + Sync {
    /// Load the merged collection snapshot, or `None` if never synced.
    fn get_all_sync_data(&self) -> Result<Option<SyncData>>;

    /// Persist the merged collection snapshot, replacing any previous one.
    fn save_all_sync_data(&self, data: &SyncData) -> Result<()>;

    /// Replace the history collection within the snapshot.
    fn save_history(&self, records: &[SyncRecord]) -> Result<()>;

    /// Replace the bookmarks collection within the snapshot.
    fn save_bookmarks(&self, records: &[SyncRecord]) -> Result<()>;

    /// Replace the settings collection within the snapshot.
    fn save_settings(&self, records: &[SyncRecord]) -> Result<()>;

    /// Load the sync-state record (defaults if never saved).
    fn load_state(&self) -> Result<SyncState>;

    /// Persist the sync-state record.
    fn save_state(&self, state: &SyncState) -> Result<()>;

    /// Append an event to the sync-state pending list, bounded by
    /// [`PENDING_EVENT_CAP`] (oldest dropped first).
    fn add_event(&self, event: &serde_json::Value) -> Result<()>;

    /// Queue a CRDT update for a session. Enforces [`PENDING_UPDATE_CAP`]
    /// per session by dropping the oldest rows.
    fn enqueue_update(&self, session_id: &str, update: &[u8]) -> Result<()>;

    /// Load all queued updates for a session in the order they were queued.
    fn queued_updates(&self, session_id: &str) -> Result<Vec<PendingUpdate>>;

    /// Delete queued updates by row id (after successful replay).
    fn delete_updates(&self, ids: &[i64]) -> Result<()>;

    /// Number of queued updates for a session.
    fn queued_update_count(&self, session_id: &str) -> Result<usize>;

    /// Drop all queued updates for a session (e.g., on logout).
    fn clear_session(&self, session_id: &str) -> Result<()>;

    /// Stable per-install device identifier, generated once and persisted.
    fn device_id(&self) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Shared behavioral checks run against both backends.
    fn exercise_backend(storage: &dyn SyncStorage) {
        // Snapshot starts empty
        assert!(storage.get_all_sync_data().unwrap().is_none());

        let mut data = SyncData::default();
        data.history.push(SyncRecord::new("h1", json!("https://a"), 100));
        data.last_synced = 100;
        storage.save_all_sync_data(&data).unwrap();

        let loaded = storage.get_all_sync_data().unwrap().unwrap();
        assert_eq!(loaded, data);

        // Partial saver replaces just one collection
        let bookmarks = vec![SyncRecord::new("b1", json!("https://b"), 200)];
        storage.save_bookmarks(&bookmarks).unwrap();
        let loaded = storage.get_all_sync_data().unwrap().unwrap();
        assert_eq!(loaded.bookmarks, bookmarks);
        assert_eq!(loaded.history.len(), 1);

        // State round-trip
        let state = SyncState {
            last_sync_time: 123,
            pending_events: vec![json!({"kind": "visit"})],
            is_online: true,
            ..Default::default()
        };
        storage.save_state(&state).unwrap();
        assert_eq!(storage.load_state().unwrap(), state);

        storage.add_event(&json!({"kind": "bookmark"})).unwrap();
        assert_eq!(storage.load_state().unwrap().pending_events.len(), 2);

        // Queue FIFO order
        storage.enqueue_update("s1", b"u1").unwrap();
        storage.enqueue_update("s1", b"u2").unwrap();
        storage.enqueue_update("s2", b"other").unwrap();

        let queued = storage.queued_updates("s1").unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].update, b"u1");
        assert_eq!(queued[1].update, b"u2");
        assert_eq!(storage.queued_update_count("s2").unwrap(), 1);

        let ids: Vec<i64> = queued.iter().map(|u| u.id).collect();
        storage.delete_updates(&ids).unwrap();
        assert_eq!(storage.queued_update_count("s1").unwrap(), 0);
        assert_eq!(storage.queued_update_count("s2").unwrap(), 1);

        storage.clear_session("s2").unwrap();
        assert_eq!(storage.queued_update_count("s2").unwrap(), 0);

        // Device id is stable
        let id = storage.device_id().unwrap();
        assert!(!id.is_empty());
        assert_eq!(storage.device_id().unwrap(), id);
    }

    #[test]
    fn test_memory_backend_contract() {
        let storage = MemoryStorage::new();
        exercise_backend(&storage);
    }

    #[test]
    fn test_sqlite_backend_contract() {
        let storage = SqliteStorage::in_memory().unwrap();
        exercise_backend(&storage);
    }

    #[test]
    fn test_queue_cap_drops_oldest() {
        let storage = MemoryStorage::new();
        for i in 0..(PENDING_UPDATE_CAP + 10) {
            storage
                .enqueue_update("s1", format!("u{}", i).as_bytes())
                .unwrap();
        }
        let queued = storage.queued_updates("s1").unwrap();
        assert_eq!(queued.len(), PENDING_UPDATE_CAP);
        // The 10 oldest entries were dropped
        assert_eq!(queued[0].update, b"u10");
    }
}
