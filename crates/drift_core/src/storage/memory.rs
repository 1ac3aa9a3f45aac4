//! In-memory sync storage for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{PENDING_EVENT_CAP, PENDING_UPDATE_CAP, PendingUpdate, SyncData, SyncState, SyncStorage};
use crate::delta::types::SyncRecord;
use crate::error::Result;

/// In-memory storage backend. All data is lost on drop.
#[derive(Debug)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<SyncData>,
    state: SyncState,
    queues: HashMap<String, Vec<PendingUpdate>>,
    next_id: i64,
    device_id: Option<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn save_collection<F>(&self, records: &[SyncRecord], apply: F) -> Result<()>
    where
        F: FnOnce(&mut SyncData, Vec<SyncRecord>),
    {
        let mut inner = self.inner.write().unwrap();
        let data = inner.snapshot.get_or_insert_with(SyncData::default);
        apply(data, records.to_vec());
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStorage for MemoryStorage {
    fn get_all_sync_data(&self) -> Result<Option<SyncData>> {
        Ok(self.inner.read().unwrap().snapshot.clone())
    }

    fn save_all_sync_data(&self, data: &SyncData) -> Result<()> {
        self.inner.write().unwrap().snapshot = Some(data.clone());
        Ok(())
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
        Ok(self.inner.read().unwrap().state.clone())
    }

    fn save_state(&self, state: &SyncState) -> Result<()> {
        self.inner.write().unwrap().state = state.clone();
        Ok(())
    }

    fn add_event(&self, event: &serde_json::Value) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.state.pending_events.push(event.clone());
        if inner.state.pending_events.len() > PENDING_EVENT_CAP {
            let excess = inner.state.pending_events.len() - PENDING_EVENT_CAP;
            inner.state.pending_events.drain(..excess);
        }
        Ok(())
    }

    fn enqueue_update(&self, session_id: &str, update: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        let queue = inner.queues.entry(session_id.to_string()).or_default();
        queue.push(PendingUpdate {
            id,
            session_id: session_id.to_string(),
            update: update.to_vec(),
            created_at: chrono::Utc::now().timestamp_millis(),
        });
        if queue.len() > PENDING_UPDATE_CAP {
            let excess = queue.len() - PENDING_UPDATE_CAP;
            queue.drain(..excess);
        }
        Ok(())
    }

    fn queued_updates(&self, session_id: &str) -> Result<Vec<PendingUpdate>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .queues
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn delete_updates(&self, ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        for queue in inner.queues.values_mut() {
            queue.retain(|u| !ids.contains(&u.id));
        }
        Ok(())
    }

    fn queued_update_count(&self, session_id: &str) -> Result<usize> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .queues
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0))
    }

    fn clear_session(&self, session_id: &str) -> Result<()> {
        self.inner.write().unwrap().queues.remove(session_id);
        Ok(())
    }

    fn device_id(&self) -> Result<String> {
        let mut inner = self.inner.write().unwrap();
        if let Some(id) = &inner.device_id {
            return Ok(id.clone());
        }
        let id = uuid::Uuid::new_v4().to_string();
        inner.device_id = Some(id.clone());
        Ok(id)
    }
}
