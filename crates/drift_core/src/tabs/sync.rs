//! Tab board synchronization over the update queue.
//!
//! [`TabSync`] connects a [`TabBoard`] to durable storage and an outbound
//! send callback. Local changes are written to the bounded pending queue
//! BEFORE any send attempt, so a crash between queueing and sending loses
//! nothing: the queued update replays on the next connect. The queue is
//! capped; under extreme backlog the oldest updates are dropped and the
//! next full-state exchange repairs the gap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};

use super::doc::{BoardView, TabBoard};
use crate::error::Result;
use crate::storage::SyncStorage;

/// Callback invoked with encoded update bytes to put on the wire.
pub type SendCallback = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

/// Synchronizes a tab board with remote peers through durable queueing.
pub struct TabSync {
    board: Arc<TabBoard>,
    storage: Arc<dyn SyncStorage>,
    session_id: String,
    connected: AtomicBool,
    send_callback: RwLock<Option<SendCallback>>,
    /// Last view handed to the consumer, for the remote no-op guard
    last_projected: Mutex<Option<BoardView>>,
}

impl TabSync {
    pub fn new(
        board: Arc<TabBoard>,
        storage: Arc<dyn SyncStorage>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            board,
            storage,
            session_id: session_id.into(),
            connected: AtomicBool::new(false),
            send_callback: RwLock::new(None),
            last_projected: Mutex::new(None),
        }
    }

    /// Set the callback that puts update bytes on the wire.
    pub fn set_send_callback(&self, callback: SendCallback) {
        *self.send_callback.write().unwrap() = Some(callback);
    }

    pub fn board(&self) -> &Arc<TabBoard> {
        &self.board
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of updates waiting for replay.
    pub fn pending_count(&self) -> Result<usize> {
        self.storage.queued_update_count(&self.session_id)
    }

    /// Apply a local board change: mutate the CRDT, queue the update
    /// durably, then flush if connected.
    pub fn local_change(&self, view: &BoardView) -> Result<()> {
        let update = self.board.apply_local(view)?;
        if update.is_empty() {
            return Ok(());
        }

        // Queue before sending; a crash here replays on next connect
        self.storage.enqueue_update(&self.session_id, &update)?;
        *self.last_projected.lock().unwrap() = Some(self.board.project());

        if self.is_connected() {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Change only the active tab register.
    pub fn set_active(&self, id: Option<&str>) -> Result<()> {
        let update = self.board.set_active(id)?;
        if update.is_empty() {
            return Ok(());
        }
        self.storage.enqueue_update(&self.session_id, &update)?;
        *self.last_projected.lock().unwrap() = Some(self.board.project());

        if self.is_connected() {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Mark the transport connected and replay the queue.
    pub fn on_connected(&self) -> Result<usize> {
        self.connected.store(true, Ordering::SeqCst);
        let flushed = self.flush_pending()?;
        if flushed > 0 {
            info!("[TabSync] replayed {} queued updates on connect", flushed);
        }
        Ok(flushed)
    }

    pub fn on_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!("[TabSync] disconnected, queueing updates locally");
    }

    /// Send every queued update in queue order, deleting each row only
    /// after a successful send. Re-applying an update to the board first is
    /// harmless (CRDT idempotence) and covers the case where the queue
    /// outlived the in-memory board.
    pub fn flush_pending(&self) -> Result<usize> {
        let callback = match self.send_callback.read().unwrap().clone() {
            Some(cb) => cb,
            None => return Ok(0),
        };

        let queued = self.storage.queued_updates(&self.session_id)?;
        if queued.is_empty() {
            return Ok(0);
        }

        let mut sent_ids = Vec::with_capacity(queued.len());
        for pending in &queued {
            self.board.apply_update(&pending.update)?;
            if let Err(e) = callback(&pending.update) {
                warn!("[TabSync] send failed mid-flush, {} left queued: {}", queued.len() - sent_ids.len(), e);
                break;
            }
            sent_ids.push(pending.id);
        }

        let flushed = sent_ids.len();
        self.storage.delete_updates(&sent_ids)?;
        Ok(flushed)
    }

    /// Apply an update from a remote peer.
    ///
    /// Returns the new projection, or `None` when the update did not
    /// change the board structurally, so echoes of our own writes do not
    /// ripple back into the UI.
    pub fn handle_remote_update(&self, update: &[u8]) -> Result<Option<BoardView>> {
        self.board.apply_update(update)?;
        let projected = self.board.project();

        let mut last = self.last_projected.lock().unwrap();
        if last.as_ref() == Some(&projected) {
            debug!("[TabSync] remote update is a structural no-op");
            return Ok(None);
        }
        *last = Some(projected.clone());
        Ok(Some(projected))
    }

    /// Drop all queued updates for this session (e.g., on logout).
    pub fn clear_queue(&self) -> Result<()> {
        self.storage.clear_session(&self.session_id)
    }
}

impl std::fmt::Debug for TabSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabSync")
            .field("session_id", &self.session_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
