//! Realtime job event channel.
//!
//! A single multiplexed connection carries events for any number of jobs.
//! [`JobEventChannel`] holds the client-side state: which jobs are
//! subscribed, per-job sequence deduplication, listener registries, and the
//! connection status. The WebSocket itself lives in [`transport`]; the
//! channel core is transport-agnostic so tests can feed it frames directly.
//!
//! # Delivery Guarantees
//!
//! Events are delivered to listeners at most once per (job, sequence), in
//! arrival order. Out-of-order arrivals are delivered (a late event is still
//! new information); repeated sequences are dropped. After a terminal event
//! (`job:completed` or `job:failed`) is delivered, the job's dedup state and
//! listeners are released.

pub mod protocol;
pub mod registry;
pub mod transport;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{DriftError, Result};
use protocol::{ClientMessage, JobEvent, JobEventKind, ServerMessage};
use registry::{Listener, ListenerRegistry, Subscription};

/// Connection status exposed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ChannelStatus {
    Offline,
    Connecting,
    Online,
    Reconnecting { attempt: u32 },
    Error { message: String },
}

/// Per-job sequence tracking for replay deduplication.
#[derive(Debug, Default)]
struct SequenceTracker {
    seen: HashSet<u64>,
    highest: u64,
}

impl SequenceTracker {
    /// Record a sequence. Returns false if it was already seen.
    fn record(&mut self, sequence: u64) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }
        self.highest = self.highest.max(sequence);
        true
    }
}

/// Client-side state of the multiplexed job event connection.
pub struct JobEventChannel {
    registry: ListenerRegistry,
    sequences: Mutex<HashMap<String, SequenceTracker>>,
    subscribed: Mutex<HashSet<String>>,
    pending_acks: Mutex<HashMap<String, oneshot::Sender<u64>>>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    status_tx: watch::Sender<ChannelStatus>,
}

impl JobEventChannel {
    /// Create a channel core. The returned receiver is the outbound frame
    /// stream for the transport to drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ChannelStatus::Offline);
        let channel = Self {
            registry: ListenerRegistry::new(),
            sequences: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(HashSet::new()),
            pending_acks: Mutex::new(HashMap::new()),
            outbound,
            status_tx,
        };
        (channel, rx)
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| DriftError::Connection("outbound channel closed".to_string()))
    }

    /// Current connection status.
    pub fn status(&self) -> ChannelStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch for status changes.
    pub fn on_status_change(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn set_status(&self, status: ChannelStatus) {
        if *self.status_tx.borrow() != status {
            debug!("[EventChannel] status -> {:?}", status);
            let _ = self.status_tx.send(status);
        }
    }

    /// Start a new job. Events arrive once the caller subscribes to the
    /// job id the server assigns (carried on every event).
    pub fn start_job(&self, job_type: &str, input: serde_json::Value) -> Result<()> {
        self.send(ClientMessage::StartJob {
            job_type: job_type.to_string(),
            input,
        })
    }

    /// Request cancellation. One-way; the outcome arrives as a
    /// `job:failed` or `job:completed` event.
    pub fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.send(ClientMessage::CancelJob {
            job_id: job_id.to_string(),
        })
    }

    /// Resume a paused job. The server acknowledges by replaying any
    /// missed events followed by `sync:complete`.
    pub fn resume_job(&self, job_id: &str) -> Result<oneshot::Receiver<u64>> {
        let receiver = self.register_ack(job_id);
        self.send(ClientMessage::ResumeJob {
            job_id: job_id.to_string(),
        })?;
        Ok(receiver)
    }

    /// Register a listener for a job's events. The first listener for a job
    /// also sends the subscribe frame plus a `reconnect:sync` request, so
    /// backlog recovery on first subscribe and after a reconnect share one
    /// code path.
    pub fn subscribe_to_job(
        &self,
        job_id: &str,
        kind: JobEventKind,
        listener: Listener,
    ) -> Result<Subscription> {
        let newly_subscribed = self.subscribed.lock().unwrap().insert(job_id.to_string());
        if newly_subscribed {
            self.send(ClientMessage::SubscribeJob {
                job_id: job_id.to_string(),
            })?;
            self.send(ClientMessage::ReconnectSync {
                job_id: job_id.to_string(),
                last_sequence: self.last_sequence(job_id),
            })?;
        }
        Ok(self.registry.register(job_id, kind, listener))
    }

    /// Unsubscribe from a job: sends the unsubscribe frame and drops all
    /// listeners and dedup state for the job.
    pub fn unsubscribe_from_job(&self, job_id: &str) -> Result<()> {
        if self.subscribed.lock().unwrap().remove(job_id) {
            self.send(ClientMessage::UnsubscribeJob {
                job_id: job_id.to_string(),
            })?;
        }
        self.registry.remove_job(job_id);
        self.sequences.lock().unwrap().remove(job_id);
        Ok(())
    }

    /// Highest sequence seen for a job, used in `reconnect:sync`.
    pub fn last_sequence(&self, job_id: &str) -> u64 {
        self.sequences
            .lock()
            .unwrap()
            .get(job_id)
            .map(|t| t.highest)
            .unwrap_or(0)
    }

    /// Currently subscribed job ids.
    pub fn subscribed_jobs(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().iter().cloned().collect()
    }

    /// Build the resync frames to send after a reconnect, one per
    /// subscribed job, each carrying the last sequence seen.
    pub(crate) fn resync_messages(&self) -> Vec<ClientMessage> {
        self.subscribed_jobs()
            .into_iter()
            .map(|job_id| {
                let last_sequence = self.last_sequence(&job_id);
                ClientMessage::ReconnectSync {
                    job_id,
                    last_sequence,
                }
            })
            .collect()
    }

    fn register_ack(&self, job_id: &str) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        self.pending_acks
            .lock()
            .unwrap()
            .insert(job_id.to_string(), tx);
        rx
    }

    /// Process one server frame: deduplicate, dispatch to listeners, and
    /// maintain per-job state.
    pub fn process_server_message(&self, message: ServerMessage) {
        if let Some((kind, event)) = message.as_job_event() {
            self.process_job_event(kind, event);
            return;
        }

        match message {
            ServerMessage::SyncComplete { job_id, replayed } => {
                debug!(
                    "[EventChannel] sync complete for {}: {} events replayed",
                    job_id, replayed
                );
                if let Some(ack) = self.pending_acks.lock().unwrap().remove(&job_id) {
                    let _ = ack.send(replayed);
                }
            }
            ServerMessage::ServerShutdown { message } => {
                info!("[EventChannel] server shutting down: {}", message);
                self.set_status(ChannelStatus::Offline);
            }
            ServerMessage::Other => {
                debug!("[EventChannel] ignoring unknown server message");
            }
            _ => {}
        }
    }

    fn process_job_event(&self, kind: JobEventKind, event: &JobEvent) {
        let fresh = self
            .sequences
            .lock()
            .unwrap()
            .entry(event.job_id.clone())
            .or_default()
            .record(event.sequence);

        if !fresh {
            debug!(
                "[EventChannel] dropping duplicate {}:{} seq={}",
                event.job_id, kind, event.sequence
            );
            return;
        }

        self.registry.dispatch(kind, event);

        if kind.is_terminal() {
            // Release per-job state only after the terminal event reached
            // its listeners
            self.sequences.lock().unwrap().remove(&event.job_id);
            self.subscribed.lock().unwrap().remove(&event.job_id);
            self.registry.remove_job(&event.job_id);
            if self
                .pending_acks
                .lock()
                .unwrap()
                .remove(&event.job_id)
                .is_some()
            {
                warn!(
                    "[EventChannel] job {} ended with a resume ack outstanding",
                    event.job_id
                );
            }
        }
    }
}

impl std::fmt::Debug for JobEventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEventChannel")
            .field("subscribed", &self.subscribed.lock().unwrap().len())
            .field("status", &self.status())
            .finish()
    }
}
