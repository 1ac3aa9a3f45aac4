//! Wire protocol for the realtime job event channel.
//!
//! All frames are JSON over WebSocket text messages, discriminated by a
//! `type` field. Client frames carry commands and subscriptions; server
//! frames carry job events with a per-job monotonic sequence number used
//! for replay deduplication.

use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Start a new job of the given type.
    #[serde(rename = "start:job")]
    StartJob {
        #[serde(rename = "jobType")]
        job_type: String,
        input: serde_json::Value,
    },
    /// Request cancellation. One-way; the outcome arrives as a job event.
    #[serde(rename = "cancel:job")]
    CancelJob {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    /// Resume a paused job.
    #[serde(rename = "resume:job")]
    ResumeJob {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    /// Subscribe to events for a job.
    #[serde(rename = "subscribe:job")]
    SubscribeJob {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    /// Unsubscribe from a job's events.
    #[serde(rename = "unsubscribe:job")]
    UnsubscribeJob {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    /// After a reconnect, ask the server to replay events newer than
    /// `last_sequence` for a job.
    #[serde(rename = "reconnect:sync")]
    ReconnectSync {
        #[serde(rename = "jobId")]
        job_id: String,
        #[serde(rename = "lastSequence")]
        last_sequence: u64,
    },
}

/// Kinds of per-job events a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    Chunk,
    Progress,
    Checkpoint,
    Completed,
    Failed,
}

impl JobEventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobEventKind::Completed | JobEventKind::Failed)
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobEventKind::Chunk => "chunk",
            JobEventKind::Progress => "progress",
            JobEventKind::Checkpoint => "checkpoint",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A job event as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub payload: serde_json::Value,
    pub sequence: u64,
    pub timestamp: i64,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "job:chunk")]
    JobChunk(JobEvent),
    #[serde(rename = "job:progress")]
    JobProgress(JobEvent),
    #[serde(rename = "job:checkpoint")]
    JobCheckpoint(JobEvent),
    #[serde(rename = "job:completed")]
    JobCompleted(JobEvent),
    #[serde(rename = "job:failed")]
    JobFailed(JobEvent),
    /// Replay after `reconnect:sync` has finished.
    #[serde(rename = "sync:complete")]
    SyncComplete {
        #[serde(rename = "jobId")]
        job_id: String,
        replayed: u64,
    },
    /// The server is going down; clients should reconnect with backoff.
    #[serde(rename = "server:shutdown")]
    ServerShutdown { message: String },
    /// Catch-all for message types this client does not know.
    #[serde(other)]
    Other,
}

impl ServerMessage {
    /// Split a job event frame into its kind and event, if it is one.
    pub fn as_job_event(&self) -> Option<(JobEventKind, &JobEvent)> {
        match self {
            ServerMessage::JobChunk(e) => Some((JobEventKind::Chunk, e)),
            ServerMessage::JobProgress(e) => Some((JobEventKind::Progress, e)),
            ServerMessage::JobCheckpoint(e) => Some((JobEventKind::Checkpoint, e)),
            ServerMessage::JobCompleted(e) => Some((JobEventKind::Completed, e)),
            ServerMessage::JobFailed(e) => Some((JobEventKind::Failed, e)),
            _ => None,
        }
    }
}

/// Progress payload carried by `job:progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub progress: u32,
    #[serde(default)]
    pub step: Option<String>,
}
