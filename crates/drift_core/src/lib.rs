//! Drift core library
//!
//! Platform-agnostic sync engine for a cross-device browsing session:
//! - Job lifecycle state machine ([`job`])
//! - Realtime job-event channel over WebSocket ([`channel`])
//! - Delta-based data sync with conflict resolution ([`delta`])
//! - CRDT-backed tab board replication ([`tabs`])
//! - Encrypted persistent storage ([`storage`])

pub mod channel;
pub mod config;
pub mod delta;
pub mod error;
pub mod job;
pub mod storage;
pub mod tabs;

pub use channel::protocol::{ClientMessage, JobEvent, JobEventKind, ServerMessage};
pub use channel::transport::ChannelTransport;
pub use channel::{ChannelStatus, JobEventChannel};
pub use config::Config;
pub use delta::remote::{HttpRemoteSync, RemoteSyncApi};
pub use delta::types::{Collection, ConflictStrategy, SyncDelta, SyncRecord};
pub use delta::{DeltaSyncEngine, SyncCycleReport};
pub use error::{DriftError, Result};
pub use job::{Job, JobState, transition};
pub use storage::{
    AesGcmCipher, MemoryStorage, PayloadCipher, PlaintextCipher, SqliteStorage, SyncData,
    SyncState, SyncStorage,
};
pub use tabs::{BoardView, GroupView, TabBoard, TabSync, TabView};
