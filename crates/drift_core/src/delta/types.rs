//! Core types for delta-based multi-device synchronization.
//!
//! A [`SyncRecord`] is the unit of reconciliation: a history entry, bookmark,
//! bookmark folder, or setting. Records carry a monotonically non-decreasing
//! `version` and an `updated_at` timestamp which must be set on every local
//! mutation; both drive conflict resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A synchronized collection name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    History,
    Bookmarks,
    BookmarkFolders,
    Settings,
}

impl Collection {
    /// All collections reconciled by a full sync cycle.
    pub const ALL: [Collection; 4] = [
        Collection::History,
        Collection::Bookmarks,
        Collection::BookmarkFolders,
        Collection::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::History => "history",
            Collection::Bookmarks => "bookmarks",
            Collection::BookmarkFolders => "bookmarkFolders",
            Collection::Settings => "settings",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One synchronized record (history entry, bookmark, or setting).
///
/// Value fields are an open map so the same reconciliation machinery serves
/// every collection; `version` and `updated_at` are pulled out because the
/// merge logic depends on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Stable identifier (or settings key)
    pub id: String,

    /// Collection-specific value fields (url, title, folder, value, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,

    /// Monotonically non-decreasing across all replicas of the same id
    pub version: u32,

    /// Unix timestamp of last mutation (milliseconds); set on every local write
    pub updated_at: i64,
}

impl SyncRecord {
    /// Create a record with a single `value` field, version 1.
    pub fn new(id: impl Into<String>, value: serde_json::Value, updated_at: i64) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), value);
        Self {
            id: id.into(),
            fields,
            version: 1,
            updated_at,
        }
    }

    /// Bump the version and stamp `updated_at` for a local mutation.
    pub fn touch(&mut self, now: i64) {
        self.version += 1;
        self.updated_at = now;
    }
}

/// The change set for one collection since a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDelta {
    pub added: Vec<SyncRecord>,
    pub updated: Vec<SyncRecord>,
    pub deleted: Vec<String>,
    pub last_synced: i64,
}

impl SyncDelta {
    /// Whether the delta carries no changes.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Conflict resolution strategy, selectable per sync session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Compare `updated_at`; higher wins; ties keep the local copy.
    #[default]
    LastWriteWins,
    /// Remote always wins, ignores timestamps.
    ServerWins,
    /// Local always wins, ignores timestamps.
    ClientWins,
    /// Field union with remote precedence on overlapping keys;
    /// `version = max(local, remote) + 1`, `updated_at = now`.
    Merge,
}

/// Audit record for one resolved conflict.
///
/// Created transiently during a merge and retained only for the duration of
/// the sync cycle, for diagnostics; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEntry {
    pub collection: Collection,
    pub id: String,
    pub local: SyncRecord,
    pub remote: SyncRecord,
    pub strategy: ConflictStrategy,
    pub resolved: bool,
}
