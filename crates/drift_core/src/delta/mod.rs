//! Delta-based synchronization engine.
//!
//! Synchronizes the four local collections (history, bookmarks, bookmark
//! folders, settings) with the remote sync service by exchanging deltas
//! rather than full snapshots.
//!
//! # Sync Cycle
//!
//! A cycle runs per collection: fetch the remote delta since the last sync,
//! merge it into the local records under the configured conflict strategy,
//! push local changes the server has not seen, then persist the merged
//! snapshot. Storage is written only after every collection has completed,
//! so a failed cycle leaves the local snapshot untouched.
//!
//! # Concurrency
//!
//! [`DeltaSyncEngine::sync_all`] is single-flight: a second call while a
//! cycle runs fails fast with `SyncInProgress` instead of queueing.

pub mod remote;
pub mod types;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};
use crate::storage::SyncStorage;
use remote::RemoteSyncApi;
use types::{Collection, ConflictEntry, ConflictStrategy, SyncDelta, SyncRecord};

/// Records absent from the remote set are treated as remotely deleted only
/// when older than this window; newer ones may simply not have synced yet.
pub const DELETION_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Outcome of one collection within a sync cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOutcome {
    pub collection: String,
    pub pulled: usize,
    pub pushed: usize,
    pub deleted: usize,
    pub conflicts: usize,
}

/// Structured result of a full sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleReport {
    pub success: bool,
    pub synced_at: i64,
    pub collections: Vec<CollectionOutcome>,
    pub conflicts: Vec<ConflictEntry>,
    pub error: Option<String>,
}

impl SyncCycleReport {
    pub fn success(
        synced_at: i64,
        collections: Vec<CollectionOutcome>,
        conflicts: Vec<ConflictEntry>,
    ) -> Self {
        Self {
            success: true,
            synced_at,
            collections,
            conflicts,
            error: None,
        }
    }

    pub fn failure(synced_at: i64, error: String) -> Self {
        Self {
            success: false,
            synced_at,
            collections: Vec::new(),
            conflicts: Vec::new(),
            error: Some(error),
        }
    }
}

/// Compute the delta between two versions of a collection.
///
/// `added` holds records present only in `new` with a timestamp at or past
/// `since`, `updated` holds records present in both whose version or
/// timestamp changed since `since`, and `deleted` holds ids present only
/// in `old`.
pub fn calculate_delta(old: &[SyncRecord], new: &[SyncRecord], since: i64) -> SyncDelta {
    let old_by_id: HashMap<&str, &SyncRecord> =
        old.iter().map(|r| (r.id.as_str(), r)).collect();
    let new_ids: HashSet<&str> = new.iter().map(|r| r.id.as_str()).collect();

    let mut delta = SyncDelta::default();
    for record in new {
        match old_by_id.get(record.id.as_str()) {
            None if record.updated_at >= since => delta.added.push(record.clone()),
            None => {}
            Some(prev) => {
                let changed = record.version != prev.version
                    || record.updated_at != prev.updated_at
                    || record.fields != prev.fields;
                if changed && record.updated_at > since {
                    delta.updated.push(record.clone());
                }
            }
        }
    }
    for record in old {
        if !new_ids.contains(record.id.as_str()) {
            delta.deleted.push(record.id.clone());
        }
    }
    delta
}

/// Apply a delta to a collection, returning the new collection.
///
/// Idempotent: applying the same delta twice yields the same result, since
/// added and updated records upsert by id and deletions remove by id.
pub fn apply_delta(base: &[SyncRecord], delta: &SyncDelta) -> Vec<SyncRecord> {
    let deleted: HashSet<&str> = delta.deleted.iter().map(String::as_str).collect();
    let mut incoming: BTreeMap<&str, &SyncRecord> = BTreeMap::new();
    for record in delta.added.iter().chain(delta.updated.iter()) {
        incoming.insert(record.id.as_str(), record);
    }

    let mut result = Vec::with_capacity(base.len() + delta.added.len());
    for record in base {
        if deleted.contains(record.id.as_str()) {
            continue;
        }
        match incoming.remove(record.id.as_str()) {
            Some(replacement) => result.push(replacement.clone()),
            None => result.push(record.clone()),
        }
    }
    // Remaining incoming records are new to this collection
    for record in incoming.into_values() {
        if !deleted.contains(record.id.as_str()) {
            result.push(record.clone());
        }
    }
    result
}

/// Find local records that were deleted remotely.
///
/// A local record absent from the remote set counts as deleted only when it
/// is older than `window_ms`; a fresh record may simply not have reached the
/// server yet. This reconciles against a full remote snapshot; the
/// delta cycle in [`DeltaSyncEngine`] instead receives explicit tombstones
/// and does not need the window. The window comes from
/// [`crate::Config::deletion_window_ms`], defaulting to
/// [`DELETION_WINDOW_MS`].
pub fn detect_deletions(
    local: &[SyncRecord],
    remote: &[SyncRecord],
    now: i64,
    window_ms: i64,
) -> Vec<String> {
    let remote_ids: HashSet<&str> = remote.iter().map(|r| r.id.as_str()).collect();
    local
        .iter()
        .filter(|r| !remote_ids.contains(r.id.as_str()) && now - r.updated_at > window_ms)
        .map(|r| r.id.clone())
        .collect()
}

/// Resolve a conflict between two versions of the same record.
fn resolve_conflict(
    local: &SyncRecord,
    remote: &SyncRecord,
    strategy: ConflictStrategy,
    now: i64,
) -> SyncRecord {
    match strategy {
        ConflictStrategy::ServerWins => remote.clone(),
        ConflictStrategy::ClientWins => local.clone(),
        ConflictStrategy::LastWriteWins => {
            if remote.updated_at > local.updated_at {
                remote.clone()
            } else {
                // Ties keep the local copy
                local.clone()
            }
        }
        ConflictStrategy::Merge => {
            let mut fields = local.fields.clone();
            for (key, value) in &remote.fields {
                fields.insert(key.clone(), value.clone());
            }
            SyncRecord {
                id: local.id.clone(),
                fields,
                version: local.version.max(remote.version) + 1,
                updated_at: now,
            }
        }
    }
}

/// Merge a remote delta into local records under a conflict strategy.
///
/// Returns the merged collection and one [`ConflictEntry`] per record where
/// both sides diverged.
pub fn merge_remote_delta(
    collection: Collection,
    local: &[SyncRecord],
    remote: &SyncDelta,
    strategy: ConflictStrategy,
    now: i64,
) -> (Vec<SyncRecord>, Vec<ConflictEntry>) {
    let local_by_id: HashMap<&str, &SyncRecord> =
        local.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut conflicts = Vec::new();
    let mut resolved = SyncDelta {
        deleted: remote.deleted.clone(),
        last_synced: remote.last_synced,
        ..Default::default()
    };

    for incoming in remote.added.iter().chain(remote.updated.iter()) {
        match local_by_id.get(incoming.id.as_str()) {
            Some(existing) if **existing != *incoming => {
                let winner = resolve_conflict(existing, incoming, strategy, now);
                conflicts.push(ConflictEntry {
                    collection,
                    id: incoming.id.clone(),
                    local: (*existing).clone(),
                    remote: incoming.clone(),
                    strategy,
                    resolved: true,
                });
                resolved.updated.push(winner);
            }
            _ => resolved.added.push(incoming.clone()),
        }
    }

    (apply_delta(local, &resolved), conflicts)
}

/// The delta sync engine.
///
/// Generic over the storage backend; the remote boundary is a trait object
/// so tests can drive the cycle with an in-process fake service.
pub struct DeltaSyncEngine<S: SyncStorage> {
    storage: S,
    remote: Box<dyn RemoteSyncApi>,
    user_id: String,
    strategy: ConflictStrategy,
    syncing: AtomicBool,
    last_sync_error: Mutex<Option<String>>,
}

impl<S: SyncStorage> DeltaSyncEngine<S> {
    pub fn new(
        storage: S,
        remote: Box<dyn RemoteSyncApi>,
        user_id: impl Into<String>,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            storage,
            remote,
            user_id: user_id.into(),
            strategy,
            syncing: AtomicBool::new(false),
            last_sync_error: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Error message from the most recent failed cycle, if any.
    pub fn last_sync_error(&self) -> Option<String> {
        self.last_sync_error.lock().unwrap().clone()
    }

    /// Whether a sync cycle is currently running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Run a full sync cycle across all collections.
    ///
    /// Single-flight: returns `SyncInProgress` if a cycle is already
    /// running. Any other failure, including the device being offline,
    /// comes back as a report with `success: false` and the error set; the
    /// local snapshot is left untouched and the error is retained for
    /// [`Self::last_sync_error`].
    pub async fn sync_all(&self) -> Result<SyncCycleReport> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DriftError::SyncInProgress);
        }

        let result = self.run_cycle().await;
        self.syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(report) => {
                *self.last_sync_error.lock().unwrap() = None;
                info!(
                    "[DeltaSync] cycle complete: {} conflicts across {} collections",
                    report.conflicts.len(),
                    report.collections.len()
                );
                Ok(report)
            }
            Err(e) => {
                warn!("[DeltaSync] cycle failed: {}", e);
                *self.last_sync_error.lock().unwrap() = Some(e.to_string());
                Ok(SyncCycleReport::failure(
                    chrono::Utc::now().timestamp_millis(),
                    e.to_string(),
                ))
            }
        }
    }

    async fn run_cycle(&self) -> Result<SyncCycleReport> {
        if !self.remote.is_online().await {
            return Err(DriftError::DeviceOffline);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut data = self.storage.get_all_sync_data()?.unwrap_or_default();
        let mut state = self.storage.load_state()?;
        let since = state.last_sync_time;

        let mut outcomes = Vec::new();
        let mut all_conflicts = Vec::new();
        let mut synced_ids: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for collection in Collection::ALL {
            let local = collection_records(&data, collection).to_vec();

            let remote_delta = self
                .remote
                .fetch_delta(&self.user_id, collection, since)
                .await
                .map_err(DriftError::RemoteFetch)?;
            let pulled =
                remote_delta.added.len() + remote_delta.updated.len() + remote_delta.deleted.len();

            let (mut merged, conflicts) =
                merge_remote_delta(collection, &local, &remote_delta, self.strategy, now);

            // Ids the server knew at the last cycle but the local collection
            // no longer holds were deleted here since then
            let baseline = state
                .synced_ids
                .get(collection.as_str())
                .cloned()
                .unwrap_or_default();
            let local_ids: HashSet<&str> = local.iter().map(|r| r.id.as_str()).collect();
            let remote_tombstones: HashSet<&str> =
                remote_delta.deleted.iter().map(String::as_str).collect();
            let deleted_locally: Vec<String> = baseline
                .iter()
                .filter(|id| {
                    !local_ids.contains(id.as_str()) && !remote_tombstones.contains(id.as_str())
                })
                .cloned()
                .collect();
            merged.retain(|r| !deleted_locally.contains(&r.id));

            let mut push = outgoing_delta(&merged, &remote_delta, since);
            push.deleted = deleted_locally;
            push.last_synced = now;

            let pushed = push.added.len() + push.updated.len();
            let deleted = push.deleted.len();
            if !push.is_empty() {
                self.remote
                    .push_delta(&self.user_id, collection, &push)
                    .await
                    .map_err(DriftError::RemotePush)?;
            }

            debug!(
                "[DeltaSync] {}: pulled={} pushed={} deleted={} conflicts={}",
                collection,
                pulled,
                pushed,
                deleted,
                conflicts.len()
            );

            synced_ids.insert(
                collection.as_str().to_string(),
                merged.iter().map(|r| r.id.clone()).collect(),
            );
            *collection_records_mut(&mut data, collection) = merged;
            outcomes.push(CollectionOutcome {
                collection: collection.as_str().to_string(),
                pulled,
                pushed,
                deleted,
                conflicts: conflicts.len(),
            });
            all_conflicts.extend(conflicts);
        }

        // All collections succeeded; persist the merged snapshot and state
        data.last_synced = now;
        data.version += 1;
        self.storage.save_all_sync_data(&data)?;
        state.last_sync_time = now;
        state.synced_ids = synced_ids;
        self.storage.save_state(&state)?;

        Ok(SyncCycleReport::success(now, outcomes, all_conflicts))
    }
}

fn collection_records(data: &crate::storage::SyncData, collection: Collection) -> &[SyncRecord] {
    match collection {
        Collection::History => &data.history,
        Collection::Bookmarks => &data.bookmarks,
        Collection::BookmarkFolders => &data.bookmark_folders,
        Collection::Settings => &data.settings,
    }
}

fn collection_records_mut(
    data: &mut crate::storage::SyncData,
    collection: Collection,
) -> &mut Vec<SyncRecord> {
    match collection {
        Collection::History => &mut data.history,
        Collection::Bookmarks => &mut data.bookmarks,
        Collection::BookmarkFolders => &mut data.bookmark_folders,
        Collection::Settings => &mut data.settings,
    }
}

/// Local changes the server has not seen: merged records newer than `since`
/// that did not arrive verbatim in the remote delta.
fn outgoing_delta(merged: &[SyncRecord], remote: &SyncDelta, since: i64) -> SyncDelta {
    let remote_by_id: HashMap<&str, &SyncRecord> = remote
        .added
        .iter()
        .chain(remote.updated.iter())
        .map(|r| (r.id.as_str(), r))
        .collect();

    let mut out = SyncDelta::default();
    for record in merged {
        if record.updated_at <= since {
            continue;
        }
        match remote_by_id.get(record.id.as_str()) {
            Some(incoming) if **incoming == *record => {}
            Some(_) => out.updated.push(record.clone()),
            None => out.added.push(record.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, SyncData};
    use remote::BoxFuture;
    use serde_json::json;
    use std::sync::Arc;

    fn record(id: &str, version: u32, updated_at: i64) -> SyncRecord {
        SyncRecord {
            id: id.to_string(),
            fields: BTreeMap::from([("value".to_string(), json!(format!("v{}", version)))]),
            version,
            updated_at,
        }
    }

    #[test]
    fn test_calculate_delta_classifies_changes() {
        let old = vec![record("a", 1, 10), record("b", 1, 10), record("c", 1, 10)];
        let new = vec![record("a", 2, 20), record("b", 1, 10), record("d", 1, 20)];

        let delta = calculate_delta(&old, &new, 15);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].id, "d");
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.updated[0].id, "a");
        assert_eq!(delta.deleted, vec!["c".to_string()]);
    }

    #[test]
    fn test_calculate_delta_respects_since_cutoff() {
        let old = vec![record("a", 1, 10)];
        let new = vec![record("a", 2, 12)];
        // Changed but before the cutoff: already pushed by an earlier cycle
        let delta = calculate_delta(&old, &new, 12);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_apply_delta_is_idempotent() {
        let base = vec![record("a", 1, 10), record("b", 1, 10)];
        let delta = SyncDelta {
            added: vec![record("c", 1, 20)],
            updated: vec![record("a", 2, 20)],
            deleted: vec!["b".to_string()],
            last_synced: 20,
        };

        let once = apply_delta(&base, &delta);
        let twice = apply_delta(&once, &delta);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].version, 2);
        assert!(once.iter().any(|r| r.id == "c"));
        assert!(!once.iter().any(|r| r.id == "b"));
    }

    #[test]
    fn test_detect_deletions_honors_window() {
        let day = 24 * 60 * 60 * 1000i64;
        let now = 100 * day;
        let local = vec![
            record("old", 1, now - 8 * day),
            record("fresh", 1, now - day),
        ];
        let remote: Vec<SyncRecord> = vec![];

        let deleted = detect_deletions(&local, &remote, now, DELETION_WINDOW_MS);
        // A one-day-old record missing remotely may just not have synced yet
        assert_eq!(deleted, vec!["old".to_string()]);
    }

    #[test]
    fn test_detect_deletions_with_configured_window() {
        let day = 24 * 60 * 60 * 1000i64;
        let now = 100 * day;
        let config = crate::Config {
            deletion_window_days: 2,
            ..Default::default()
        };
        let local = vec![
            record("old", 1, now - 3 * day),
            record("fresh", 1, now - day),
        ];

        let deleted = detect_deletions(&local, &[], now, config.deletion_window_ms());
        assert_eq!(deleted, vec!["old".to_string()]);
    }

    #[test]
    fn test_last_write_wins_prefers_newer_side() {
        let local = record("a", 2, 100);
        let remote = record("a", 1, 90);
        let winner = resolve_conflict(&local, &remote, ConflictStrategy::LastWriteWins, 200);
        assert_eq!(winner, local);

        let newer_remote = record("a", 3, 150);
        let winner = resolve_conflict(&local, &newer_remote, ConflictStrategy::LastWriteWins, 200);
        assert_eq!(winner, newer_remote);
    }

    #[test]
    fn test_last_write_wins_tie_keeps_local() {
        let mut local = record("a", 1, 100);
        local.fields.insert("value".to_string(), json!("local"));
        let mut remote = record("a", 1, 100);
        remote.fields.insert("value".to_string(), json!("remote"));
        let winner = resolve_conflict(&local, &remote, ConflictStrategy::LastWriteWins, 200);
        assert_eq!(winner.fields["value"], json!("local"));
    }

    #[test]
    fn test_merge_strategy_unions_fields() {
        let mut local = record("a", 2, 100);
        local.fields.insert("title".to_string(), json!("Local"));
        let mut remote = record("a", 3, 90);
        remote.fields.insert("url".to_string(), json!("https://r"));

        let merged = resolve_conflict(&local, &remote, ConflictStrategy::Merge, 200);
        // Remote wins overlapping keys; both sides' unique keys survive
        assert_eq!(merged.fields["value"], json!("v3"));
        assert_eq!(merged.fields["title"], json!("Local"));
        assert_eq!(merged.fields["url"], json!("https://r"));
        assert_eq!(merged.version, 4);
        assert_eq!(merged.updated_at, 200);
    }

    #[test]
    fn test_merge_remote_delta_records_conflicts() {
        let local = vec![record("a", 2, 100), record("b", 1, 10)];
        let remote = SyncDelta {
            updated: vec![record("a", 1, 90), record("c", 1, 95)],
            ..Default::default()
        };

        let (merged, conflicts) = merge_remote_delta(
            Collection::Bookmarks,
            &local,
            &remote,
            ConflictStrategy::LastWriteWins,
            200,
        );

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, "a");
        assert_eq!(conflicts[0].collection, Collection::Bookmarks);
        // Local a wins, c arrives fresh, b untouched
        let a = merged.iter().find(|r| r.id == "a").unwrap();
        assert_eq!(a.version, 2);
        assert_eq!(merged.len(), 3);
    }

    /// In-process fake service for cycle tests.
    struct FakeRemote {
        online: bool,
        deltas: Mutex<HashMap<Collection, SyncDelta>>,
        pushes: Arc<Mutex<Vec<(Collection, SyncDelta)>>>,
    }

    impl FakeRemote {
        fn new(online: bool) -> Self {
            Self {
                online,
                deltas: Mutex::new(HashMap::new()),
                pushes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn stage(&self, collection: Collection, delta: SyncDelta) {
            self.deltas.lock().unwrap().insert(collection, delta);
        }
    }

    impl RemoteSyncApi for FakeRemote {
        fn fetch_delta(
            &self,
            _user_id: &str,
            collection: Collection,
            _since: i64,
        ) -> BoxFuture<'_, std::result::Result<SyncDelta, String>> {
            let delta = self
                .deltas
                .lock()
                .unwrap()
                .get(&collection)
                .cloned()
                .unwrap_or_default();
            Box::pin(async move { Ok(delta) })
        }

        fn push_delta(
            &self,
            _user_id: &str,
            collection: Collection,
            delta: &SyncDelta,
        ) -> BoxFuture<'_, std::result::Result<(), String>> {
            self.pushes.lock().unwrap().push((collection, delta.clone()));
            Box::pin(async move { Ok(()) })
        }

        fn is_online(&self) -> BoxFuture<'_, bool> {
            let online = self.online;
            Box::pin(async move { online })
        }
    }

    #[tokio::test]
    async fn test_sync_all_offline_reports_failure() {
        let engine = DeltaSyncEngine::new(
            MemoryStorage::new(),
            Box::new(FakeRemote::new(false)),
            "user-1",
            ConflictStrategy::LastWriteWins,
        );
        let report = engine.sync_all().await.unwrap();
        assert!(!report.success);
        assert_eq!(
            report.error.as_deref(),
            Some(DriftError::DeviceOffline.to_string().as_str())
        );
        assert!(report.collections.is_empty());
        assert!(engine.last_sync_error().is_some());
        // Storage left untouched
        assert!(engine.storage().get_all_sync_data().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_all_pulls_merges_and_pushes() {
        let storage = MemoryStorage::new();
        let mut data = SyncData::default();
        let now = chrono::Utc::now().timestamp_millis();
        data.bookmarks.push(record("local-only", 1, now));
        data.bookmarks.push(record("shared", 2, now));
        storage.save_all_sync_data(&data).unwrap();

        let fake = FakeRemote::new(true);
        let pushes = fake.pushes.clone();
        fake.stage(
            Collection::Bookmarks,
            SyncDelta {
                added: vec![record("remote-only", 1, now - 50)],
                updated: vec![record("shared", 1, now - 100)],
                ..Default::default()
            },
        );

        let engine = DeltaSyncEngine::new(
            storage,
            Box::new(fake),
            "user-1",
            ConflictStrategy::LastWriteWins,
        );
        let report = engine.sync_all().await.unwrap();
        assert!(report.success);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].id, "shared");

        // Merged snapshot has all three records, local copy of the conflict
        let data = engine.storage().get_all_sync_data().unwrap().unwrap();
        assert_eq!(data.bookmarks.len(), 3);
        let shared = data.bookmarks.iter().find(|r| r.id == "shared").unwrap();
        assert_eq!(shared.version, 2);

        // Local-only and the winning shared copy were pushed
        let pushes = pushes.lock().unwrap();
        let (_, push) = pushes
            .iter()
            .find(|(c, _)| *c == Collection::Bookmarks)
            .unwrap();
        let pushed_ids: Vec<&str> = push
            .added
            .iter()
            .chain(push.updated.iter())
            .map(|r| r.id.as_str())
            .collect();
        assert!(pushed_ids.contains(&"local-only"));
        assert!(pushed_ids.contains(&"shared"));
        assert!(!pushed_ids.contains(&"remote-only"));
    }

    #[tokio::test]
    async fn test_sync_all_pushes_local_deletions() {
        let storage = MemoryStorage::new();
        let now = chrono::Utc::now().timestamp_millis();
        let mut data = SyncData::default();
        data.history.push(record("kept", 1, now));
        storage.save_all_sync_data(&data).unwrap();
        // The last cycle knew two records; one is gone locally now
        let mut state = storage.load_state().unwrap();
        state.synced_ids.insert(
            "history".to_string(),
            vec!["kept".to_string(), "gone".to_string()],
        );
        storage.save_state(&state).unwrap();

        let fake = FakeRemote::new(true);
        let pushes = fake.pushes.clone();
        let engine = DeltaSyncEngine::new(
            storage,
            Box::new(fake),
            "user-1",
            ConflictStrategy::LastWriteWins,
        );
        engine.sync_all().await.unwrap();

        let pushes = pushes.lock().unwrap();
        let (_, push) = pushes
            .iter()
            .find(|(c, _)| *c == Collection::History)
            .unwrap();
        assert_eq!(push.deleted, vec!["gone".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_all_is_single_flight() {
        struct StallingRemote;
        impl RemoteSyncApi for StallingRemote {
            fn fetch_delta(
                &self,
                _user_id: &str,
                _collection: Collection,
                _since: i64,
            ) -> BoxFuture<'_, std::result::Result<SyncDelta, String>> {
                Box::pin(async {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    Ok(SyncDelta::default())
                })
            }
            fn push_delta(
                &self,
                _user_id: &str,
                _collection: Collection,
                _delta: &SyncDelta,
            ) -> BoxFuture<'_, std::result::Result<(), String>> {
                Box::pin(async { Ok(()) })
            }
            fn is_online(&self) -> BoxFuture<'_, bool> {
                Box::pin(async { true })
            }
        }

        let engine = Arc::new(DeltaSyncEngine::new(
            MemoryStorage::new(),
            Box::new(StallingRemote),
            "user-1",
            ConflictStrategy::LastWriteWins,
        ));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_all().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(matches!(
            engine.sync_all().await,
            Err(DriftError::SyncInProgress)
        ));
        assert!(first.await.unwrap().is_ok());
        // The flag is released; a third cycle may run
        assert!(engine.sync_all().await.is_ok());
    }

    #[tokio::test]
    async fn test_sync_all_fetch_failure_leaves_snapshot_untouched() {
        struct FailingRemote;
        impl RemoteSyncApi for FailingRemote {
            fn fetch_delta(
                &self,
                _user_id: &str,
                _collection: Collection,
                _since: i64,
            ) -> BoxFuture<'_, std::result::Result<SyncDelta, String>> {
                Box::pin(async { Err("boom".to_string()) })
            }
            fn push_delta(
                &self,
                _user_id: &str,
                _collection: Collection,
                _delta: &SyncDelta,
            ) -> BoxFuture<'_, std::result::Result<(), String>> {
                Box::pin(async { Ok(()) })
            }
            fn is_online(&self) -> BoxFuture<'_, bool> {
                Box::pin(async { true })
            }
        }

        let storage = MemoryStorage::new();
        let mut data = SyncData::default();
        data.settings.push(record("theme", 1, 50));
        data.last_synced = 50;
        storage.save_all_sync_data(&data).unwrap();

        let engine = DeltaSyncEngine::new(
            storage,
            Box::new(FailingRemote),
            "user-1",
            ConflictStrategy::LastWriteWins,
        );
        let report = engine.sync_all().await.unwrap();
        assert!(!report.success);
        let error = report.error.unwrap();
        assert!(error.contains("Failed to fetch remote delta"));
        assert!(error.contains("boom"));
        assert_eq!(engine.last_sync_error().unwrap(), error);

        let after = engine.storage().get_all_sync_data().unwrap().unwrap();
        assert_eq!(after, data);
        assert_eq!(engine.storage().load_state().unwrap().last_sync_time, 0);
    }
}
