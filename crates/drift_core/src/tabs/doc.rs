//! Tab board CRDT document.
//!
//! This module provides [`TabBoard`], which wraps a yrs [`Doc`] to hold the
//! shared tab state as a conflict-free replicated data type.
//!
//! # Structure
//!
//! ```text
//! Y.Doc
//! ├── Y.Map "tabs"   → tab id → TabView JSON (order field gives position)
//! ├── Y.Map "state"  → "active" → tab id (last-writer-wins register)
//! └── Y.Map "groups" → group id → GroupView JSON
//! ```
//!
//! Tabs and groups are stored as JSON strings keyed by id rather than as a
//! Y array: each record merges last-writer-wins per id, so two replicas
//! rewriting the whole board concurrently converge without duplicating
//! entries. Display order travels inside each tab record as an `order`
//! field and the projection sorts by it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, MapRef, ReadTxn, StateVector, Transact, TransactionMut, Update};

use crate::error::{DriftError, Result};

const TABS_MAP_NAME: &str = "tabs";
const STATE_MAP_NAME: &str = "state";
const GROUPS_MAP_NAME: &str = "groups";
const ACTIVE_KEY: &str = "active";

/// One open tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabView {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Position in the tab strip; stamped from the view's vec order on
    /// every local write.
    #[serde(default)]
    pub order: u32,
}

/// A named tab group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub tab_ids: Vec<String>,
}

/// Plain snapshot of the whole board, as the UI consumes it.
///
/// Tabs are ordered by their `order` field; groups by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub tabs: Vec<TabView>,
    pub active_id: Option<String>,
    pub groups: Vec<GroupView>,
}

/// A CRDT document representing the tab board.
pub struct TabBoard {
    doc: Doc,
    tabs: MapRef,
    state: MapRef,
    groups: MapRef,
}

impl TabBoard {
    pub fn new() -> Self {
        let doc = Doc::new();
        let tabs = doc.get_or_insert_map(TABS_MAP_NAME);
        let state = doc.get_or_insert_map(STATE_MAP_NAME);
        let groups = doc.get_or_insert_map(GROUPS_MAP_NAME);
        Self {
            doc,
            tabs,
            state,
            groups,
        }
    }

    /// Reconstruct a board from a full state update.
    pub fn from_state(state: &[u8]) -> Result<Self> {
        let board = Self::new();
        if !state.is_empty() {
            board.apply_update(state)?;
        }
        Ok(board)
    }

    /// Replace the local board content with `view`, returning the
    /// incremental update that encodes the change, or an empty vec when
    /// the view already matches the board.
    ///
    /// The whole rewrite happens in one transaction, so remote peers see it
    /// as a single update. Only records that actually differ are written,
    /// which keeps untouched tabs out of the update and out of
    /// last-writer conflicts with concurrent edits on other replicas.
    pub fn apply_local(&self, view: &BoardView) -> Result<Vec<u8>> {
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        let mut changed = false;
        {
            let mut txn = self.doc.transact_mut();

            let mut desired_tabs = HashMap::with_capacity(view.tabs.len());
            for (index, tab) in view.tabs.iter().enumerate() {
                let mut record = tab.clone();
                record.order = index as u32;
                desired_tabs.insert(record.id.clone(), serde_json::to_string(&record)?);
            }
            changed |= sync_json_map(&self.tabs, &mut txn, &desired_tabs);

            let mut desired_groups = HashMap::with_capacity(view.groups.len());
            for group in &view.groups {
                desired_groups.insert(group.id.clone(), serde_json::to_string(group)?);
            }
            changed |= sync_json_map(&self.groups, &mut txn, &desired_groups);

            let current = self
                .state
                .get(&txn, ACTIVE_KEY)
                .map(|value| value.to_string(&txn));
            match &view.active_id {
                Some(id) if current.as_deref() != Some(id.as_str()) => {
                    self.state.insert(&mut txn, ACTIVE_KEY, id.as_str());
                    changed = true;
                }
                None if current.is_some() => {
                    self.state.remove(&mut txn, ACTIVE_KEY);
                    changed = true;
                }
                _ => {}
            }
        }

        if !changed {
            return Ok(Vec::new());
        }
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv_before))
    }

    /// Set only the active tab register, returning the incremental update,
    /// or an empty vec when the register already holds `id`.
    pub fn set_active(&self, id: Option<&str>) -> Result<Vec<u8>> {
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        let changed = {
            let mut txn = self.doc.transact_mut();
            let current = self
                .state
                .get(&txn, ACTIVE_KEY)
                .map(|value| value.to_string(&txn));
            match id {
                Some(id) if current.as_deref() != Some(id) => {
                    self.state.insert(&mut txn, ACTIVE_KEY, id);
                    true
                }
                None if current.is_some() => {
                    self.state.remove(&mut txn, ACTIVE_KEY);
                    true
                }
                _ => false,
            }
        };

        if !changed {
            return Ok(Vec::new());
        }
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv_before))
    }

    /// Project the CRDT into a plain [`BoardView`].
    ///
    /// Records whose JSON fails to parse are skipped rather than failing
    /// the whole projection. Tab order ties break on id so the projection
    /// stays deterministic when concurrent rewrites assign the same slot.
    pub fn project(&self) -> BoardView {
        let txn = self.doc.transact();

        let mut tabs: Vec<TabView> = self
            .tabs
            .iter(&txn)
            .filter_map(|(_, value)| {
                let json = value.to_string(&txn);
                serde_json::from_str(&json).ok()
            })
            .collect();
        tabs.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        let mut groups: Vec<GroupView> = self
            .groups
            .iter(&txn)
            .filter_map(|(_, value)| {
                let json = value.to_string(&txn);
                serde_json::from_str(&json).ok()
            })
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));

        let active_id = self
            .state
            .get(&txn, ACTIVE_KEY)
            .map(|value| value.to_string(&txn));

        BoardView {
            tabs,
            active_id,
            groups,
        }
    }

    /// Apply a remote or replayed update. Idempotent.
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| DriftError::Crdt(format!("failed to decode update: {}", e)))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| DriftError::Crdt(format!("failed to apply update: {}", e)))?;
        Ok(())
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the updates a peer with `remote_sv` is missing.
    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_sv)
            .map_err(|e| DriftError::Crdt(format!("failed to decode state vector: {}", e)))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Encode the full board state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&Default::default())
    }
}

/// Reconcile a JSON-valued Y map with the desired key set: upsert entries
/// whose stored JSON differs, remove keys no longer present. Returns
/// whether anything was written.
fn sync_json_map(
    map: &MapRef,
    txn: &mut TransactionMut<'_>,
    desired: &HashMap<String, String>,
) -> bool {
    let mut changed = false;

    let stale: Vec<String> = map
        .iter(&*txn)
        .filter(|(key, _)| !desired.contains_key(*key))
        .map(|(key, _)| key.to_string())
        .collect();
    for key in stale {
        map.remove(txn, &key);
        changed = true;
    }

    for (key, json) in desired {
        let current = map.get(&*txn, key).map(|value| value.to_string(&*txn));
        if current.as_deref() != Some(json.as_str()) {
            map.insert(txn, key.as_str(), json.as_str());
            changed = true;
        }
    }
    changed
}

impl Default for TabBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TabBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabBoard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: &str, title: &str, order: u32) -> TabView {
        TabView {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{}", id),
            order,
        }
    }

    fn sample_view() -> BoardView {
        BoardView {
            tabs: vec![tab("t1", "One", 0), tab("t2", "Two", 1)],
            active_id: Some("t2".to_string()),
            groups: vec![GroupView {
                id: "g1".to_string(),
                name: "Work".to_string(),
                color: Some("#ff0000".to_string()),
                tab_ids: vec!["t1".to_string()],
            }],
        }
    }

    #[test]
    fn test_apply_local_and_project_roundtrip() {
        let board = TabBoard::new();
        let view = sample_view();
        let update = board.apply_local(&view).unwrap();
        assert!(!update.is_empty());
        assert_eq!(board.project(), view);
    }

    #[test]
    fn test_apply_local_noop_returns_empty_update() {
        let board = TabBoard::new();
        board.apply_local(&sample_view()).unwrap();
        assert!(board.apply_local(&sample_view()).unwrap().is_empty());
        assert!(board.set_active(Some("t2")).unwrap().is_empty());
    }

    #[test]
    fn test_update_transfers_between_boards() {
        let a = TabBoard::new();
        let b = TabBoard::new();

        let update = a.apply_local(&sample_view()).unwrap();
        b.apply_update(&update).unwrap();
        assert_eq!(b.project(), a.project());
    }

    #[test]
    fn test_apply_update_is_idempotent() {
        let a = TabBoard::new();
        let b = TabBoard::new();
        let update = a.apply_local(&sample_view()).unwrap();

        b.apply_update(&update).unwrap();
        let once = b.project();
        b.apply_update(&update).unwrap();
        assert_eq!(b.project(), once);
    }

    #[test]
    fn test_concurrent_boards_converge() {
        let a = TabBoard::new();
        let b = TabBoard::new();

        // Shared starting point
        let base = a.apply_local(&sample_view()).unwrap();
        b.apply_update(&base).unwrap();

        // Diverge: a renames a tab, b changes the active register
        let mut view_a = a.project();
        view_a.tabs[0].title = "Renamed".to_string();
        let update_a = a.apply_local(&view_a).unwrap();

        let update_b = b.set_active(Some("t1")).unwrap();

        // Cross-apply in opposite orders
        a.apply_update(&update_b).unwrap();
        b.apply_update(&update_a).unwrap();

        // Both replicas settle on the same board; the register picks one
        // writer, the rename survives either way
        assert_eq!(a.project(), b.project());
        assert_eq!(a.project().tabs[0].title, "Renamed");
        assert!(a.project().active_id.is_some());
    }

    #[test]
    fn test_concurrent_full_rewrites_do_not_duplicate_tabs() {
        let a = TabBoard::new();
        let b = TabBoard::new();

        let base = a.apply_local(&sample_view()).unwrap();
        b.apply_update(&base).unwrap();

        // While partitioned, both replicas push a full board snapshot:
        // a appends a third tab, b renames an existing one
        let mut view_a = a.project();
        view_a.tabs.push(tab("t3", "Three", 2));
        let update_a = a.apply_local(&view_a).unwrap();

        let mut view_b = b.project();
        view_b.tabs[0].title = "Renamed".to_string();
        let update_b = b.apply_local(&view_b).unwrap();

        a.apply_update(&update_b).unwrap();
        b.apply_update(&update_a).unwrap();

        let merged = a.project();
        assert_eq!(merged, b.project());
        assert_eq!(merged.tabs.len(), 3);
        let mut ids: Vec<&str> = merged.tabs.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_convergence_under_permuted_delivery() {
        let source = TabBoard::new();
        let mut updates = Vec::new();

        let mut view = BoardView::default();
        for i in 0..4u32 {
            view.tabs.push(tab(&format!("t{}", i), "Tab", i));
            view.active_id = Some(format!("t{}", i));
            updates.push(source.apply_local(&view).unwrap());
        }

        let forward = TabBoard::new();
        for update in &updates {
            forward.apply_update(update).unwrap();
        }
        let reversed = TabBoard::new();
        for update in updates.iter().rev() {
            reversed.apply_update(update).unwrap();
        }

        assert_eq!(forward.project(), reversed.project());
        assert_eq!(forward.project(), source.project());
    }

    #[test]
    fn test_encode_diff_sends_only_missing_updates() {
        let a = TabBoard::new();
        let b = TabBoard::new();

        let first = a.apply_local(&sample_view()).unwrap();
        b.apply_update(&first).unwrap();

        let mut view = a.project();
        view.active_id = None;
        a.apply_local(&view).unwrap();

        let diff = a.encode_diff(&b.encode_state_vector()).unwrap();
        b.apply_update(&diff).unwrap();
        assert_eq!(b.project(), a.project());
        assert_eq!(b.project().active_id, None);
    }

    #[test]
    fn test_from_state_restores_board() {
        let a = TabBoard::new();
        a.apply_local(&sample_view()).unwrap();

        let restored = TabBoard::from_state(&a.encode_state_as_update()).unwrap();
        assert_eq!(restored.project(), a.project());
    }

    #[test]
    fn test_reject_garbage_update() {
        let board = TabBoard::new();
        assert!(board.apply_update(&[0xff, 0xfe, 0xfd]).is_err());
    }
}
