use std::collections::BTreeMap;

use atomline_common::{AtomKind, SnapshotId, StateEntry, StateMap, estimate_value_size};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fixed bookkeeping cost charged per state entry or change in size estimates.
pub const ENTRY_OVERHEAD: usize = 48;

/// Metadata common to every captured snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Capture time in ms.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub atom_count: usize,
    /// SHA-256 of the canonical JSON state, when recorded at capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// A snapshot that carries the entire state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSnapshot {
    pub id: SnapshotId,
    pub state: StateMap,
    pub metadata: SnapshotMetadata,
}

impl FullSnapshot {
    /// Build a captured snapshot. The fingerprint is computed from `state`.
    pub fn capture(id: SnapshotId, state: StateMap, timestamp: u64, action: Option<String>) -> Self {
        let fingerprint = Some(fingerprint_state(&state));
        Self {
            id,
            metadata: SnapshotMetadata {
                timestamp,
                action,
                atom_count: state.len(),
                fingerprint,
            },
            state,
        }
    }

    /// Verify the recorded fingerprint, if any, against the current state.
    pub fn verify(&self) -> bool {
        match &self.metadata.fingerprint {
            Some(expected) => *expected == fingerprint_state(&self.state),
            None => true,
        }
    }

    pub fn estimated_size(&self) -> usize {
        estimate_state_size(&self.state)
    }
}

/// How an atom changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// One atom-level change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom_id: Option<String>,
    pub atom_name: String,
    pub kind: AtomKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
}

impl DeltaChange {
    pub fn estimated_size(&self) -> usize {
        ENTRY_OVERHEAD
            + self.atom_name.len() * 2
            + self.old_value.as_ref().map_or(0, estimate_value_size)
            + self.new_value.as_ref().map_or(0, estimate_value_size)
    }

    /// The state entry this change upserts. `None` for deletions.
    pub fn to_entry(&self) -> Option<StateEntry> {
        if self.change_type == ChangeType::Deleted {
            return None;
        }
        Some(StateEntry {
            value: self.new_value.clone().unwrap_or(Value::Null),
            kind: self.kind,
            name: self.atom_name.clone(),
            atom_id: self.atom_id.clone(),
        })
    }
}

/// Metadata for a delta snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaMetadata {
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Atom count of the state this delta produces.
    pub atom_count: usize,
    pub base_timestamp: u64,
    pub change_count: usize,
    /// Estimated size of the changes.
    pub compressed_size: usize,
    /// Estimated size of the full state the delta stands in for.
    pub original_size: usize,
}

/// A snapshot stored as changes against a base snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSnapshot {
    pub id: SnapshotId,
    pub base_snapshot_id: SnapshotId,
    pub changes: BTreeMap<String, DeltaChange>,
    pub metadata: DeltaMetadata,
}

impl DeltaSnapshot {
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn estimated_size(&self) -> usize {
        self.changes
            .iter()
            .map(|(name, change)| name.len() * 2 + change.estimated_size())
            .sum()
    }
}

/// A point-in-time capture, stored in full or as a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Snapshot {
    Full(FullSnapshot),
    Delta(DeltaSnapshot),
}

impl Snapshot {
    pub fn id(&self) -> SnapshotId {
        match self {
            Self::Full(s) => s.id,
            Self::Delta(d) => d.id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Full(s) => s.metadata.timestamp,
            Self::Delta(d) => d.metadata.timestamp,
        }
    }

    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Full(s) => s.metadata.action.as_deref(),
            Self::Delta(d) => d.metadata.action.as_deref(),
        }
    }

    pub fn atom_count(&self) -> usize {
        match self {
            Self::Full(s) => s.metadata.atom_count,
            Self::Delta(d) => d.metadata.atom_count,
        }
    }

    /// The carried state. Deltas carry none.
    pub fn state(&self) -> Option<&StateMap> {
        match self {
            Self::Full(s) => Some(&s.state),
            Self::Delta(_) => None,
        }
    }

    /// The anchoring full snapshot. `None` for full snapshots.
    pub fn base_snapshot_id(&self) -> Option<SnapshotId> {
        match self {
            Self::Full(_) => None,
            Self::Delta(d) => Some(d.base_snapshot_id),
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Delta(_))
    }

    pub fn as_full(&self) -> Option<&FullSnapshot> {
        match self {
            Self::Full(s) => Some(s),
            Self::Delta(_) => None,
        }
    }

    pub fn as_delta(&self) -> Option<&DeltaSnapshot> {
        match self {
            Self::Full(_) => None,
            Self::Delta(d) => Some(d),
        }
    }

    pub fn estimated_size(&self) -> usize {
        match self {
            Self::Full(s) => s.estimated_size(),
            Self::Delta(d) => d.estimated_size(),
        }
    }
}

impl From<FullSnapshot> for Snapshot {
    fn from(s: FullSnapshot) -> Self {
        Self::Full(s)
    }
}

impl From<DeltaSnapshot> for Snapshot {
    fn from(d: DeltaSnapshot) -> Self {
        Self::Delta(d)
    }
}

/// Estimated size of a whole state map.
pub fn estimate_state_size(state: &StateMap) -> usize {
    state
        .iter()
        .map(|(name, entry)| ENTRY_OVERHEAD + name.len() * 2 + estimate_value_size(&entry.value))
        .sum()
}

/// SHA-256 hex digest of the canonical JSON encoding of a state map.
pub fn fingerprint_state(state: &StateMap) -> String {
    let mut hasher = Sha256::new();
    match serde_json::to_vec(state) {
        Ok(bytes) => hasher.update(&bytes),
        Err(_) => hasher.update(format!("{state:?}").as_bytes()),
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomline_common::{IdGenerator, SequentialIds};
    use serde_json::json;

    fn state(pairs: &[(&str, Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), StateEntry::new(*k, v.clone())))
            .collect()
    }

    #[test]
    fn capture_records_count_and_fingerprint() {
        let ids = SequentialIds::new();
        let snap = FullSnapshot::capture(
            ids.snapshot_id(),
            state(&[("a", json!(1)), ("b", json!("x"))]),
            100,
            Some("init".into()),
        );
        assert_eq!(snap.metadata.atom_count, 2);
        assert!(snap.metadata.fingerprint.is_some());
        assert!(snap.verify());
    }

    #[test]
    fn tampered_state_fails_verification() {
        let ids = SequentialIds::new();
        let mut snap = FullSnapshot::capture(ids.snapshot_id(), state(&[("a", json!(1))]), 0, None);
        snap.state.get_mut("a").unwrap().value = json!(2);
        assert!(!snap.verify());
    }

    #[test]
    fn fingerprint_is_order_independent_of_insertion() {
        let mut s1 = StateMap::new();
        s1.insert("a".into(), StateEntry::new("a", json!(1)));
        s1.insert("b".into(), StateEntry::new("b", json!(2)));
        let mut s2 = StateMap::new();
        s2.insert("b".into(), StateEntry::new("b", json!(2)));
        s2.insert("a".into(), StateEntry::new("a", json!(1)));
        assert_eq!(fingerprint_state(&s1), fingerprint_state(&s2));
    }

    #[test]
    fn snapshot_accessors() {
        let ids = SequentialIds::new();
        let full = FullSnapshot::capture(ids.snapshot_id(), state(&[("a", json!(1))]), 7, None);
        let snap = Snapshot::from(full.clone());
        assert_eq!(snap.id(), full.id);
        assert_eq!(snap.timestamp(), 7);
        assert!(snap.state().is_some());
        assert!(snap.base_snapshot_id().is_none());
        assert!(!snap.is_delta());
    }

    #[test]
    fn deleted_change_has_no_entry() {
        let change = DeltaChange {
            atom_id: None,
            atom_name: "a".into(),
            kind: AtomKind::Primitive,
            old_value: Some(json!(1)),
            new_value: None,
            change_type: ChangeType::Deleted,
            path: None,
        };
        assert!(change.to_entry().is_none());
    }
}
