use atomline_common::{CheckpointId, SnapshotId};
use atomline_store::AtomRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Oldest checkpoints are evicted past this count.
    pub max_checkpoints: usize,
    /// Checkpoints older than this are evicted.
    pub checkpoint_timeout_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: 10,
            checkpoint_timeout_ms: 300_000,
        }
    }
}

/// The value one atom held just before a restoration wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub atom: AtomRef,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub committed: bool,
    pub created_at: u64,
    /// The snapshot whose restoration created this checkpoint.
    pub snapshot_id: Option<SnapshotId>,
}

/// Prior values of every atom a restoration touched, in capture order.
/// Rollback replays them in reverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub previous_values: Vec<CheckpointEntry>,
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    pub fn new(id: CheckpointId, created_at: u64, snapshot_id: Option<SnapshotId>) -> Self {
        Self {
            id,
            previous_values: Vec::new(),
            metadata: CheckpointMetadata {
                committed: false,
                created_at,
                snapshot_id,
            },
        }
    }

    pub fn record(&mut self, atom: AtomRef, value: Value) {
        self.previous_values.push(CheckpointEntry { atom, value });
    }

    /// Recorded value for the atom with this name.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.previous_values
            .iter()
            .find(|e| e.atom.name == name)
            .map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.previous_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous_values.is_empty()
    }

    pub fn is_expired(&self, now: u64, timeout_ms: u64) -> bool {
        now.saturating_sub(self.metadata.created_at) > timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomline_common::{IdGenerator, SequentialIds};
    use serde_json::json;

    #[test]
    fn records_in_order_and_looks_up_by_name() {
        let ids = SequentialIds::new();
        let mut checkpoint = Checkpoint::new(ids.checkpoint_id(), 100, None);
        for (i, name) in ["a", "b"].into_iter().enumerate() {
            let atom = AtomRef {
                id: format!("atom-{i}"),
                name: name.into(),
            };
            checkpoint.record(atom, json!(i));
        }
        assert_eq!(checkpoint.len(), 2);
        assert_eq!(checkpoint.previous_values[0].atom.name, "a");
        assert_eq!(checkpoint.value_of("b"), Some(&json!(1)));
        assert_eq!(checkpoint.value_of("c"), None);
        assert!(!checkpoint.metadata.committed);
    }

    #[test]
    fn expiry_is_strictly_after_timeout() {
        let ids = SequentialIds::new();
        let checkpoint = Checkpoint::new(ids.checkpoint_id(), 100, None);
        assert!(!checkpoint.is_expired(600, 500));
        assert!(checkpoint.is_expired(601, 500));
    }
}
