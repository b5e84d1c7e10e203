use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a snapshot (full or delta).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

/// Unique identifier for a restoration checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointId(pub Uuid);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap-{}", self.0.simple())
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ckpt-{}", self.0.simple())
    }
}

/// Source of fresh identifiers.
///
/// Injected into every component that mints ids so that ordering and
/// uniqueness can be made deterministic under test.
pub trait IdGenerator: Send + Sync {
    fn next_uuid(&self) -> Uuid;

    fn snapshot_id(&self) -> SnapshotId {
        SnapshotId(self.next_uuid())
    }

    fn checkpoint_id(&self) -> CheckpointId {
        CheckpointId(self.next_uuid())
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Monotonic counter encoded as a UUID. Ids sort in creation order.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_uuid(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u128(n as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique() {
        let ids = RandomIds;
        assert_ne!(ids.snapshot_id(), ids.snapshot_id());
    }

    #[test]
    fn sequential_ids_sort_in_creation_order() {
        let ids = SequentialIds::new();
        let a = ids.snapshot_id();
        let b = ids.snapshot_id();
        let c = ids.checkpoint_id();
        assert!(a < b);
        assert_eq!(c.0, Uuid::from_u128(3));
    }

    #[test]
    fn display_is_prefixed() {
        let ids = SequentialIds::new();
        assert!(ids.snapshot_id().to_string().starts_with("snap-"));
        assert!(ids.checkpoint_id().to_string().starts_with("ckpt-"));
    }
}
