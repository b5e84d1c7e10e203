use atomline_common::{CheckpointId, SnapshotId};
use atomline_store::StoreError;
use thiserror::Error;

/// Errors reported by restoration and rollback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RestoreError {
    /// The snapshot is malformed. Raised before any atom is written.
    #[error("snapshot {snapshot} failed validation: {reason}")]
    Validation { snapshot: SnapshotId, reason: String },

    /// An atom's current value could not be read, so it cannot be rolled
    /// back. Raised before any atom is written.
    #[error("cannot checkpoint atom {atom}: {source}")]
    Checkpoint { atom: String, source: StoreError },

    #[error("atom not found: {0}")]
    AtomNotFound(String),

    /// Writing one atom failed.
    #[error("failed to restore atom {atom}: {source}")]
    Apply { atom: String, source: StoreError },

    #[error("restoration took {elapsed_ms}ms, budget was {budget_ms}ms")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("checkpoint {0} not found")]
    CheckpointNotFound(CheckpointId),
}
