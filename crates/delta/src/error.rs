//! Delta error types.

use atomline_common::SnapshotId;
use thiserror::Error;

/// Errors from delta application, chain lookup and reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// The delta is anchored to a different snapshot than the one given.
    #[error("delta is based on {actual}, expected {expected}")]
    BaseMismatch {
        expected: SnapshotId,
        actual: SnapshotId,
    },

    /// The delta carries no changes.
    #[error("delta {0} has no changes")]
    EmptyDelta(SnapshotId),

    /// No chain (active or sealed) is anchored to this base.
    #[error("no delta chain for base {0}")]
    ChainNotFound(SnapshotId),

    /// The chain for this base was sealed and accepts no more deltas.
    #[error("delta chain for base {0} is sealed")]
    ChainSealed(SnapshotId),

    /// The target delta is not part of the chain.
    #[error("delta {target} not found in chain {base}")]
    TargetNotFound {
        base: SnapshotId,
        target: SnapshotId,
    },
}
