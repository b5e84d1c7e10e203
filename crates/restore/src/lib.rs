//! All-or-nothing restoration of a snapshot into a live store.
//!
//! Every restoration first records the current value of each atom it is
//! about to write into a [`Checkpoint`]. A failed restoration can roll back
//! from it automatically; a committed one stays available for manual
//! rollback until it is evicted.

pub mod checkpoint;
mod error;
pub mod transaction;

pub use checkpoint::{Checkpoint, CheckpointConfig, CheckpointEntry, CheckpointMetadata};
pub use error::RestoreError;
pub use transaction::{
    AtomNotFoundPolicy, Progress, RestoreOptions, RestorePolicy, RollbackResult,
    TransactionalRestorationResult, TransactionalRestorer, validate_snapshot,
};
