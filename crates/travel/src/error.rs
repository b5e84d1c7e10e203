use atomline_common::SnapshotId;
use atomline_delta::DeltaError;
use atomline_restore::RestoreError;
use atomline_store::StoreError;
use thiserror::Error;

use crate::disposal::DisposalErrors;

pub type Result<T> = std::result::Result<T, TravelError>;

#[derive(Debug, Error)]
pub enum TravelError {
    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Travel reached the restorer and failed; the cursor did not move.
    #[error("restoring snapshot {snapshot} failed ({} error(s))", .errors.len())]
    RestoreFailed {
        snapshot: SnapshotId,
        errors: Vec<RestoreError>,
    },

    #[error("snapshot {0} is not in history")]
    SnapshotNotFound(SnapshotId),

    #[error("history index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("time travel has been disposed")]
    Disposed,

    #[error(transparent)]
    Disposal(#[from] DisposalErrors),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(#[from] serde_yaml::Error),
}
