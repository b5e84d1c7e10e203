//! Shared types for atomline: identifiers, injected clocks, atom state entries.
//!
//! # Invariants
//! - Ids come from an injected [`IdGenerator`], never from ambient randomness
//!   inside the engine.
//! - Time comes from an injected [`Clock`], in milliseconds.

mod clock;
mod ids;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{CheckpointId, IdGenerator, RandomIds, SequentialIds, SnapshotId};
pub use types::{AtomKind, StateEntry, StateMap, estimate_value_size};
