//! Developer tooling: timeline inspector for time-travel debugging.
//!
//! # Invariants
//! - Inspection is read-only; nothing here writes to the store or history.

mod inspector;

pub use inspector::{EntryInfo, TimelineInspector, TimelineSummary};
