//! Time-travel orchestrator over a live atom store.
//!
//! [`TimeTravel`] ties the engine together: captures become full or delta
//! snapshots in a bounded history, and travel (undo, redo, jump) replays the
//! target snapshot and restores it transactionally into the store.
//!
//! # Invariants
//! - Deltas are taken against the previous capture. After any travel or
//!   rollback the next capture is a full snapshot.
//! - A chain rewritten by compression is first materialized into full
//!   history entries, so every entry stays reconstructible.
//! - A failed restore leaves the history cursor where it was.

mod config;
mod disposal;
mod error;
mod time_travel;

pub use config::{DeltaConfig, TimeTravelConfig};
pub use disposal::{
    DisposalErrors, DisposeError, ListenerArena, ListenerHandle, TravelEvent, TravelListener,
};
pub use error::{Result, TravelError};
pub use time_travel::{DeltaStats, TimeTravel};
