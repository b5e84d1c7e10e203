//! Bounded, navigable undo/redo history of snapshots.

pub mod manager;

pub use manager::{HistoryManager, HistoryStats};
