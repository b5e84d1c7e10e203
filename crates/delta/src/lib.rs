//! Delta versioning engine: snapshots, deltas, delta chains, compression,
//! reconstruction.
//!
//! # Invariants
//! - A delta snapshot's changes are non-empty unless empty deltas were
//!   explicitly allowed when computing it.
//! - Every delta in a chain is anchored to the chain's base snapshot; chain
//!   order is creation order and is the replay order.
//! - Replaying the same chain prefix always yields the same state.

pub mod calculator;
pub mod chain;
pub mod compression;
mod error;
pub mod reconstruct;
pub mod snapshot;

pub use calculator::{
    BaseRef, ChangeDetector, DeltaOptions, EqualityMode, Validation, apply_delta,
    apply_delta_in_place, are_snapshots_equal, compute_delta, count_changes, values_equal,
};
pub use chain::{
    AddDeltaOutcome, ChainAction, ChainCompaction, ChainMetadata, ChainStats, ChainValidation,
    DeltaChain, DeltaChainConfig, DeltaChainManager,
};
pub use compression::{
    ChainCompression, ChainStrategyConfig, ChainStrategyKind, CompressionMetadata,
    CompressionStrategy, HistoryCompression, HistoryStrategyConfig, HistoryStrategyKind,
};
pub use error::DeltaError;
pub use reconstruct::{CacheStats, ReconstructorConfig, SnapshotReconstructor};
pub use snapshot::{
    ChangeType, DeltaChange, DeltaMetadata, DeltaSnapshot, FullSnapshot, Snapshot,
    SnapshotMetadata,
};
