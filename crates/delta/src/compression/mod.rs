//! Compression policies for history lists and delta chains.
//!
//! Two strategy families share one shape ([`CompressionStrategy`]): history
//! strategies prune a flat list of snapshots, chain strategies shrink a
//! [`DeltaChain`](crate::chain::DeltaChain). Each family is a tagged union
//! built from its config by `from_config`, so every variant is matched
//! exhaustively and there is no "unknown strategy" case.

mod chain;
mod history;

use std::sync::Arc;

use atomline_common::Clock;
use serde::{Deserialize, Serialize};

use crate::chain::DeltaChain;
use crate::snapshot::Snapshot;

pub use chain::{
    ChainCompression, ChainStrategyConfig, ChainStrategyKind, ChainTrigger,
    SignificanceChainCompression, ThresholdChainCompression,
};
pub use history::{
    HistoryCompression, HistoryStrategyConfig, HistoryStrategyKind, SignificanceCompression,
    SizeBasedCompression, TimeBasedCompression,
};

/// Record of the most recent compression run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetadata {
    pub strategy: String,
    pub timestamp: u64,
    pub original_count: usize,
    pub compressed_count: usize,
    pub removed_count: usize,
    /// Estimated bytes freed.
    pub memory_saved: usize,
    /// Compressed size over original size (1.0 = nothing saved).
    pub ratio: f64,
}

/// Common shape of every compression policy.
pub trait CompressionStrategy<T> {
    fn name(&self) -> &'static str;

    fn should_compress(&self, input: &T) -> bool;

    /// Compress `input`, recording metadata for this run.
    fn compress(&mut self, input: T) -> T;

    /// Metadata of the last run, if any since creation or [`reset`](Self::reset).
    fn metadata(&self) -> Option<&CompressionMetadata>;

    fn reset(&mut self);
}

/// Count and estimated size of a compressible input.
pub trait Measure {
    fn count(&self) -> usize;
    fn size(&self) -> usize;
}

impl Measure for Vec<Snapshot> {
    fn count(&self) -> usize {
        self.len()
    }

    fn size(&self) -> usize {
        self.iter().map(Snapshot::estimated_size).sum()
    }
}

impl Measure for DeltaChain {
    fn count(&self) -> usize {
        self.deltas.len()
    }

    fn size(&self) -> usize {
        self.metadata.memory_usage
    }
}

/// State shared by every strategy: the clock and the last-run record.
#[derive(Clone)]
pub struct StrategyState {
    clock: Arc<dyn Clock>,
    last: Option<CompressionMetadata>,
}

impl std::fmt::Debug for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyState")
            .field("last", &self.last)
            .finish()
    }
}

impl StrategyState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, last: None }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Overwrite the last-run record from before/after measurements.
    pub fn record<T: Measure>(&mut self, strategy: &'static str, before: (usize, usize), after: &T) {
        let (original_count, original_size) = before;
        let compressed_count = after.count();
        let compressed_size = after.size();
        let ratio = if original_size == 0 {
            1.0
        } else {
            compressed_size as f64 / original_size as f64
        };
        let metadata = CompressionMetadata {
            strategy: strategy.to_string(),
            timestamp: self.now(),
            original_count,
            compressed_count,
            removed_count: original_count.saturating_sub(compressed_count),
            memory_saved: original_size.saturating_sub(compressed_size),
            ratio,
        };
        tracing::debug!(
            strategy,
            removed = metadata.removed_count,
            saved = metadata.memory_saved,
            "compression run"
        );
        self.last = Some(metadata);
    }

    pub fn last(&self) -> Option<&CompressionMetadata> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Identity strategy. Never triggers; compressing returns the input unchanged.
#[derive(Debug, Clone)]
pub struct NoCompression {
    state: StrategyState,
}

impl NoCompression {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: StrategyState::new(clock),
        }
    }
}

impl<T: Measure> CompressionStrategy<T> for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn should_compress(&self, _input: &T) -> bool {
        false
    }

    fn compress(&mut self, input: T) -> T {
        let before = (input.count(), input.size());
        self.state.record("none", before, &input);
        input
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        self.state.last()
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}
