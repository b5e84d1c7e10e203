use std::sync::Arc;

use atomline_common::Clock;
use serde::{Deserialize, Serialize};

use super::{CompressionMetadata, CompressionStrategy, Measure, NoCompression, StrategyState};
use crate::chain::DeltaChain;

/// Which chain strategy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStrategyKind {
    #[default]
    None,
    Time,
    Changes,
    Size,
    Significance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainStrategyConfig {
    pub kind: ChainStrategyKind,
    /// Chains shorter than this are never compressed.
    pub min_chain_length: usize,
    pub max_age_ms: u64,
    /// Length trigger for the `changes` strategy.
    pub max_changes: usize,
    /// Byte trigger for the `size` strategy.
    pub max_size: usize,
    pub significance_threshold: usize,
}

impl Default for ChainStrategyConfig {
    fn default() -> Self {
        Self {
            kind: ChainStrategyKind::None,
            min_chain_length: 2,
            max_age_ms: 300_000,
            max_changes: 50,
            max_size: 512 * 1024,
            significance_threshold: 1,
        }
    }
}

/// Condition that makes a [`ThresholdChainCompression`] fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTrigger {
    /// Chain older than this many milliseconds.
    Age(u64),
    /// Chain holding at least this many deltas.
    Length(usize),
    /// Chain memory above this many bytes.
    Size(usize),
}

/// Drops every delta once the trigger fires; the owner re-bases from current state.
#[derive(Debug, Clone)]
pub struct ThresholdChainCompression {
    trigger: ChainTrigger,
    min_chain_length: usize,
    state: StrategyState,
}

impl ThresholdChainCompression {
    pub fn new(trigger: ChainTrigger, min_chain_length: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            trigger,
            min_chain_length,
            state: StrategyState::new(clock),
        }
    }

    pub fn trigger(&self) -> ChainTrigger {
        self.trigger
    }

    fn name_of(trigger: ChainTrigger) -> &'static str {
        match trigger {
            ChainTrigger::Age(_) => "time",
            ChainTrigger::Length(_) => "changes",
            ChainTrigger::Size(_) => "size",
        }
    }
}

impl CompressionStrategy<DeltaChain> for ThresholdChainCompression {
    fn name(&self) -> &'static str {
        Self::name_of(self.trigger)
    }

    fn should_compress(&self, chain: &DeltaChain) -> bool {
        if chain.deltas.len() < self.min_chain_length {
            return false;
        }
        match self.trigger {
            ChainTrigger::Age(max) => {
                self.state.now().saturating_sub(chain.metadata.created_at) > max
            }
            ChainTrigger::Length(max) => chain.deltas.len() >= max,
            ChainTrigger::Size(max) => chain.metadata.memory_usage > max,
        }
    }

    fn compress(&mut self, mut chain: DeltaChain) -> DeltaChain {
        let before = (chain.count(), chain.size());
        chain.deltas.clear();
        chain.recompute(self.state.now());
        self.state.record(Self::name_of(self.trigger), before, &chain);
        chain
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        self.state.last()
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Keeps only deltas that change more than `threshold` atoms.
#[derive(Debug, Clone)]
pub struct SignificanceChainCompression {
    threshold: usize,
    min_chain_length: usize,
    state: StrategyState,
}

impl SignificanceChainCompression {
    pub fn new(threshold: usize, min_chain_length: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold,
            min_chain_length,
            state: StrategyState::new(clock),
        }
    }
}

impl CompressionStrategy<DeltaChain> for SignificanceChainCompression {
    fn name(&self) -> &'static str {
        "significance"
    }

    fn should_compress(&self, chain: &DeltaChain) -> bool {
        chain.deltas.len() >= self.min_chain_length
            && chain
                .deltas
                .iter()
                .any(|d| d.change_count() <= self.threshold)
    }

    fn compress(&mut self, mut chain: DeltaChain) -> DeltaChain {
        let before = (chain.count(), chain.size());
        let threshold = self.threshold;
        chain.deltas.retain(|d| d.change_count() > threshold);
        chain.recompute(self.state.now());
        self.state.record("significance", before, &chain);
        chain
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        self.state.last()
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Chain strategy selected by [`ChainStrategyKind`].
#[derive(Debug, Clone)]
pub enum ChainCompression {
    None(NoCompression),
    Threshold(ThresholdChainCompression),
    Significance(SignificanceChainCompression),
}

impl ChainCompression {
    pub fn from_config(config: &ChainStrategyConfig, clock: Arc<dyn Clock>) -> Self {
        let min = config.min_chain_length;
        match config.kind {
            ChainStrategyKind::None => Self::None(NoCompression::new(clock)),
            ChainStrategyKind::Time => Self::Threshold(ThresholdChainCompression::new(
                ChainTrigger::Age(config.max_age_ms),
                min,
                clock,
            )),
            ChainStrategyKind::Changes => Self::Threshold(ThresholdChainCompression::new(
                ChainTrigger::Length(config.max_changes),
                min,
                clock,
            )),
            ChainStrategyKind::Size => Self::Threshold(ThresholdChainCompression::new(
                ChainTrigger::Size(config.max_size),
                min,
                clock,
            )),
            ChainStrategyKind::Significance => Self::Significance(
                SignificanceChainCompression::new(config.significance_threshold, min, clock),
            ),
        }
    }

    pub fn kind(&self) -> ChainStrategyKind {
        match self {
            Self::None(_) => ChainStrategyKind::None,
            Self::Threshold(s) => match s.trigger() {
                ChainTrigger::Age(_) => ChainStrategyKind::Time,
                ChainTrigger::Length(_) => ChainStrategyKind::Changes,
                ChainTrigger::Size(_) => ChainStrategyKind::Size,
            },
            Self::Significance(_) => ChainStrategyKind::Significance,
        }
    }
}

impl CompressionStrategy<DeltaChain> for ChainCompression {
    fn name(&self) -> &'static str {
        match self {
            Self::None(s) => CompressionStrategy::<DeltaChain>::name(s),
            Self::Threshold(s) => s.name(),
            Self::Significance(s) => s.name(),
        }
    }

    fn should_compress(&self, chain: &DeltaChain) -> bool {
        match self {
            Self::None(s) => s.should_compress(chain),
            Self::Threshold(s) => s.should_compress(chain),
            Self::Significance(s) => s.should_compress(chain),
        }
    }

    fn compress(&mut self, chain: DeltaChain) -> DeltaChain {
        match self {
            Self::None(s) => s.compress(chain),
            Self::Threshold(s) => s.compress(chain),
            Self::Significance(s) => s.compress(chain),
        }
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        match self {
            Self::None(s) => CompressionStrategy::<DeltaChain>::metadata(s),
            Self::Threshold(s) => s.metadata(),
            Self::Significance(s) => s.metadata(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::None(s) => CompressionStrategy::<DeltaChain>::reset(s),
            Self::Threshold(s) => s.reset(),
            Self::Significance(s) => s.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{BaseRef, DeltaOptions, compute_delta};
    use crate::snapshot::{DeltaSnapshot, FullSnapshot};
    use atomline_common::{IdGenerator, ManualClock, SequentialIds, StateEntry, StateMap};
    use serde_json::json;

    fn state(pairs: &[(&str, i64)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), StateEntry::new(*k, json!(v))))
            .collect()
    }

    fn delta(
        ids: &SequentialIds,
        base: &FullSnapshot,
        prev: &FullSnapshot,
        next: StateMap,
    ) -> (FullSnapshot, DeltaSnapshot) {
        let snap = FullSnapshot::capture(ids.snapshot_id(), next, 0, None);
        let options = DeltaOptions {
            base: Some(BaseRef {
                id: base.id,
                timestamp: base.metadata.timestamp,
            }),
            ..DeltaOptions::default()
        };
        let d = compute_delta(prev, &snap, &options).unwrap();
        (snap, d)
    }

    /// Base {a:0,b:0}, then one delta touching 1 atom and one touching 2.
    fn sample_chain(ids: &SequentialIds) -> DeltaChain {
        let base = FullSnapshot::capture(ids.snapshot_id(), state(&[("a", 0), ("b", 0)]), 0, None);
        let (s1, d1) = delta(ids, &base, &base, state(&[("a", 1), ("b", 0)]));
        let (_, d2) = delta(ids, &base, &s1, state(&[("a", 2), ("b", 2)]));
        let mut chain = DeltaChain::new(base, 0);
        chain.deltas.push(d1);
        chain.deltas.push(d2);
        chain.recompute(0);
        chain
    }

    #[test]
    fn length_trigger_clears_chain() {
        let ids = SequentialIds::new();
        let clock = Arc::new(ManualClock::new(0));
        let cfg = ChainStrategyConfig {
            kind: ChainStrategyKind::Changes,
            max_changes: 2,
            ..ChainStrategyConfig::default()
        };
        let mut strategy = ChainCompression::from_config(&cfg, clock);
        let chain = sample_chain(&ids);
        assert!(strategy.should_compress(&chain));
        let out = strategy.compress(chain);
        assert!(out.deltas.is_empty());
        assert_eq!(out.metadata.memory_usage, 0);
        let meta = strategy.metadata().unwrap();
        assert_eq!(meta.strategy, "changes");
        assert_eq!(meta.removed_count, 2);
        assert_eq!(meta.ratio, 0.0);
    }

    #[test]
    fn age_trigger_uses_clock() {
        let ids = SequentialIds::new();
        let clock = ManualClock::new(0);
        let cfg = ChainStrategyConfig {
            kind: ChainStrategyKind::Time,
            max_age_ms: 1_000,
            ..ChainStrategyConfig::default()
        };
        let strategy = ChainCompression::from_config(&cfg, Arc::new(clock.clone()));
        let chain = sample_chain(&ids);
        assert!(!strategy.should_compress(&chain));
        clock.advance(1_001);
        assert!(strategy.should_compress(&chain));
    }

    #[test]
    fn size_trigger_reads_memory() {
        let ids = SequentialIds::new();
        let clock = Arc::new(ManualClock::new(0));
        let cfg = ChainStrategyConfig {
            kind: ChainStrategyKind::Size,
            max_size: 1,
            ..ChainStrategyConfig::default()
        };
        let strategy = ChainCompression::from_config(&cfg, clock);
        assert!(strategy.should_compress(&sample_chain(&ids)));
    }

    #[test]
    fn short_chains_are_left_alone() {
        let ids = SequentialIds::new();
        let clock = Arc::new(ManualClock::new(0));
        let cfg = ChainStrategyConfig {
            kind: ChainStrategyKind::Size,
            max_size: 1,
            min_chain_length: 5,
            ..ChainStrategyConfig::default()
        };
        let strategy = ChainCompression::from_config(&cfg, clock);
        assert!(!strategy.should_compress(&sample_chain(&ids)));
    }

    #[test]
    fn significance_drops_small_deltas() {
        let ids = SequentialIds::new();
        let clock = Arc::new(ManualClock::new(0));
        let cfg = ChainStrategyConfig {
            kind: ChainStrategyKind::Significance,
            significance_threshold: 1,
            ..ChainStrategyConfig::default()
        };
        let mut strategy = ChainCompression::from_config(&cfg, clock);
        let chain = sample_chain(&ids);
        let before = chain.metadata.memory_usage;
        assert!(strategy.should_compress(&chain));
        let out = strategy.compress(chain);
        assert_eq!(out.deltas.len(), 1);
        assert_eq!(out.deltas[0].change_count(), 2);
        assert_eq!(out.metadata.delta_count, 1);
        assert!(out.metadata.memory_usage < before);
    }

    #[test]
    fn none_is_identity() {
        let ids = SequentialIds::new();
        let clock = Arc::new(ManualClock::new(0));
        let mut strategy = ChainCompression::from_config(&ChainStrategyConfig::default(), clock);
        assert_eq!(strategy.kind(), ChainStrategyKind::None);
        let chain = sample_chain(&ids);
        assert!(!strategy.should_compress(&chain));
        let out = strategy.compress(chain.clone());
        assert_eq!(out, chain);
    }
}
