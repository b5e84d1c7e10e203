use std::sync::Arc;

use atomline_common::Clock;
use serde::{Deserialize, Serialize};

use super::{CompressionMetadata, CompressionStrategy, Measure, NoCompression, StrategyState};
use crate::calculator::count_changes;
use crate::snapshot::Snapshot;

/// Which history strategy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStrategyKind {
    #[default]
    None,
    Time,
    Size,
    Significance,
}

/// Settings for every history strategy; each reads only its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryStrategyConfig {
    pub kind: HistoryStrategyKind,
    /// Below this many entries nothing is compressed.
    pub min_snapshots: usize,
    /// Time: entries younger than this are kept in full.
    pub keep_recent_for_ms: u64,
    /// Time: keep every Nth old entry.
    pub old_stride: usize,
    /// Size: target cap on entries.
    pub max_snapshots: usize,
    /// Size: keep every Nth entry before trimming.
    pub size_stride: usize,
    /// Significance: an entry is kept when it changes more atoms than this.
    pub significance_threshold: usize,
    /// Significance: at most this many similar entries are dropped in a row.
    pub max_consecutive_similar: usize,
}

impl Default for HistoryStrategyConfig {
    fn default() -> Self {
        Self {
            kind: HistoryStrategyKind::None,
            min_snapshots: 10,
            keep_recent_for_ms: 60_000,
            old_stride: 4,
            max_snapshots: 50,
            size_stride: 2,
            significance_threshold: 1,
            max_consecutive_similar: 3,
        }
    }
}

/// Keeps recent entries in full and subsamples older ones. The newest entry
/// is never treated as old.
#[derive(Debug, Clone)]
pub struct TimeBasedCompression {
    min_snapshots: usize,
    keep_recent_for_ms: u64,
    stride: usize,
    state: StrategyState,
}

impl TimeBasedCompression {
    pub fn new(config: &HistoryStrategyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_snapshots: config.min_snapshots,
            keep_recent_for_ms: config.keep_recent_for_ms,
            stride: config.old_stride.max(1),
            state: StrategyState::new(clock),
        }
    }

    fn is_old(&self, now: u64, snapshot: &Snapshot) -> bool {
        now.saturating_sub(snapshot.timestamp()) >= self.keep_recent_for_ms
    }
}

impl CompressionStrategy<Vec<Snapshot>> for TimeBasedCompression {
    fn name(&self) -> &'static str {
        "time"
    }

    fn should_compress(&self, input: &Vec<Snapshot>) -> bool {
        if input.len() < self.min_snapshots || self.stride < 2 {
            return false;
        }
        let now = self.state.now();
        let older = &input[..input.len().saturating_sub(1)];
        older.iter().filter(|s| self.is_old(now, s)).count() >= 2
    }

    fn compress(&mut self, input: Vec<Snapshot>) -> Vec<Snapshot> {
        let before = (input.count(), input.size());
        let now = self.state.now();
        let last = input.len().saturating_sub(1);
        let mut old_seen = 0usize;
        let mut output = Vec::with_capacity(input.len());
        for (i, snapshot) in input.into_iter().enumerate() {
            if i != last && self.is_old(now, &snapshot) {
                let keep = old_seen % self.stride == 0;
                old_seen += 1;
                if !keep {
                    continue;
                }
            }
            output.push(snapshot);
        }
        self.state.record("time", before, &output);
        output
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        self.state.last()
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Caps the list at `max_snapshots` by subsampling, then trimming the middle.
/// The newest entry always survives.
#[derive(Debug, Clone)]
pub struct SizeBasedCompression {
    min_snapshots: usize,
    max_snapshots: usize,
    stride: usize,
    state: StrategyState,
}

impl SizeBasedCompression {
    pub fn new(config: &HistoryStrategyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_snapshots: config.min_snapshots,
            max_snapshots: config.max_snapshots.max(1),
            stride: config.size_stride.max(1),
            state: StrategyState::new(clock),
        }
    }
}

impl CompressionStrategy<Vec<Snapshot>> for SizeBasedCompression {
    fn name(&self) -> &'static str {
        "size"
    }

    fn should_compress(&self, input: &Vec<Snapshot>) -> bool {
        input.len() >= self.min_snapshots && input.len() > self.max_snapshots
    }

    fn compress(&mut self, input: Vec<Snapshot>) -> Vec<Snapshot> {
        let before = (input.count(), input.size());
        let mut output = if input.len() > self.max_snapshots {
            let last = input.len() - 1;
            input
                .into_iter()
                .enumerate()
                .filter(|(i, _)| i % self.stride == 0 || *i == last)
                .map(|(_, s)| s)
                .collect()
        } else {
            input
        };
        while output.len() > self.max_snapshots {
            let middle = (output.len() / 2).min(output.len() - 2);
            output.remove(middle);
        }
        self.state.record("size", before, &output);
        output
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        self.state.last()
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Keeps entries that change enough relative to the last kept entry.
///
/// The first and last entries are always kept, and no more than
/// `max_consecutive_similar` similar entries are dropped in a row.
#[derive(Debug, Clone)]
pub struct SignificanceCompression {
    min_snapshots: usize,
    threshold: usize,
    max_consecutive_similar: usize,
    state: StrategyState,
}

impl SignificanceCompression {
    pub fn new(config: &HistoryStrategyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_snapshots: config.min_snapshots,
            threshold: config.significance_threshold,
            max_consecutive_similar: config.max_consecutive_similar,
            state: StrategyState::new(clock),
        }
    }
}

/// How many atoms `next` changes relative to `previous`.
fn significance(previous: &Snapshot, next: &Snapshot) -> usize {
    match (previous.state(), next) {
        (_, Snapshot::Delta(d)) => d.change_count(),
        (Some(prev), Snapshot::Full(full)) => count_changes(prev, &full.state),
        (None, Snapshot::Full(full)) => full.state.len(),
    }
}

impl CompressionStrategy<Vec<Snapshot>> for SignificanceCompression {
    fn name(&self) -> &'static str {
        "significance"
    }

    fn should_compress(&self, input: &Vec<Snapshot>) -> bool {
        input.len() >= self.min_snapshots.max(3)
    }

    fn compress(&mut self, input: Vec<Snapshot>) -> Vec<Snapshot> {
        let before = (input.count(), input.size());
        if input.len() < 3 {
            self.state.record("significance", before, &input);
            return input;
        }

        let last = input.len() - 1;
        let mut output: Vec<Snapshot> = Vec::with_capacity(input.len());
        let mut similar_run = 0usize;
        for (i, snapshot) in input.into_iter().enumerate() {
            let keep = match output.last() {
                None => true,
                Some(_) if i == last => true,
                Some(kept) => {
                    if significance(kept, &snapshot) > self.threshold {
                        true
                    } else {
                        similar_run += 1;
                        similar_run > self.max_consecutive_similar
                    }
                }
            };
            if keep {
                similar_run = 0;
                output.push(snapshot);
            }
        }
        self.state.record("significance", before, &output);
        output
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        self.state.last()
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// History strategy selected by [`HistoryStrategyKind`].
#[derive(Debug, Clone)]
pub enum HistoryCompression {
    None(NoCompression),
    Time(TimeBasedCompression),
    Size(SizeBasedCompression),
    Significance(SignificanceCompression),
}

impl HistoryCompression {
    pub fn from_config(config: &HistoryStrategyConfig, clock: Arc<dyn Clock>) -> Self {
        match config.kind {
            HistoryStrategyKind::None => Self::None(NoCompression::new(clock)),
            HistoryStrategyKind::Time => Self::Time(TimeBasedCompression::new(config, clock)),
            HistoryStrategyKind::Size => Self::Size(SizeBasedCompression::new(config, clock)),
            HistoryStrategyKind::Significance => {
                Self::Significance(SignificanceCompression::new(config, clock))
            }
        }
    }

    pub fn kind(&self) -> HistoryStrategyKind {
        match self {
            Self::None(_) => HistoryStrategyKind::None,
            Self::Time(_) => HistoryStrategyKind::Time,
            Self::Size(_) => HistoryStrategyKind::Size,
            Self::Significance(_) => HistoryStrategyKind::Significance,
        }
    }
}

impl CompressionStrategy<Vec<Snapshot>> for HistoryCompression {
    fn name(&self) -> &'static str {
        match self {
            Self::None(s) => CompressionStrategy::<Vec<Snapshot>>::name(s),
            Self::Time(s) => s.name(),
            Self::Size(s) => s.name(),
            Self::Significance(s) => s.name(),
        }
    }

    fn should_compress(&self, input: &Vec<Snapshot>) -> bool {
        match self {
            Self::None(s) => s.should_compress(input),
            Self::Time(s) => s.should_compress(input),
            Self::Size(s) => s.should_compress(input),
            Self::Significance(s) => s.should_compress(input),
        }
    }

    fn compress(&mut self, input: Vec<Snapshot>) -> Vec<Snapshot> {
        match self {
            Self::None(s) => s.compress(input),
            Self::Time(s) => s.compress(input),
            Self::Size(s) => s.compress(input),
            Self::Significance(s) => s.compress(input),
        }
    }

    fn metadata(&self) -> Option<&CompressionMetadata> {
        match self {
            Self::None(s) => CompressionStrategy::<Vec<Snapshot>>::metadata(s),
            Self::Time(s) => s.metadata(),
            Self::Size(s) => s.metadata(),
            Self::Significance(s) => s.metadata(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::None(s) => CompressionStrategy::<Vec<Snapshot>>::reset(s),
            Self::Time(s) => s.reset(),
            Self::Size(s) => s.reset(),
            Self::Significance(s) => s.reset(),
        }
    }
}
