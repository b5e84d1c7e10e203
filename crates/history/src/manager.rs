use atomline_common::SnapshotId;
use atomline_delta::{CompressionMetadata, CompressionStrategy, HistoryCompression, Snapshot};
use serde::{Deserialize, Serialize};

/// Aggregates for reporting. Nothing here drives control flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_snapshots: usize,
    pub full_snapshots: usize,
    pub delta_snapshots: usize,
    pub current_index: Option<usize>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub oldest_timestamp: Option<u64>,
    pub newest_timestamp: Option<u64>,
    pub estimated_size: usize,
    pub compression: Option<CompressionMetadata>,
}

/// Linear history with a cursor.
///
/// Adding after an undo discards the redo entries past the cursor. The list
/// never grows past `max_history`; the oldest entries go first. Navigation
/// past either end is a no-op returning `None`.
#[derive(Debug)]
pub struct HistoryManager {
    entries: Vec<Snapshot>,
    index: Option<usize>,
    max_history: usize,
    compression: Option<HistoryCompression>,
}

impl HistoryManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: None,
            max_history: max_history.max(1),
            compression: None,
        }
    }

    pub fn with_compression(mut self, compression: HistoryCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn set_compression(&mut self, compression: Option<HistoryCompression>) {
        self.compression = compression;
    }

    pub fn compression(&self) -> Option<&HistoryCompression> {
        self.compression.as_ref()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Append `snapshot` after the cursor and make it current.
    pub fn add(&mut self, snapshot: Snapshot) {
        let keep = self.index.map_or(0, |i| i + 1);
        if keep < self.entries.len() {
            tracing::debug!(
                discarded = self.entries.len() - keep,
                "new capture discards redo entries"
            );
            self.entries.truncate(keep);
        }
        self.entries.push(snapshot);

        if self.entries.len() > self.max_history {
            let overflow = self.entries.len() - self.max_history;
            self.entries.drain(..overflow);
        }

        if let Some(strategy) = self.compression.as_mut() {
            if strategy.should_compress(&self.entries) {
                let entries = std::mem::take(&mut self.entries);
                self.entries = strategy.compress(entries);
                tracing::debug!(
                    strategy = strategy.name(),
                    remaining = self.entries.len(),
                    "history compressed"
                );
            }
        }

        self.index = self.entries.len().checked_sub(1);
    }

    pub fn undo(&mut self) -> Option<&Snapshot> {
        let index = self.index.filter(|i| *i > 0)? - 1;
        self.index = Some(index);
        self.entries.get(index)
    }

    pub fn redo(&mut self) -> Option<&Snapshot> {
        let index = self.index.filter(|i| i + 1 < self.entries.len())? + 1;
        self.index = Some(index);
        self.entries.get(index)
    }

    /// Move the cursor to `index` if it is in bounds.
    pub fn jump_to(&mut self, index: usize) -> Option<&Snapshot> {
        if index >= self.entries.len() {
            return None;
        }
        self.index = Some(index);
        self.entries.get(index)
    }

    pub fn can_undo(&self) -> bool {
        self.index.is_some_and(|i| i > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.index.is_some_and(|i| i + 1 < self.entries.len())
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.entries.get(self.index?)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.index
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[Snapshot] {
        &self.entries
    }

    pub fn position_of(&self, id: SnapshotId) -> Option<usize> {
        self.entries.iter().position(|s| s.id() == id)
    }

    /// Swap the entry at `index` for an equivalent one, e.g. a delta entry
    /// for its materialized full snapshot. Returns the old entry.
    pub fn replace(&mut self, index: usize, snapshot: Snapshot) -> Option<Snapshot> {
        let slot = self.entries.get_mut(index)?;
        Some(std::mem::replace(slot, snapshot))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empty the list and reset the compression strategy's metadata.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index = None;
        if let Some(strategy) = self.compression.as_mut() {
            strategy.reset();
        }
    }

    pub fn stats(&self) -> HistoryStats {
        let delta_snapshots = self.entries.iter().filter(|s| s.is_delta()).count();
        HistoryStats {
            total_snapshots: self.entries.len(),
            full_snapshots: self.entries.len() - delta_snapshots,
            delta_snapshots,
            current_index: self.index,
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            oldest_timestamp: self.entries.iter().map(Snapshot::timestamp).min(),
            newest_timestamp: self.entries.iter().map(Snapshot::timestamp).max(),
            estimated_size: self.entries.iter().map(Snapshot::estimated_size).sum(),
            compression: self
                .compression
                .as_ref()
                .and_then(|s| s.metadata().cloned()),
        }
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use atomline_common::{IdGenerator, ManualClock, SequentialIds, StateEntry, StateMap};
    use atomline_delta::{FullSnapshot, HistoryStrategyConfig, HistoryStrategyKind};
    use serde_json::json;

    fn snap(ids: &SequentialIds, value: i64) -> Snapshot {
        let mut state = StateMap::new();
        state.insert("n".into(), StateEntry::new("n", json!(value)));
        FullSnapshot::capture(ids.snapshot_id(), state, value as u64, None).into()
    }

    fn filled(ids: &SequentialIds, n: i64) -> HistoryManager {
        let mut history = HistoryManager::new(50);
        for v in 0..n {
            history.add(snap(ids, v));
        }
        history
    }

    #[test]
    fn empty_history_has_no_cursor() {
        let mut history = HistoryManager::default();
        assert!(history.is_empty());
        assert_eq!(history.current_index(), None);
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert!(history.jump_to(0).is_none());
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn undo_redo_move_cursor() {
        let ids = SequentialIds::new();
        let mut history = filled(&ids, 3);
        assert_eq!(history.current_index(), Some(2));
        assert!(history.redo().is_none());

        let id = history.undo().map(Snapshot::id);
        assert_eq!(id, Some(history.entries()[1].id()));
        history.undo();
        assert!(history.undo().is_none());
        assert_eq!(history.current_index(), Some(0));

        history.redo();
        assert_eq!(history.current_index(), Some(1));
    }

    #[test]
    fn undo_then_redo_restores_current() {
        let ids = SequentialIds::new();
        let mut history = filled(&ids, 4);
        let before = history.current().map(Snapshot::id);
        history.undo();
        history.redo();
        assert_eq!(history.current().map(Snapshot::id), before);
    }

    #[test]
    fn add_after_undo_discards_redo() {
        let ids = SequentialIds::new();
        let mut history = filled(&ids, 3);
        history.undo();
        history.undo();
        history.add(snap(&ids, 10));
        assert_eq!(history.len(), 2);
        assert_eq!(history.current_index(), Some(1));
        assert!(!history.can_redo());
    }

    #[test]
    fn never_exceeds_max_history() {
        let ids = SequentialIds::new();
        let mut history = HistoryManager::new(3);
        for v in 0..10 {
            history.add(snap(&ids, v));
            assert!(history.len() <= 3);
        }
        assert_eq!(history.entries()[0].timestamp(), 7);
        assert_eq!(history.current_index(), Some(2));
    }

    #[test]
    fn jump_out_of_bounds_is_noop() {
        let ids = SequentialIds::new();
        let mut history = filled(&ids, 3);
        assert!(history.jump_to(3).is_none());
        assert_eq!(history.current_index(), Some(2));
        assert!(history.jump_to(0).is_some());
        assert_eq!(history.current_index(), Some(0));
    }

    #[test]
    fn replace_and_position() {
        let ids = SequentialIds::new();
        let mut history = filled(&ids, 2);
        let id = history.entries()[1].id();
        assert_eq!(history.position_of(id), Some(1));
        let replacement = snap(&ids, 99);
        let old = history.replace(1, replacement).unwrap();
        assert_eq!(old.id(), id);
        assert_eq!(history.position_of(id), None);
        assert!(history.replace(5, snap(&ids, 1)).is_none());
    }

    #[test]
    fn compression_runs_on_add() {
        let ids = SequentialIds::new();
        let clock = Arc::new(ManualClock::new(0));
        let config = HistoryStrategyConfig {
            kind: HistoryStrategyKind::Size,
            min_snapshots: 2,
            max_snapshots: 4,
            ..HistoryStrategyConfig::default()
        };
        let mut history = HistoryManager::new(100)
            .with_compression(HistoryCompression::from_config(&config, clock));
        for v in 0..10 {
            history.add(snap(&ids, v));
        }
        assert!(history.len() <= 4);
        assert_eq!(history.current_index(), Some(history.len() - 1));
        assert_eq!(history.current().unwrap().timestamp(), 9);
        assert!(history.stats().compression.is_some());

        history.clear();
        assert!(history.is_empty());
        assert!(history.stats().compression.is_none());
    }

    #[test]
    fn stats_reflect_entries() {
        let ids = SequentialIds::new();
        let mut history = filled(&ids, 3);
        history.undo();
        let stats = history.stats();
        assert_eq!(stats.total_snapshots, 3);
        assert_eq!(stats.full_snapshots, 3);
        assert_eq!(stats.delta_snapshots, 0);
        assert_eq!(stats.current_index, Some(1));
        assert!(stats.can_undo && stats.can_redo);
        assert_eq!(stats.oldest_timestamp, Some(0));
        assert_eq!(stats.newest_timestamp, Some(2));
        assert!(stats.estimated_size > 0);
    }
}
