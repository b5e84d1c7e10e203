use atomline_common::SnapshotId;
use atomline_delta::Snapshot;
use atomline_store::AtomStore;
use atomline_travel::TimeTravel;

/// Timeline inspector for developer tooling.
///
/// Read-only queries against a [`TimeTravel`] instance for debugging and
/// the CLI.
pub struct TimelineInspector;

impl TimelineInspector {
    /// Produce a summary of the timeline.
    pub fn summary<S: AtomStore>(tt: &TimeTravel<S>) -> TimelineSummary {
        let stats = tt.get_delta_stats();
        TimelineSummary {
            entries: stats.history.total_snapshots,
            full_snapshots: stats.history.full_snapshots,
            delta_snapshots: stats.history.delta_snapshots,
            current_index: stats.history.current_index,
            live_atoms: tt.store().atoms().len(),
            checkpoints: tt.get_checkpoints().len(),
            active_chain_len: tt.get_delta_chain().map_or(0, |c| c.len()),
            cache_hits: stats.reconstruction.hits,
            cache_misses: stats.reconstruction.misses,
        }
    }

    /// Details of the history entry at `index`.
    pub fn inspect_entry<S: AtomStore>(tt: &TimeTravel<S>, index: usize) -> Option<EntryInfo> {
        let snapshot = tt.get_history().get(index)?;
        Some(EntryInfo::new(index, snapshot, tt.current_index() == Some(index)))
    }

    /// Every history entry, oldest first.
    pub fn list_entries<S: AtomStore>(tt: &TimeTravel<S>) -> Vec<EntryInfo> {
        let current = tt.current_index();
        tt.get_history()
            .iter()
            .enumerate()
            .map(|(i, s)| EntryInfo::new(i, s, current == Some(i)))
            .collect()
    }
}

/// Summary of timeline state for the inspector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSummary {
    pub entries: usize,
    pub full_snapshots: usize,
    pub delta_snapshots: usize,
    pub current_index: Option<usize>,
    pub live_atoms: usize,
    pub checkpoints: usize,
    pub active_chain_len: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl std::fmt::Display for TimelineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self
            .current_index
            .map_or_else(|| "-".to_string(), |i| i.to_string());
        write!(
            f,
            "Timeline: entries={} (full={} delta={}) current={} atoms={} checkpoints={} chain={} cache={}/{}",
            self.entries,
            self.full_snapshots,
            self.delta_snapshots,
            current,
            self.live_atoms,
            self.checkpoints,
            self.active_chain_len,
            self.cache_hits,
            self.cache_hits + self.cache_misses
        )
    }
}

/// Detailed info about a single history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub index: usize,
    pub id: SnapshotId,
    pub is_delta: bool,
    pub is_current: bool,
    pub timestamp: u64,
    pub action: Option<String>,
    pub atom_count: usize,
    /// Changed atoms, for delta entries.
    pub changes: Option<Vec<String>>,
    pub base: Option<SnapshotId>,
    pub estimated_size: usize,
}

impl EntryInfo {
    fn new(index: usize, snapshot: &Snapshot, is_current: bool) -> Self {
        Self {
            index,
            id: snapshot.id(),
            is_delta: snapshot.is_delta(),
            is_current,
            timestamp: snapshot.timestamp(),
            action: snapshot.action().map(str::to_string),
            atom_count: snapshot.atom_count(),
            changes: snapshot
                .as_delta()
                .map(|d| d.changes.keys().cloned().collect()),
            base: snapshot.base_snapshot_id(),
            estimated_size: snapshot.estimated_size(),
        }
    }
}

impl std::fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let marker = if self.is_current { '>' } else { ' ' };
        let kind = if self.is_delta { "delta" } else { "full " };
        write!(
            f,
            "{marker}{:>3} {kind} [{}] t={} atoms={} size={}",
            self.index,
            self.id,
            self.timestamp,
            self.atom_count,
            self.estimated_size
        )?;
        if let Some(action) = &self.action {
            write!(f, " action={action}")?;
        }
        if let Some(changes) = &self.changes {
            write!(f, " changed=[{}]", changes.join(", "))?;
        }
        Ok(())
    }
}
