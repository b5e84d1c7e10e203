use std::collections::BTreeSet;
use std::sync::Arc;

use atomline_common::{
    CheckpointId, Clock, IdGenerator, RandomIds, SnapshotId, StateEntry, StateMap, SystemClock,
};
use atomline_delta::{
    BaseRef, CacheStats, ChainAction, ChainCompaction, ChainCompression, ChainStats,
    ChangeDetector, DeltaChain, DeltaChainManager, DeltaError, DeltaOptions, FullSnapshot,
    HistoryCompression, Snapshot, SnapshotReconstructor, are_snapshots_equal, compute_delta,
};
use atomline_history::{HistoryManager, HistoryStats};
use atomline_restore::{
    Checkpoint, RestoreOptions, RollbackResult, TransactionalRestorationResult,
    TransactionalRestorer,
};
use atomline_store::AtomStore;
use serde::{Deserialize, Serialize};

use crate::config::{DeltaConfig, TimeTravelConfig};
use crate::disposal::{DisposalErrors, ListenerArena, ListenerHandle, TravelEvent, TravelListener};
use crate::error::{Result, TravelError};

/// Combined statistics across chains, reconstruction cache and history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaStats {
    pub delta_enabled: bool,
    pub chains: ChainStats,
    pub reconstruction: CacheStats,
    pub history: HistoryStats,
}

/// Undo/redo over a live store, backed by delta snapshots.
///
/// Owns the store for its lifetime. Call [`dispose`](Self::dispose) when done;
/// every operation afterwards fails with [`TravelError::Disposed`].
pub struct TimeTravel<S: AtomStore> {
    store: S,
    config: TimeTravelConfig,
    history: HistoryManager,
    chains: DeltaChainManager,
    reconstructor: SnapshotReconstructor,
    restorer: TransactionalRestorer,
    listeners: ListenerArena,
    change_detector: Option<ChangeDetector>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    /// Base of the chain new deltas are added to.
    active_base: Option<FullSnapshot>,
    /// State as of the last capture or travel; deltas are computed against it.
    last_state: Option<FullSnapshot>,
    deltas_since_full: usize,
    force_full_next: bool,
    disposed: bool,
}

impl<S: AtomStore + std::fmt::Debug> std::fmt::Debug for TimeTravel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeTravel")
            .field("store", &self.store)
            .field("history", &self.history.len())
            .field("current_index", &self.history.current_index())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl<S: AtomStore> TimeTravel<S> {
    pub fn new(store: S, config: TimeTravelConfig) -> Self {
        Self::with_deps(store, config, Arc::new(SystemClock), Arc::new(RandomIds))
    }

    /// Build with an injected clock and id source.
    pub fn with_deps(
        store: S,
        config: TimeTravelConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let history = HistoryManager::new(config.max_history).with_compression(
            HistoryCompression::from_config(&config.history_compression, clock.clone()),
        );
        let chains = DeltaChainManager::new(
            config.delta.chain_config(),
            ChainCompression::from_config(&config.delta.chain_compression, clock.clone()),
            clock.clone(),
        );
        let reconstructor = SnapshotReconstructor::new(config.reconstruction.clone());
        let restorer =
            TransactionalRestorer::new(config.checkpoints.clone(), clock.clone(), ids.clone());
        Self {
            store,
            config,
            history,
            chains,
            reconstructor,
            restorer,
            listeners: ListenerArena::new(),
            change_detector: None,
            clock,
            ids,
            active_base: None,
            last_state: None,
            deltas_since_full: 0,
            force_full_next: false,
            disposed: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable store access for application writes between captures.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &TimeTravelConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Custom change test used instead of the configured equality mode.
    pub fn set_change_detector(&mut self, detector: Option<ChangeDetector>) {
        self.change_detector = detector;
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(TravelError::Disposed)
        } else {
            Ok(())
        }
    }

    fn read_state(&self) -> StateMap {
        let mut state = StateMap::new();
        for record in self.store.atoms() {
            match self.store.get(&record.atom) {
                Ok(value) => {
                    let entry = StateEntry::new(record.atom.name.clone(), value)
                        .with_kind(record.kind)
                        .with_atom_id(record.atom.id.clone());
                    state.insert(record.atom.name, entry);
                }
                Err(err) => tracing::trace!(atom = %record.atom.name, %err, "atom unreadable"),
            }
        }
        state
    }

    /// Record the store's current state.
    ///
    /// Returns `None` when nothing changed since the last capture and empty
    /// captures are skipped.
    pub fn capture(&mut self, action: Option<&str>) -> Result<Option<SnapshotId>> {
        self.ensure_live()?;
        let _span = tracing::info_span!("capture", action = action.unwrap_or("")).entered();

        let current = FullSnapshot::capture(
            self.ids.snapshot_id(),
            self.read_state(),
            self.clock.now_ms(),
            action.map(str::to_string),
        );

        if self.config.delta.skip_empty {
            if let Some(last) = &self.last_state {
                if are_snapshots_equal(last, &current) {
                    tracing::debug!("no changes since last capture, skipped");
                    return Ok(None);
                }
            }
        }

        match self.delta_base() {
            Some(base) => self.store_delta(base, current),
            None => Ok(Some(self.store_full(current))),
        }
    }

    /// The base to anchor the next delta to, or `None` when the next capture
    /// must be full. Seals the active chain if its pre-flight check fails.
    fn delta_base(&mut self) -> Option<FullSnapshot> {
        let delta = &self.config.delta;
        let interval_due =
            delta.full_snapshot_interval > 0 && self.deltas_since_full + 1 >= delta.full_snapshot_interval;
        if !delta.enabled || self.force_full_next || self.last_state.is_none() || interval_due {
            return None;
        }
        let base = self.active_base.clone()?;
        if let Some(chain) = self.chains.chain(base.id) {
            let check = self.chains.validate_chain(chain);
            if check.action != ChainAction::Keep {
                tracing::info!(
                    base = %base.id,
                    reason = check.reason.as_deref().unwrap_or(""),
                    "chain check failed, starting new base"
                );
                self.seal_active();
                return None;
            }
        }
        Some(base)
    }

    fn store_full(&mut self, snapshot: FullSnapshot) -> SnapshotId {
        self.seal_active();
        let id = snapshot.id;
        self.history.add(Snapshot::Full(snapshot.clone()));
        if self.config.delta.enabled {
            self.active_base = Some(snapshot.clone());
        }
        self.last_state = Some(snapshot);
        self.deltas_since_full = 0;
        self.force_full_next = false;
        tracing::debug!(snapshot = %id, "full snapshot stored");
        self.after_capture(id, false);
        id
    }

    fn store_delta(
        &mut self,
        base: FullSnapshot,
        current: FullSnapshot,
    ) -> Result<Option<SnapshotId>> {
        let options = DeltaOptions {
            equality: self.config.delta.equality,
            skip_empty: self.config.delta.skip_empty,
            change_detector: self.change_detector.clone(),
            base: Some(BaseRef {
                id: base.id,
                timestamp: base.metadata.timestamp,
            }),
        };
        let previous = self.last_state.as_ref().unwrap_or(&base);
        let Some(delta) = compute_delta(previous, &current, &options) else {
            tracing::debug!("no changes under the configured equality, skipped");
            return Ok(None);
        };

        let id = delta.id;
        let outcome = self.chains.add_delta(&base, delta.clone())?;
        self.history.add(Snapshot::Delta(delta));
        self.last_state = Some(current);
        self.deltas_since_full += 1;
        tracing::debug!(snapshot = %id, base = %base.id, "delta snapshot stored");

        if let Some(compaction) = outcome.compaction {
            self.absorb_compaction(compaction)?;
        } else if outcome.needs_new_base {
            tracing::info!(base = %base.id, "chain bound reached, next capture is full");
            self.seal_active();
            self.force_full_next = true;
        }
        self.after_capture(id, true);
        Ok(Some(id))
    }

    /// Replace every history entry of a rewritten chain with its full
    /// snapshot, replayed from the chain as it was before compression.
    fn absorb_compaction(&mut self, compaction: ChainCompaction) -> Result<()> {
        let before = compaction.before;
        let base_id = before.base_id();
        let targets: Vec<(usize, SnapshotId)> = self
            .history
            .entries()
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_delta()
                    .filter(|d| d.base_snapshot_id == base_id)
                    .map(|d| (i, d.id))
            })
            .collect();
        for (index, id) in &targets {
            let full = self.reconstructor.reconstruct_chain(&before, *id)?;
            self.history.replace(*index, Snapshot::Full(full));
        }
        tracing::info!(
            base = %base_id,
            materialized = targets.len(),
            strategy = compaction.metadata.as_ref().map_or("", |m| m.strategy.as_str()),
            "compacted chain"
        );
        self.reconstructor.invalidate_base(base_id);
        self.seal_active();
        self.force_full_next = true;
        Ok(())
    }

    fn seal_active(&mut self) {
        if let Some(base) = self.active_base.take() {
            self.chains.create_new_base_snapshot(base.id);
        }
    }

    fn after_capture(&mut self, snapshot: SnapshotId, is_delta: bool) {
        self.prune_chains();
        let index = self.history.current_index().unwrap_or(0);
        self.listeners.emit(&TravelEvent::Captured {
            snapshot,
            index,
            is_delta,
        });
    }

    /// Drop sealed chains no history entry replays from.
    fn prune_chains(&mut self) {
        let referenced: BTreeSet<SnapshotId> = self
            .history
            .entries()
            .iter()
            .filter_map(Snapshot::base_snapshot_id)
            .collect();
        for base in self.chains.prune_sealed(|id| referenced.contains(&id)) {
            self.reconstructor.invalidate_base(base);
        }
    }

    /// Full snapshot for the history entry at `index`.
    fn materialize(&mut self, index: usize) -> Result<FullSnapshot> {
        let entry = self
            .history
            .get(index)
            .ok_or(TravelError::IndexOutOfRange {
                index,
                len: self.history.len(),
            })?;
        match entry {
            Snapshot::Full(full) => Ok(full.clone()),
            Snapshot::Delta(delta) => {
                let chain = self
                    .chains
                    .chain(delta.base_snapshot_id)
                    .ok_or(DeltaError::ChainNotFound(delta.base_snapshot_id))?;
                Ok(self.reconstructor.reconstruct_chain(chain, delta.id)?)
            }
        }
    }

    pub fn undo(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let _span = tracing::info_span!("undo").entered();
        let from = self.history.current_index();
        if self.history.undo().is_none() {
            return Ok(false);
        }
        self.travel(from)
    }

    pub fn redo(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let _span = tracing::info_span!("redo").entered();
        let from = self.history.current_index();
        if self.history.redo().is_none() {
            return Ok(false);
        }
        self.travel(from)
    }

    /// Travel to `index`. `Ok(false)` if it is out of range.
    pub fn jump_to(&mut self, index: usize) -> Result<bool> {
        self.ensure_live()?;
        let _span = tracing::info_span!("jump", index).entered();
        let from = self.history.current_index();
        if self.history.jump_to(index).is_none() {
            return Ok(false);
        }
        self.travel(from)
    }

    /// Restore the entry the cursor now points at. On failure the cursor
    /// goes back to `from`.
    fn travel(&mut self, from: Option<usize>) -> Result<bool> {
        let Some(to) = self.history.current_index() else {
            return Ok(false);
        };
        let target = match self.materialize(to) {
            Ok(target) => target,
            Err(err) => {
                self.reset_cursor(from);
                return Err(err);
            }
        };
        let options = RestoreOptions::with_policy(self.config.restore.clone());
        let result = self
            .restorer
            .restore_with_transaction(&mut self.store, &target, options);
        if !result.success {
            self.reset_cursor(from);
            return Err(TravelError::RestoreFailed {
                snapshot: target.id,
                errors: result.errors,
            });
        }
        self.arrived(from, to, target);
        Ok(true)
    }

    fn reset_cursor(&mut self, from: Option<usize>) {
        if let Some(index) = from {
            self.history.jump_to(index);
        }
    }

    fn arrived(&mut self, from: Option<usize>, to: usize, target: FullSnapshot) {
        let snapshot = target.id;
        tracing::info!(?from, to, %snapshot, "traveled");
        self.last_state = Some(target);
        self.force_full_next = true;
        self.listeners.emit(&TravelEvent::Traveled { from, to, snapshot });
    }

    pub fn can_undo(&self) -> bool {
        !self.disposed && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.disposed && self.history.can_redo()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.history.current_index()
    }

    /// Drop all history and chains. Checkpoints are kept.
    pub fn clear_history(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.history.clear();
        self.chains.clear();
        self.reconstructor.clear_cache();
        self.active_base = None;
        self.last_state = None;
        self.deltas_since_full = 0;
        self.force_full_next = false;
        tracing::info!("history cleared");
        self.listeners.emit(&TravelEvent::Cleared);
        Ok(())
    }

    pub fn get_history(&self) -> &[Snapshot] {
        self.history.entries()
    }

    /// The chain new deltas are currently added to.
    pub fn get_delta_chain(&self) -> Option<&DeltaChain> {
        let base = self.active_base.as_ref()?;
        self.chains.chain(base.id)
    }

    pub fn get_delta_stats(&self) -> DeltaStats {
        DeltaStats {
            delta_enabled: self.config.delta.enabled,
            chains: self.chains.stats(),
            reconstruction: self.reconstructor.stats(),
            history: self.history.stats(),
        }
    }

    /// Capture a full snapshot now, even if nothing changed.
    pub fn force_full_snapshot(&mut self, action: Option<&str>) -> Result<SnapshotId> {
        self.ensure_live()?;
        let snapshot = FullSnapshot::capture(
            self.ids.snapshot_id(),
            self.read_state(),
            self.clock.now_ms(),
            action.map(str::to_string),
        );
        Ok(self.store_full(snapshot))
    }

    /// Replace the delta settings. The active chain is sealed, so the next
    /// capture starts a fresh base under the new bounds.
    pub fn set_delta_strategy(&mut self, config: DeltaConfig) -> Result<()> {
        self.ensure_live()?;
        self.chains.set_config(config.chain_config());
        self.chains.set_strategy(ChainCompression::from_config(
            &config.chain_compression,
            self.clock.clone(),
        ));
        self.seal_active();
        self.force_full_next = true;
        tracing::info!(
            enabled = config.enabled,
            interval = config.full_snapshot_interval,
            "delta strategy updated"
        );
        self.config.delta = config;
        Ok(())
    }

    /// Full snapshot of the entry at `index` without touching the store.
    pub fn reconstruct_to(&mut self, index: usize) -> Result<Option<FullSnapshot>> {
        self.ensure_live()?;
        if index >= self.history.len() {
            return Ok(None);
        }
        self.materialize(index).map(Some)
    }

    /// Restore the history entry `snapshot_id` with explicit options. On
    /// success the cursor moves to that entry.
    pub fn restore_with_transaction(
        &mut self,
        snapshot_id: SnapshotId,
        options: RestoreOptions<'_>,
    ) -> Result<TransactionalRestorationResult> {
        self.ensure_live()?;
        let index = self
            .history
            .position_of(snapshot_id)
            .ok_or(TravelError::SnapshotNotFound(snapshot_id))?;
        let target = self.materialize(index)?;
        let result = self
            .restorer
            .restore_with_transaction(&mut self.store, &target, options);
        if result.success {
            let from = self.history.current_index();
            self.history.jump_to(index);
            self.arrived(from, index, target);
        }
        Ok(result)
    }

    /// Undo a restoration recorded in checkpoint `id`.
    pub fn rollback_to_checkpoint(&mut self, id: CheckpointId) -> Result<RollbackResult> {
        self.ensure_live()?;
        let result = self.restorer.rollback(&mut self.store, id)?;
        // the store no longer matches any history entry
        self.last_state = None;
        self.force_full_next = true;
        self.listeners
            .emit(&TravelEvent::RolledBack { checkpoint: id });
        Ok(result)
    }

    pub fn get_checkpoints(&self) -> &[Checkpoint] {
        self.restorer.checkpoints()
    }

    /// Remove atoms the registry considers stale. Returns how many went.
    pub fn cleanup_atoms(&mut self, max_age_ms: u64) -> Result<usize> {
        self.ensure_live()?;
        let removed = self.store.cleanup_stale(max_age_ms, self.clock.now_ms());
        tracing::info!(removed, max_age_ms, "atom cleanup");
        Ok(removed)
    }

    pub fn subscribe(&mut self, listener: impl TravelListener + 'static) -> Result<ListenerHandle> {
        self.ensure_live()?;
        Ok(self.listeners.insert(Box::new(listener)))
    }

    /// Remove and dispose a listener. `Ok(false)` if the handle is unknown.
    pub fn unsubscribe(&mut self, handle: ListenerHandle) -> Result<bool> {
        self.listeners
            .remove(handle)
            .map_err(|err| TravelError::Disposal(DisposalErrors { errors: vec![err] }))
    }

    /// Release everything. Listener disposal failures are collected into one
    /// error; the rest of the teardown still happens. Idempotent.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.history.clear();
        self.chains.clear();
        self.reconstructor.clear_cache();
        self.restorer.clear();
        self.active_base = None;
        self.last_state = None;
        tracing::info!("time travel disposed");
        self.listeners.dispose_all()?;
        Ok(())
    }
}
