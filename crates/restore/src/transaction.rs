use std::sync::Arc;

use atomline_common::{AtomKind, CheckpointId, Clock, IdGenerator, StateEntry};
use atomline_delta::FullSnapshot;
use atomline_store::{AtomRef, AtomStore, Store};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointConfig};
use crate::error::RestoreError;

/// What to do when a snapshot names an atom the store doesn't know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomNotFoundPolicy {
    Skip,
    #[default]
    Warn,
    /// Abort the whole restoration.
    Throw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorePolicy {
    pub validate_before_restore: bool,
    /// Atoms per batch; 0 applies everything as one batch.
    pub batch_size: usize,
    pub on_atom_not_found: AtomNotFoundPolicy,
    /// Keep going after a failed write; the failure is still reported.
    pub skip_errors: bool,
    pub rollback_on_error: bool,
    /// Wall-clock budget for the apply phase, checked between batches.
    pub timeout_ms: Option<u64>,
}

impl Default for RestorePolicy {
    fn default() -> Self {
        Self {
            validate_before_restore: true,
            batch_size: 0,
            on_atom_not_found: AtomNotFoundPolicy::Warn,
            skip_errors: false,
            rollback_on_error: true,
            timeout_ms: None,
        }
    }
}

/// Progress report. `current_index` is the 0-based index of the last entry
/// processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current_index: usize,
    pub total: usize,
}

/// Per-call options: a policy plus an optional progress callback, invoked
/// per entry, or per batch when batching.
#[derive(Default)]
pub struct RestoreOptions<'a> {
    pub policy: RestorePolicy,
    pub on_progress: Option<Box<dyn FnMut(Progress) + 'a>>,
}

impl<'a> RestoreOptions<'a> {
    pub fn with_policy(policy: RestorePolicy) -> Self {
        Self {
            policy,
            on_progress: None,
        }
    }

    pub fn on_progress(mut self, callback: impl FnMut(Progress) + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    fn report(&mut self, progress: Progress) {
        if let Some(callback) = self.on_progress.as_mut() {
            callback(progress);
        }
    }
}

impl std::fmt::Debug for RestoreOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreOptions")
            .field("policy", &self.policy)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub rolled_back_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionalRestorationResult {
    pub success: bool,
    pub checkpoint_id: Option<CheckpointId>,
    pub restored_count: usize,
    pub errors: Vec<RestoreError>,
    pub rollback_performed: bool,
    /// Outcome of the automatic rollback, when one ran.
    pub rollback: Option<RollbackResult>,
}

/// Structural checks run before any atom is written.
pub fn validate_snapshot(snapshot: &FullSnapshot) -> Result<(), RestoreError> {
    let fail = |reason: String| RestoreError::Validation {
        snapshot: snapshot.id,
        reason,
    };
    if snapshot.metadata.atom_count != snapshot.state.len() {
        return Err(fail(format!(
            "metadata counts {} atoms, state holds {}",
            snapshot.metadata.atom_count,
            snapshot.state.len()
        )));
    }
    if let Some((key, entry)) = snapshot.state.iter().find(|(k, e)| **k != e.name) {
        return Err(fail(format!(
            "entry under {key} is named {}",
            entry.name
        )));
    }
    if !snapshot.verify() {
        return Err(fail("state does not match its fingerprint".to_string()));
    }
    Ok(())
}

struct PlannedWrite<'s> {
    name: &'s str,
    entry: &'s StateEntry,
    atom: Option<AtomRef>,
}

/// Applies snapshots to a store under checkpoint protection.
pub struct TransactionalRestorer {
    config: CheckpointConfig,
    checkpoints: Vec<Checkpoint>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for TransactionalRestorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalRestorer")
            .field("config", &self.config)
            .field("checkpoints", &self.checkpoints.len())
            .finish()
    }
}

impl TransactionalRestorer {
    pub fn new(config: CheckpointConfig, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            config,
            checkpoints: Vec::new(),
            clock,
            ids,
        }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CheckpointConfig) {
        self.config = config;
    }

    /// Write `snapshot`'s state into `store`, all or nothing.
    ///
    /// Computed atoms are derived by the store and are never written.
    pub fn restore_with_transaction<S: AtomStore + ?Sized>(
        &mut self,
        store: &mut S,
        snapshot: &FullSnapshot,
        mut options: RestoreOptions<'_>,
    ) -> TransactionalRestorationResult {
        let _span = tracing::info_span!("restore", snapshot = %snapshot.id).entered();
        let policy = options.policy.clone();

        if policy.validate_before_restore {
            if let Err(err) = validate_snapshot(snapshot) {
                tracing::warn!(error = %err, "snapshot rejected before restore");
                return rejected(err);
            }
        }

        let now = self.clock.now_ms();
        self.evict(now);

        let plan: Vec<PlannedWrite<'_>> = snapshot
            .state
            .iter()
            .filter(|(_, entry)| entry.kind != AtomKind::Computed)
            .map(|(name, entry)| PlannedWrite {
                name,
                entry,
                atom: store
                    .resolve(name)
                    .or_else(|| entry.atom_id.as_deref().and_then(|id| store.resolve(id))),
            })
            .collect();

        let mut checkpoint = Checkpoint::new(self.ids.checkpoint_id(), now, Some(snapshot.id));
        for write in &plan {
            let Some(atom) = &write.atom else {
                continue;
            };
            match store.get(atom) {
                Ok(value) => checkpoint.record(atom.clone(), value),
                Err(source) => {
                    let err = RestoreError::Checkpoint {
                        atom: write.name.to_string(),
                        source,
                    };
                    tracing::warn!(error = %err, "checkpoint incomplete, nothing written");
                    return rejected(err);
                }
            }
        }
        let checkpoint_id = checkpoint.id;
        tracing::debug!(%checkpoint_id, atoms = checkpoint.len(), "checkpoint recorded");
        self.checkpoints.push(checkpoint);

        let total = plan.len();
        let batch_size = if policy.batch_size == 0 {
            total.max(1)
        } else {
            policy.batch_size
        };
        let batching = policy.batch_size > 0;
        let started = self.clock.now_ms();
        let mut restored_count = 0;
        let mut errors = Vec::new();
        let mut failure = None;

        'apply: for (batch_index, batch) in plan.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            for (i, write) in batch.iter().enumerate() {
                let index = offset + i;
                match &write.atom {
                    None => match policy.on_atom_not_found {
                        AtomNotFoundPolicy::Skip => {
                            tracing::trace!(atom = write.name, "atom not found, skipped");
                        }
                        AtomNotFoundPolicy::Warn => {
                            tracing::warn!(atom = write.name, "atom not found, skipped");
                        }
                        AtomNotFoundPolicy::Throw => {
                            failure = Some(RestoreError::AtomNotFound(write.name.to_string()));
                            break 'apply;
                        }
                    },
                    Some(atom) => match store.set(atom, write.entry.value.clone()) {
                        Ok(()) => restored_count += 1,
                        Err(source) => {
                            let err = RestoreError::Apply {
                                atom: write.name.to_string(),
                                source,
                            };
                            if policy.skip_errors {
                                tracing::warn!(error = %err, "write failed, continuing");
                                errors.push(err);
                            } else {
                                failure = Some(err);
                                break 'apply;
                            }
                        }
                    },
                }
                if !batching {
                    options.report(Progress {
                        current_index: index,
                        total,
                    });
                }
            }
            if batching {
                options.report(Progress {
                    current_index: offset + batch.len() - 1,
                    total,
                });
            }
            if let Some(budget_ms) = policy.timeout_ms {
                let elapsed_ms = self.clock.now_ms().saturating_sub(started);
                if elapsed_ms > budget_ms {
                    failure = Some(RestoreError::Timeout {
                        elapsed_ms,
                        budget_ms,
                    });
                    break 'apply;
                }
            }
        }

        let Some(err) = failure else {
            if let Some(checkpoint) = self.checkpoints.iter_mut().find(|c| c.id == checkpoint_id) {
                checkpoint.metadata.committed = true;
            }
            self.enforce_cap();
            tracing::info!(restored = restored_count, "restore committed");
            return TransactionalRestorationResult {
                success: true,
                checkpoint_id: Some(checkpoint_id),
                restored_count,
                errors,
                rollback_performed: false,
                rollback: None,
            };
        };

        tracing::warn!(error = %err, restored = restored_count, "restore failed");
        errors.push(err);
        let rollback = if policy.rollback_on_error {
            self.take(checkpoint_id)
                .map(|checkpoint| rollback_into(store, &checkpoint))
        } else {
            None
        };
        TransactionalRestorationResult {
            success: false,
            checkpoint_id: Some(checkpoint_id),
            restored_count,
            errors,
            rollback_performed: rollback.is_some(),
            rollback,
        }
    }

    /// Restore every atom recorded in checkpoint `id`, newest write first,
    /// then discard the checkpoint.
    ///
    /// Uncommitted checkpoints are accepted too: they are left behind by a
    /// failed restore that ran with `rollback_on_error` off, and rolling one
    /// back is the only way to undo its partial writes.
    pub fn rollback<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        id: CheckpointId,
    ) -> Result<RollbackResult, RestoreError> {
        let _span = tracing::info_span!("rollback", checkpoint = %id).entered();
        self.evict(self.clock.now_ms());
        let checkpoint = self.take(id).ok_or(RestoreError::CheckpointNotFound(id))?;
        Ok(rollback_into(store, &checkpoint))
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn checkpoint(&self, id: CheckpointId) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == id)
    }

    pub fn clear(&mut self) {
        self.checkpoints.clear();
    }

    fn take(&mut self, id: CheckpointId) -> Option<Checkpoint> {
        let index = self.checkpoints.iter().position(|c| c.id == id)?;
        Some(self.checkpoints.remove(index))
    }

    /// Drop expired checkpoints, then the oldest ones past the cap.
    fn evict(&mut self, now: u64) {
        let timeout = self.config.checkpoint_timeout_ms;
        let before = self.checkpoints.len();
        self.checkpoints.retain(|c| !c.is_expired(now, timeout));
        let expired = before - self.checkpoints.len();
        if expired > 0 {
            tracing::debug!(expired, "evicted expired checkpoints");
        }
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        let max = self.config.max_checkpoints.max(1);
        if self.checkpoints.len() > max {
            let overflow = self.checkpoints.len() - max;
            self.checkpoints.drain(..overflow);
            tracing::debug!(evicted = overflow, "evicted oldest checkpoints");
        }
    }
}

/// Result for a restore stopped before any write. The store is untouched,
/// which counts as rolled back.
fn rejected(err: RestoreError) -> TransactionalRestorationResult {
    TransactionalRestorationResult {
        success: false,
        checkpoint_id: None,
        restored_count: 0,
        errors: vec![err],
        rollback_performed: true,
        rollback: None,
    }
}

fn rollback_into<S: Store + ?Sized>(store: &mut S, checkpoint: &Checkpoint) -> RollbackResult {
    let mut rolled_back_count = 0;
    let mut failed_count = 0;
    for entry in checkpoint.previous_values.iter().rev() {
        if store.get(&entry.atom).is_ok_and(|current| current == entry.value) {
            rolled_back_count += 1;
            continue;
        }
        match store.set(&entry.atom, entry.value.clone()) {
            Ok(()) => rolled_back_count += 1,
            Err(err) => {
                tracing::warn!(atom = %entry.atom.name, error = %err, "rollback write failed");
                failed_count += 1;
            }
        }
    }
    tracing::info!(rolled_back = rolled_back_count, failed = failed_count, "rollback finished");
    RollbackResult {
        success: failed_count == 0,
        rolled_back_count,
        failed_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use atomline_common::{ManualClock, SequentialIds, StateMap};
    use atomline_store::{AtomRecord, AtomRegistry, MemoryStore, StoreError};
    use serde_json::json;

    /// Memory store whose reads of one atom always fail.
    struct UnreadableAtom {
        inner: MemoryStore,
        unreadable: &'static str,
    }

    impl Store for UnreadableAtom {
        fn get(&self, atom: &AtomRef) -> Result<serde_json::Value, StoreError> {
            if atom.name == self.unreadable {
                return Err(StoreError::AtomNotFound(atom.name.clone()));
            }
            self.inner.get(atom)
        }

        fn set(&mut self, atom: &AtomRef, value: serde_json::Value) -> Result<(), StoreError> {
            self.inner.set(atom, value)
        }
    }

    impl AtomRegistry for UnreadableAtom {
        fn resolve(&self, name: &str) -> Option<AtomRef> {
            self.inner.resolve(name)
        }

        fn atoms(&self) -> Vec<AtomRecord> {
            self.inner.atoms()
        }

        fn cleanup_stale(&mut self, max_age_ms: u64, now_ms: u64) -> usize {
            self.inner.cleanup_stale(max_age_ms, now_ms)
        }
    }

    struct Fixture {
        clock: ManualClock,
        ids: Arc<SequentialIds>,
        store: MemoryStore,
        restorer: TransactionalRestorer,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(CheckpointConfig::default())
        }

        fn with_config(config: CheckpointConfig) -> Self {
            let clock = ManualClock::new(1_000);
            let ids = Arc::new(SequentialIds::new());
            let store = MemoryStore::with_clock(Arc::new(clock.clone()));
            let restorer = TransactionalRestorer::new(config, Arc::new(clock.clone()), ids.clone());
            Self {
                clock,
                ids,
                store,
                restorer,
            }
        }

        fn snapshot(&self, pairs: &[(&str, serde_json::Value)]) -> FullSnapshot {
            let state: StateMap = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), StateEntry::new(*k, v.clone())))
                .collect();
            FullSnapshot::capture(self.ids.snapshot_id(), state, self.clock.now_ms(), None)
        }

        fn restore(&mut self, snapshot: &FullSnapshot, policy: RestorePolicy) -> TransactionalRestorationResult {
            self.restorer.restore_with_transaction(
                &mut self.store,
                snapshot,
                RestoreOptions::with_policy(policy),
            )
        }
    }

    #[test]
    fn counter_restore_then_manual_rollback() {
        let mut fx = Fixture::new();
        fx.store.atom("counter", json!(0));
        let s1 = fx.snapshot(&[("counter", json!(0))]);
        fx.store.set_by_name("counter", json!(5)).unwrap();

        let result = fx.restore(&s1, RestorePolicy::default());
        assert!(result.success);
        assert_eq!(result.restored_count, 1);
        assert!(!result.rollback_performed);
        assert_eq!(fx.store.value("counter"), Some(&json!(0)));

        let id = result.checkpoint_id.unwrap();
        assert!(fx.restorer.checkpoint(id).unwrap().metadata.committed);
        let rollback = fx.restorer.rollback(&mut fx.store, id).unwrap();
        assert!(rollback.success);
        assert_eq!(rollback.rolled_back_count, 1);
        assert_eq!(fx.store.value("counter"), Some(&json!(5)));
        assert!(fx.restorer.checkpoint(id).is_none());
    }

    #[test]
    fn rollback_is_exact() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        fx.store.atom("b", json!(2));
        let target = fx.snapshot(&[("a", json!(10)), ("b", json!(20))]);

        let result = fx.restore(&target, RestorePolicy::default());
        assert!(result.success);
        assert_eq!(fx.store.value("a"), Some(&json!(10)));

        fx.restorer
            .rollback(&mut fx.store, result.checkpoint_id.unwrap())
            .unwrap();
        assert_eq!(fx.store.value("a"), Some(&json!(1)));
        assert_eq!(fx.store.value("b"), Some(&json!(2)));
    }

    #[test]
    fn rollback_runs_in_reverse_order() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        fx.store.atom("b", json!(2));
        let target = fx.snapshot(&[("a", json!(10)), ("b", json!(20))]);
        let result = fx.restore(&target, RestorePolicy::default());
        fx.store.drain_events();

        fx.restorer
            .rollback(&mut fx.store, result.checkpoint_id.unwrap())
            .unwrap();
        let written: Vec<String> = fx
            .store
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                atomline_store::StoreEvent::Written { atom, .. } => Some(atom.name),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn invalid_snapshot_touches_nothing() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        let mut target = fx.snapshot(&[("a", json!(10))]);
        target.metadata.atom_count = 3;

        let result = fx.restore(&target, RestorePolicy::default());
        assert!(!result.success);
        assert!(result.rollback_performed);
        assert!(result.rollback.is_none());
        assert!(result.checkpoint_id.is_none());
        assert!(matches!(result.errors[0], RestoreError::Validation { .. }));
        assert_eq!(fx.store.value("a"), Some(&json!(1)));
        assert!(fx.restorer.checkpoints().is_empty());
    }

    #[test]
    fn unreadable_atom_aborts_before_any_write() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        fx.store.atom("b", json!(2));
        let target = fx.snapshot(&[("a", json!(10)), ("b", json!(20))]);
        let mut store = UnreadableAtom {
            inner: std::mem::take(&mut fx.store),
            unreadable: "b",
        };

        let result =
            fx.restorer
                .restore_with_transaction(&mut store, &target, RestoreOptions::default());
        assert!(!result.success);
        assert!(result.rollback_performed);
        assert_eq!(result.restored_count, 0);
        assert!(result.checkpoint_id.is_none());
        assert!(matches!(
            &result.errors[0],
            RestoreError::Checkpoint { atom, .. } if atom == "b"
        ));
        assert_eq!(store.inner.value("a"), Some(&json!(1)));
        assert_eq!(store.inner.value("b"), Some(&json!(2)));
        assert!(fx.restorer.checkpoints().is_empty());
    }

    #[test]
    fn tampered_state_fails_fingerprint() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        let mut target = fx.snapshot(&[("a", json!(10))]);
        target.state.insert("a".into(), StateEntry::new("a", json!(11)));
        let result = fx.restore(&target, RestorePolicy::default());
        assert!(!result.success);
        assert_eq!(fx.store.value("a"), Some(&json!(1)));
    }

    #[test]
    fn write_failure_rolls_back() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        fx.store.register("b", AtomKind::Computed, json!(2));
        let target = fx.snapshot(&[("a", json!(10)), ("b", json!(20))]);

        let result = fx.restore(&target, RestorePolicy::default());
        assert!(!result.success);
        assert!(result.rollback_performed);
        assert_eq!(result.restored_count, 1);
        assert!(matches!(result.errors[0], RestoreError::Apply { .. }));
        let rollback = result.rollback.unwrap();
        assert!(rollback.success);
        assert_eq!(rollback.rolled_back_count, 2);
        assert_eq!(fx.store.value("a"), Some(&json!(1)));
        assert!(fx.restorer.checkpoints().is_empty());
    }

    #[test]
    fn write_failure_without_rollback_keeps_partial_state() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        fx.store.register("b", AtomKind::Computed, json!(2));
        let target = fx.snapshot(&[("a", json!(10)), ("b", json!(20))]);

        let policy = RestorePolicy {
            rollback_on_error: false,
            ..RestorePolicy::default()
        };
        let result = fx.restore(&target, policy);
        assert!(!result.success);
        assert!(!result.rollback_performed);
        assert_eq!(fx.store.value("a"), Some(&json!(10)));

        // the uncommitted checkpoint can still be rolled back by hand
        let id = result.checkpoint_id.unwrap();
        fx.restorer.rollback(&mut fx.store, id).unwrap();
        assert_eq!(fx.store.value("a"), Some(&json!(1)));
    }

    #[test]
    fn skip_errors_continues_and_reports() {
        let mut fx = Fixture::new();
        fx.store.register("a", AtomKind::Computed, json!(1));
        fx.store.atom("b", json!(2));
        let target = fx.snapshot(&[("a", json!(10)), ("b", json!(20))]);

        let policy = RestorePolicy {
            skip_errors: true,
            ..RestorePolicy::default()
        };
        let result = fx.restore(&target, policy);
        assert!(result.success);
        assert_eq!(result.restored_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(fx.store.value("b"), Some(&json!(20)));
    }

    #[test]
    fn missing_atom_policies() {
        let mut fx = Fixture::new();
        fx.store.atom("a", json!(1));
        let target = fx.snapshot(&[("a", json!(10)), ("ghost", json!(0))]);

        for policy in [AtomNotFoundPolicy::Skip, AtomNotFoundPolicy::Warn] {
            fx.store.set_by_name("a", json!(1)).unwrap();
            let result = fx.restore(
                &target,
                RestorePolicy {
                    on_atom_not_found: policy,
                    ..RestorePolicy::default()
                },
            );
            assert!(result.success);
            assert_eq!(result.restored_count, 1);
        }

        fx.store.set_by_name("a", json!(1)).unwrap();
        let result = fx.restore(
            &target,
            RestorePolicy {
                on_atom_not_found: AtomNotFoundPolicy::Throw,
                ..RestorePolicy::default()
            },
        );
        assert!(!result.success);
        assert!(result.rollback_performed);
        assert_eq!(
            result.errors,
            vec![RestoreError::AtomNotFound("ghost".to_string())]
        );
        assert_eq!(fx.store.value("a"), Some(&json!(1)));
    }

    #[test]
    fn computed_entries_are_not_written() {
        let mut fx = Fixture::new();
        fx.store.register("double", AtomKind::Computed, json!(4));
        let mut state = StateMap::new();
        state.insert(
            "double".into(),
            StateEntry::new("double", json!(8)).with_kind(AtomKind::Computed),
        );
        let target = FullSnapshot::capture(fx.ids.snapshot_id(), state, 0, None);
        let result = fx.restore(&target, RestorePolicy::default());
        assert!(result.success);
        assert_eq!(result.restored_count, 0);
        assert_eq!(fx.store.value("double"), Some(&json!(4)));
    }

    #[test]
    fn progress_per_item_and_per_batch() {
        let mut fx = Fixture::new();
        for name in ["a", "b", "c", "d", "e"] {
            fx.store.atom(name, json!(0));
        }
        let target = fx.snapshot(&[
            ("a", json!(1)),
            ("b", json!(1)),
            ("c", json!(1)),
            ("d", json!(1)),
            ("e", json!(1)),
        ]);

        let seen = RefCell::new(Vec::new());
        let options = RestoreOptions::default().on_progress(|p| seen.borrow_mut().push(p));
        fx.restorer
            .restore_with_transaction(&mut fx.store, &target, options);
        assert_eq!(seen.borrow().len(), 5);

        seen.borrow_mut().clear();
        let options = RestoreOptions::with_policy(RestorePolicy {
            batch_size: 2,
            ..RestorePolicy::default()
        })
        .on_progress(|p| seen.borrow_mut().push(p));
        fx.restorer
            .restore_with_transaction(&mut fx.store, &target, options);
        let indices: Vec<usize> = seen.borrow().iter().map(|p| p.current_index).collect();
        assert_eq!(indices, vec![1, 3, 4]);
        assert!(seen.borrow().iter().all(|p| p.total == 5));
    }

    #[test]
    fn timeout_between_batches_rolls_back() {
        let mut fx = Fixture::new();
        for name in ["a", "b", "c", "d"] {
            fx.store.atom(name, json!(0));
        }
        let target = fx.snapshot(&[
            ("a", json!(1)),
            ("b", json!(1)),
            ("c", json!(1)),
            ("d", json!(1)),
        ]);
        let clock = fx.clock.clone();
        let options = RestoreOptions::with_policy(RestorePolicy {
            batch_size: 2,
            timeout_ms: Some(50),
            ..RestorePolicy::default()
        })
        .on_progress(move |_| clock.advance(100));

        let result = fx
            .restorer
            .restore_with_transaction(&mut fx.store, &target, options);
        assert!(!result.success);
        assert!(result.rollback_performed);
        assert_eq!(result.restored_count, 2);
        assert!(matches!(result.errors[0], RestoreError::Timeout { .. }));
        for name in ["a", "b", "c", "d"] {
            assert_eq!(fx.store.value(name), Some(&json!(0)));
        }
    }

    #[test]
    fn checkpoints_are_capped_and_expire() {
        let mut fx = Fixture::with_config(CheckpointConfig {
            max_checkpoints: 2,
            checkpoint_timeout_ms: 1_000,
        });
        fx.store.atom("a", json!(0));
        let mut ids = Vec::new();
        for v in 1..=3 {
            let target = fx.snapshot(&[("a", json!(v))]);
            ids.push(fx.restore(&target, RestorePolicy::default()).checkpoint_id.unwrap());
        }
        let kept: Vec<_> = fx.restorer.checkpoints().iter().map(|c| c.id).collect();
        assert_eq!(kept, vec![ids[1], ids[2]]);

        fx.clock.advance(1_001);
        let err = fx.restorer.rollback(&mut fx.store, ids[2]).unwrap_err();
        assert_eq!(err, RestoreError::CheckpointNotFound(ids[2]));
        assert!(fx.restorer.checkpoints().is_empty());
    }
}
