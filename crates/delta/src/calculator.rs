//! Pure diff/apply functions between snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use atomline_common::{SnapshotId, StateEntry, StateMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeltaError;
use crate::snapshot::{
    ChangeType, DeltaChange, DeltaMetadata, DeltaSnapshot, FullSnapshot, SnapshotMetadata,
    estimate_state_size,
};

/// How two atom values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqualityMode {
    /// Scalars by value; containers by their top level only. A nested
    /// container inside an array or object always counts as changed.
    Shallow,
    /// Full structural equality.
    #[default]
    Deep,
}

/// Custom change test. Returns `true` when `previous` and `current` differ.
pub type ChangeDetector = Arc<dyn Fn(&StateEntry, &StateEntry) -> bool + Send + Sync>;

/// The snapshot a computed delta is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRef {
    pub id: SnapshotId,
    pub timestamp: u64,
}

/// Options for [`compute_delta`].
#[derive(Clone)]
pub struct DeltaOptions {
    pub equality: EqualityMode,
    /// Return `None` instead of an empty delta.
    pub skip_empty: bool,
    /// Overrides `equality` when set.
    pub change_detector: Option<ChangeDetector>,
    /// Anchor for the delta. Defaults to the previous snapshot.
    pub base: Option<BaseRef>,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            equality: EqualityMode::Deep,
            skip_empty: true,
            change_detector: None,
            base: None,
        }
    }
}

impl std::fmt::Debug for DeltaOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaOptions")
            .field("equality", &self.equality)
            .field("skip_empty", &self.skip_empty)
            .field("change_detector", &self.change_detector.is_some())
            .field("base", &self.base)
            .finish()
    }
}

/// Whether [`apply_delta`] checks the delta against its base first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// Reject base-id mismatches and empty deltas.
    #[default]
    Strict,
    /// Apply without checks. For callers that already enforce the chain invariant.
    Skip,
}

/// Compute the changes that turn `previous` into `current`.
///
/// The resulting delta takes `current`'s id and timestamp and is anchored to
/// `options.base`, or to `previous` when no base is given.
pub fn compute_delta(
    previous: &FullSnapshot,
    current: &FullSnapshot,
    options: &DeltaOptions,
) -> Option<DeltaSnapshot> {
    let mut changes = BTreeMap::new();

    for (name, prev) in &previous.state {
        match current.state.get(name) {
            None => {
                changes.insert(
                    name.clone(),
                    DeltaChange {
                        atom_id: prev.atom_id.clone(),
                        atom_name: name.clone(),
                        kind: prev.kind,
                        old_value: Some(prev.value.clone()),
                        new_value: None,
                        change_type: ChangeType::Deleted,
                        path: None,
                    },
                );
            }
            Some(cur) => {
                let changed = match &options.change_detector {
                    Some(detect) => detect(prev, cur),
                    None => !values_equal(&prev.value, &cur.value, options.equality),
                };
                if changed {
                    changes.insert(
                        name.clone(),
                        DeltaChange {
                            atom_id: cur.atom_id.clone(),
                            atom_name: name.clone(),
                            kind: cur.kind,
                            old_value: Some(prev.value.clone()),
                            new_value: Some(cur.value.clone()),
                            change_type: ChangeType::Modified,
                            path: changed_keys(&prev.value, &cur.value),
                        },
                    );
                }
            }
        }
    }

    for (name, cur) in &current.state {
        if !previous.state.contains_key(name) {
            changes.insert(
                name.clone(),
                DeltaChange {
                    atom_id: cur.atom_id.clone(),
                    atom_name: name.clone(),
                    kind: cur.kind,
                    old_value: None,
                    new_value: Some(cur.value.clone()),
                    change_type: ChangeType::Added,
                    path: None,
                },
            );
        }
    }

    if changes.is_empty() && options.skip_empty {
        tracing::trace!(previous = %previous.id, current = %current.id, "no changes, delta skipped");
        return None;
    }

    let base = options.base.unwrap_or(BaseRef {
        id: previous.id,
        timestamp: previous.metadata.timestamp,
    });
    let compressed_size: usize = changes
        .iter()
        .map(|(name, change): (&String, &DeltaChange)| name.len() * 2 + change.estimated_size())
        .sum();

    Some(DeltaSnapshot {
        id: current.id,
        base_snapshot_id: base.id,
        metadata: DeltaMetadata {
            timestamp: current.metadata.timestamp,
            action: current.metadata.action.clone(),
            atom_count: current.state.len(),
            base_timestamp: base.timestamp,
            change_count: changes.len(),
            compressed_size,
            original_size: estimate_state_size(&current.state),
        },
        changes,
    })
}

/// Apply a delta to a copy of `base`. `base` is never modified.
///
/// The result takes the delta's id and metadata.
pub fn apply_delta(
    base: &FullSnapshot,
    delta: &DeltaSnapshot,
    validation: Validation,
) -> Result<FullSnapshot, DeltaError> {
    validate(base, delta, validation)?;
    let mut state = base.state.clone();
    apply_changes(&mut state, delta);
    Ok(FullSnapshot {
        id: delta.id,
        metadata: SnapshotMetadata {
            timestamp: delta.metadata.timestamp,
            action: delta.metadata.action.clone(),
            atom_count: state.len(),
            fingerprint: None,
        },
        state,
    })
}

/// Apply a delta by mutating `target` in place.
///
/// Meant for replay loops. The target keeps its id so that later deltas of
/// the same chain still validate against it; its metadata follows the delta.
pub fn apply_delta_in_place(
    target: &mut FullSnapshot,
    delta: &DeltaSnapshot,
    validation: Validation,
) -> Result<(), DeltaError> {
    validate(target, delta, validation)?;
    apply_changes(&mut target.state, delta);
    target.metadata.timestamp = delta.metadata.timestamp;
    target.metadata.action = delta.metadata.action.clone();
    target.metadata.atom_count = target.state.len();
    target.metadata.fingerprint = None;
    Ok(())
}

/// Whether two snapshots hold equal state. Ids and metadata are ignored.
pub fn are_snapshots_equal(a: &FullSnapshot, b: &FullSnapshot) -> bool {
    a.state.len() == b.state.len()
        && a.state.iter().all(|(name, entry)| {
            b.state
                .get(name)
                .is_some_and(|other| values_equal(&entry.value, &other.value, EqualityMode::Deep))
        })
}

/// Number of atoms whose presence or value differs between two states.
pub fn count_changes(previous: &StateMap, current: &StateMap) -> usize {
    let changed_or_removed = previous
        .iter()
        .filter(|(name, entry)| current.get(*name).is_none_or(|cur| cur.value != entry.value))
        .count();
    let added = current
        .keys()
        .filter(|name| !previous.contains_key(*name))
        .count();
    changed_or_removed + added
}

/// Compare two values under the given mode.
pub fn values_equal(a: &Value, b: &Value, mode: EqualityMode) -> bool {
    match mode {
        EqualityMode::Deep => a == b,
        EqualityMode::Shallow => match (a, b) {
            (Value::Array(x), Value::Array(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(l, r)| scalar_eq(l, r))
            }
            (Value::Object(x), Value::Object(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .all(|(k, l)| y.get(k).is_some_and(|r| scalar_eq(l, r)))
            }
            _ => scalar_eq(a, b),
        },
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => a == b,
    }
}

/// Top-level keys that differ between two objects.
fn changed_keys(prev: &Value, cur: &Value) -> Option<Vec<String>> {
    let (Value::Object(p), Value::Object(c)) = (prev, cur) else {
        return None;
    };
    let mut keys: Vec<String> = p
        .iter()
        .filter(|(k, v)| c.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .chain(c.keys().filter(|k| !p.contains_key(*k)).cloned())
        .collect();
    keys.sort();
    Some(keys)
}

fn validate(
    base: &FullSnapshot,
    delta: &DeltaSnapshot,
    validation: Validation,
) -> Result<(), DeltaError> {
    if validation == Validation::Skip {
        return Ok(());
    }
    if delta.base_snapshot_id != base.id {
        return Err(DeltaError::BaseMismatch {
            expected: base.id,
            actual: delta.base_snapshot_id,
        });
    }
    if delta.changes.is_empty() {
        return Err(DeltaError::EmptyDelta(delta.id));
    }
    Ok(())
}

fn apply_changes(state: &mut StateMap, delta: &DeltaSnapshot) {
    for (name, change) in &delta.changes {
        match change.to_entry() {
            Some(entry) => {
                state.insert(name.clone(), entry);
            }
            None => {
                state.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomline_common::{AtomKind, IdGenerator, SequentialIds};
    use serde_json::json;

    fn snap(ids: &SequentialIds, pairs: &[(&str, Value)]) -> FullSnapshot {
        let state = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), StateEntry::new(*k, v.clone())))
            .collect();
        FullSnapshot::capture(ids.snapshot_id(), state, 0, None)
    }

    #[test]
    fn detects_added_modified_deleted() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("kept", json!(1)), ("changed", json!(1)), ("gone", json!(1))]);
        let b = snap(&ids, &[("kept", json!(1)), ("changed", json!(2)), ("new", json!(3))]);

        let delta = compute_delta(&a, &b, &DeltaOptions::default()).unwrap();
        assert_eq!(delta.change_count(), 3);
        assert_eq!(delta.changes["changed"].change_type, ChangeType::Modified);
        assert_eq!(delta.changes["gone"].change_type, ChangeType::Deleted);
        assert_eq!(delta.changes["new"].change_type, ChangeType::Added);
        assert!(!delta.changes.contains_key("kept"));
        assert_eq!(delta.base_snapshot_id, a.id);
        assert_eq!(delta.id, b.id);
    }

    #[test]
    fn identical_snapshots_produce_no_delta() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("x", json!({"deep": [1, 2]}))]);
        assert!(compute_delta(&a, &a, &DeltaOptions::default()).is_none());
    }

    #[test]
    fn empty_delta_kept_when_not_skipping() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("x", json!(1))]);
        let b = snap(&ids, &[("x", json!(1))]);
        let options = DeltaOptions {
            skip_empty: false,
            ..DeltaOptions::default()
        };
        let delta = compute_delta(&a, &b, &options).unwrap();
        assert_eq!(delta.change_count(), 0);
    }

    #[test]
    fn round_trip_reproduces_target_state() {
        let ids = SequentialIds::new();
        let pairs = [
            (
                snap(&ids, &[("a", json!(1)), ("b", json!("s"))]),
                snap(&ids, &[("a", json!(2)), ("c", json!([1, 2, 3]))]),
            ),
            (
                snap(&ids, &[]),
                snap(&ids, &[("only", json!({"k": true}))]),
            ),
            (
                snap(&ids, &[("a", json!({"n": {"m": 1}}))]),
                snap(&ids, &[("a", json!({"n": {"m": 2}}))]),
            ),
            (snap(&ids, &[("a", json!(null))]), snap(&ids, &[])),
        ];
        for (a, b) in pairs {
            let delta = compute_delta(&a, &b, &DeltaOptions::default()).unwrap();
            let applied = apply_delta(&a, &delta, Validation::Strict).unwrap();
            assert!(are_snapshots_equal(&applied, &b));
        }
    }

    #[test]
    fn apply_does_not_touch_base() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("a", json!(1))]);
        let b = snap(&ids, &[("a", json!(2))]);
        let before = a.clone();
        let delta = compute_delta(&a, &b, &DeltaOptions::default()).unwrap();
        let _ = apply_delta(&a, &delta, Validation::Strict).unwrap();
        assert_eq!(a, before);
    }

    #[test]
    fn in_place_mutates_and_keeps_id() {
        let ids = SequentialIds::new();
        let mut a = snap(&ids, &[("a", json!(1))]);
        let b = snap(&ids, &[("a", json!(2))]);
        let delta = compute_delta(&a, &b, &DeltaOptions::default()).unwrap();
        let id = a.id;
        apply_delta_in_place(&mut a, &delta, Validation::Strict).unwrap();
        assert_eq!(a.id, id);
        assert_eq!(a.state["a"].value, json!(2));
    }

    #[test]
    fn base_mismatch_rejected_unless_skipped() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("a", json!(1))]);
        let b = snap(&ids, &[("a", json!(2))]);
        let other = snap(&ids, &[("a", json!(1))]);
        let delta = compute_delta(&a, &b, &DeltaOptions::default()).unwrap();

        assert_eq!(
            apply_delta(&other, &delta, Validation::Strict),
            Err(DeltaError::BaseMismatch {
                expected: other.id,
                actual: a.id
            })
        );
        assert!(apply_delta(&other, &delta, Validation::Skip).is_ok());
    }

    #[test]
    fn empty_delta_rejected_by_strict_validation() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("a", json!(1))]);
        let b = snap(&ids, &[("a", json!(1))]);
        let options = DeltaOptions {
            skip_empty: false,
            ..DeltaOptions::default()
        };
        let delta = compute_delta(&a, &b, &options).unwrap();
        assert_eq!(
            apply_delta(&a, &delta, Validation::Strict),
            Err(DeltaError::EmptyDelta(b.id))
        );
    }

    #[test]
    fn shallow_equality_treats_nested_containers_as_changed() {
        let nested = json!({"inner": {"x": 1}});
        assert!(values_equal(&nested, &nested, EqualityMode::Deep));
        assert!(!values_equal(&nested, &nested, EqualityMode::Shallow));
        assert!(values_equal(&json!([1, "a"]), &json!([1, "a"]), EqualityMode::Shallow));
        assert!(values_equal(&json!(3), &json!(3), EqualityMode::Shallow));
    }

    #[test]
    fn custom_detector_overrides_equality() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("a", json!(1)), ("b", json!(1))]);
        let b = snap(&ids, &[("a", json!(2)), ("b", json!(2))]);
        let options = DeltaOptions {
            change_detector: Some(Arc::new(|_prev: &StateEntry, cur: &StateEntry| cur.name == "a")),
            ..DeltaOptions::default()
        };
        let delta = compute_delta(&a, &b, &options).unwrap();
        assert_eq!(delta.change_count(), 1);
        assert!(delta.changes.contains_key("a"));
    }

    #[test]
    fn explicit_base_anchors_delta() {
        let ids = SequentialIds::new();
        let base = snap(&ids, &[("a", json!(0))]);
        let a = snap(&ids, &[("a", json!(1))]);
        let b = snap(&ids, &[("a", json!(2))]);
        let options = DeltaOptions {
            base: Some(BaseRef {
                id: base.id,
                timestamp: 42,
            }),
            ..DeltaOptions::default()
        };
        let delta = compute_delta(&a, &b, &options).unwrap();
        assert_eq!(delta.base_snapshot_id, base.id);
        assert_eq!(delta.metadata.base_timestamp, 42);
    }

    #[test]
    fn size_estimates_are_recorded() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("a", json!("short"))]);
        let b = snap(&ids, &[("a", json!("a much longer string value"))]);
        let delta = compute_delta(&a, &b, &DeltaOptions::default()).unwrap();
        assert!(delta.metadata.compressed_size > 0);
        assert!(delta.metadata.original_size > 0);
        assert_eq!(delta.metadata.change_count, 1);
    }

    #[test]
    fn object_modifications_record_changed_keys() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("user", json!({"name": "a", "age": 1}))]);
        let b = snap(&ids, &[("user", json!({"name": "a", "age": 2, "tag": "x"}))]);
        let delta = compute_delta(&a, &b, &DeltaOptions::default()).unwrap();
        assert_eq!(
            delta.changes["user"].path,
            Some(vec!["age".to_string(), "tag".to_string()])
        );
    }

    #[test]
    fn equality_ignores_metadata() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("a", json!(1))]);
        let mut b = snap(&ids, &[("a", json!(1))]);
        b.metadata.timestamp = 999;
        b.state.get_mut("a").unwrap().kind = AtomKind::Writable;
        assert!(are_snapshots_equal(&a, &b));
    }

    #[test]
    fn count_changes_counts_each_side() {
        let ids = SequentialIds::new();
        let a = snap(&ids, &[("a", json!(1)), ("b", json!(1))]);
        let b = snap(&ids, &[("a", json!(2)), ("c", json!(1))]);
        assert_eq!(count_changes(&a.state, &b.state), 3);
    }
}
