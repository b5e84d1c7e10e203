//! Replays delta chains into full snapshots, with a bounded result cache.

use std::collections::{HashMap, VecDeque};

use atomline_common::SnapshotId;
use serde::{Deserialize, Serialize};

use crate::calculator::{Validation, apply_delta_in_place};
use crate::chain::DeltaChain;
use crate::error::DeltaError;
use crate::snapshot::{DeltaSnapshot, FullSnapshot, fingerprint_state};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructorConfig {
    pub max_cache_size: usize,
}

impl Default for ReconstructorConfig {
    fn default() -> Self {
        Self { max_cache_size: 50 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

type CacheKey = (SnapshotId, SnapshotId);

/// Rebuilds the snapshot at a point of a chain by replaying its deltas.
///
/// Results are cached by `(base id, target delta id)` and evicted oldest
/// first. Replay is a pure function of the base and the delta prefix, so a
/// cached prefix is also reused as the starting point for longer targets.
#[derive(Debug, Default)]
pub struct SnapshotReconstructor {
    config: ReconstructorConfig,
    cache: HashMap<CacheKey, FullSnapshot>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl SnapshotReconstructor {
    pub fn new(config: ReconstructorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Snapshot at `target`: the base itself, or the base with every delta
    /// up to and including `target` applied. The result carries `target`'s id.
    pub fn reconstruct(
        &mut self,
        base: &FullSnapshot,
        deltas: &[DeltaSnapshot],
        target: SnapshotId,
    ) -> Result<FullSnapshot, DeltaError> {
        if target == base.id {
            return Ok(base.clone());
        }
        let key = (base.id, target);
        if let Some(hit) = self.cache.get(&key) {
            self.hits += 1;
            tracing::trace!(base = %base.id, %target, "reconstruction cache hit");
            return Ok(hit.clone());
        }
        self.misses += 1;

        let end = deltas
            .iter()
            .position(|d| d.id == target)
            .ok_or(DeltaError::TargetNotFound {
                base: base.id,
                target,
            })?;

        let (start, mut working) = (0..end)
            .rev()
            .find_map(|i| {
                self.cache
                    .get(&(base.id, deltas[i].id))
                    .map(|prefix| (i + 1, prefix.clone()))
            })
            .unwrap_or_else(|| (0, base.clone()));

        for delta in &deltas[start..=end] {
            if delta.base_snapshot_id != base.id {
                return Err(DeltaError::BaseMismatch {
                    expected: base.id,
                    actual: delta.base_snapshot_id,
                });
            }
            apply_delta_in_place(&mut working, delta, Validation::Skip)?;
        }
        working.id = target;
        working.metadata.fingerprint = Some(fingerprint_state(&working.state));
        tracing::debug!(base = %base.id, %target, replayed = end + 1 - start, "reconstructed snapshot");

        self.insert(key, working.clone());
        Ok(working)
    }

    /// [`reconstruct`](Self::reconstruct) against a chain's own base and deltas.
    pub fn reconstruct_chain(
        &mut self,
        chain: &DeltaChain,
        target: SnapshotId,
    ) -> Result<FullSnapshot, DeltaError> {
        self.reconstruct(&chain.base, &chain.deltas, target)
    }

    fn insert(&mut self, key: CacheKey, snapshot: FullSnapshot) {
        if self.config.max_cache_size == 0 {
            return;
        }
        while self.cache.len() >= self.config.max_cache_size {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.cache.remove(&oldest);
                }
                None => break,
            }
        }
        if self.cache.insert(key, snapshot).is_none() {
            self.order.push_back(key);
        }
    }

    /// Drop cached results replayed from `base_id`.
    pub fn invalidate_base(&mut self, base_id: SnapshotId) {
        self.cache.retain(|(base, _), _| *base != base_id);
        self.order.retain(|(base, _)| *base != base_id);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    pub fn config(&self) -> &ReconstructorConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.cache.len(),
            capacity: self.config.max_cache_size,
        }
    }
}
