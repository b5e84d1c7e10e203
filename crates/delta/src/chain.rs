//! Delta chains and their lifecycle.
//!
//! A chain is opened lazily for a base snapshot on its first delta and stays
//! *active* while new deltas extend it. Once a bound is hit the owner seals
//! it with [`DeltaChainManager::create_new_base_snapshot`]; sealed chains are
//! read-only and stay available for replay until pruned.

use std::collections::BTreeMap;
use std::sync::Arc;

use atomline_common::{Clock, SnapshotId};
use serde::{Deserialize, Serialize};

use crate::compression::{ChainCompression, CompressionMetadata, CompressionStrategy};
use crate::error::DeltaError;
use crate::snapshot::{DeltaSnapshot, FullSnapshot};

/// Bounds on a single chain. Any one of them triggers a new base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaChainConfig {
    pub max_delta_chain_length: usize,
    pub max_delta_chain_age_ms: u64,
    /// Estimated bytes.
    pub max_delta_chain_size: usize,
}

impl Default for DeltaChainConfig {
    fn default() -> Self {
        Self {
            max_delta_chain_length: 20,
            max_delta_chain_age_ms: 300_000,
            max_delta_chain_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub delta_count: usize,
    pub memory_usage: usize,
    pub created_at: u64,
    pub updated_at: u64,
    pub max_deltas: usize,
}

/// Ordered deltas anchored to one full snapshot. Order is replay order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaChain {
    pub base: FullSnapshot,
    pub deltas: Vec<DeltaSnapshot>,
    pub metadata: ChainMetadata,
}

impl DeltaChain {
    pub fn new(base: FullSnapshot, now: u64) -> Self {
        Self {
            base,
            deltas: Vec::new(),
            metadata: ChainMetadata {
                delta_count: 0,
                memory_usage: 0,
                created_at: now,
                updated_at: now,
                max_deltas: 0,
            },
        }
    }

    pub fn base_id(&self) -> SnapshotId {
        self.base.id
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Index of the delta with this id.
    pub fn position(&self, id: SnapshotId) -> Option<usize> {
        self.deltas.iter().position(|d| d.id == id)
    }

    pub fn contains(&self, id: SnapshotId) -> bool {
        self.position(id).is_some()
    }

    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.metadata.created_at)
    }

    /// Refresh `delta_count` and `memory_usage` from the deltas held.
    pub fn recompute(&mut self, now: u64) {
        self.metadata.delta_count = self.deltas.len();
        self.metadata.memory_usage = self.deltas.iter().map(DeltaSnapshot::estimated_size).sum();
        self.metadata.updated_at = now;
    }
}

/// What the owner should do with a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainAction {
    Keep,
    CreateBase,
    /// The chain is inconsistent and must be rebuilt from a fresh base.
    Reconstruct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
    pub action: ChainAction,
}

impl ChainValidation {
    fn keep() -> Self {
        Self {
            is_valid: true,
            reason: None,
            action: ChainAction::Keep,
        }
    }

    fn fail(action: ChainAction, reason: String) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
            action,
        }
    }
}

/// A chain as it was before a compression run rewrote it.
#[derive(Debug, Clone)]
pub struct ChainCompaction {
    pub before: DeltaChain,
    pub metadata: Option<CompressionMetadata>,
}

#[derive(Debug, Clone)]
pub struct AddDeltaOutcome {
    /// A bound was hit; the owner should seal the chain and capture a full snapshot.
    pub needs_new_base: bool,
    /// Set when the chain strategy rewrote the chain after this delta.
    pub compaction: Option<ChainCompaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStats {
    pub active_chains: usize,
    pub sealed_chains: usize,
    pub total_deltas: usize,
    pub memory_usage: usize,
    pub full_snapshots_created: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Owns every delta chain, keyed by base snapshot id.
pub struct DeltaChainManager {
    config: DeltaChainConfig,
    active: BTreeMap<SnapshotId, DeltaChain>,
    sealed: BTreeMap<SnapshotId, DeltaChain>,
    strategy: ChainCompression,
    clock: Arc<dyn Clock>,
    full_snapshots_created: u64,
    cache_hits: u64,
    cache_misses: u64,
}

impl std::fmt::Debug for DeltaChainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaChainManager")
            .field("config", &self.config)
            .field("active", &self.active.len())
            .field("sealed", &self.sealed.len())
            .field("strategy", &self.strategy.kind())
            .finish()
    }
}

impl DeltaChainManager {
    pub fn new(config: DeltaChainConfig, strategy: ChainCompression, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            active: BTreeMap::new(),
            sealed: BTreeMap::new(),
            strategy,
            clock,
            full_snapshots_created: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    pub fn config(&self) -> &DeltaChainConfig {
        &self.config
    }

    /// New bounds apply to existing chains from the next check on.
    pub fn set_config(&mut self, config: DeltaChainConfig) {
        self.config = config;
        for chain in self.active.values_mut() {
            chain.metadata.max_deltas = self.config.max_delta_chain_length;
        }
    }

    pub fn strategy(&self) -> &ChainCompression {
        &self.strategy
    }

    pub fn set_strategy(&mut self, strategy: ChainCompression) {
        self.strategy = strategy;
    }

    /// Append `delta` to the chain of `base`, opening the chain if needed.
    ///
    /// Runs the chain strategy afterwards; if it rewrites the chain, the
    /// pre-compression chain is handed back so the owner can still replay it.
    pub fn add_delta(
        &mut self,
        base: &FullSnapshot,
        delta: DeltaSnapshot,
    ) -> Result<AddDeltaOutcome, DeltaError> {
        if delta.base_snapshot_id != base.id {
            return Err(DeltaError::BaseMismatch {
                expected: base.id,
                actual: delta.base_snapshot_id,
            });
        }
        if self.sealed.contains_key(&base.id) {
            return Err(DeltaError::ChainSealed(base.id));
        }

        let now = self.clock.now_ms();
        let mut chain = match self.active.remove(&base.id) {
            Some(chain) => {
                self.cache_hits += 1;
                chain
            }
            None => {
                self.cache_misses += 1;
                tracing::debug!(base = %base.id, "opening delta chain");
                let mut chain = DeltaChain::new(base.clone(), now);
                chain.metadata.max_deltas = self.config.max_delta_chain_length;
                chain
            }
        };
        chain.deltas.push(delta);
        chain.recompute(now);

        let mut compaction = None;
        if self.strategy.should_compress(&chain) {
            let before = chain.clone();
            chain = self.strategy.compress(chain);
            tracing::info!(
                base = %base.id,
                strategy = self.strategy.name(),
                before = before.len(),
                after = chain.len(),
                "delta chain compressed"
            );
            compaction = Some(ChainCompaction {
                before,
                metadata: self.strategy.metadata().cloned(),
            });
        }

        let needs_new_base = self.should_create_base_snapshot(&chain);
        self.active.insert(base.id, chain);
        Ok(AddDeltaOutcome {
            needs_new_base,
            compaction,
        })
    }

    /// Whether any one of the length, age or size bounds is exceeded.
    pub fn should_create_base_snapshot(&self, chain: &DeltaChain) -> bool {
        self.threshold_reason(chain).is_some()
    }

    fn threshold_reason(&self, chain: &DeltaChain) -> Option<String> {
        let now = self.clock.now_ms();
        if chain.len() >= self.config.max_delta_chain_length {
            return Some(format!(
                "chain length {} reached limit {}",
                chain.len(),
                self.config.max_delta_chain_length
            ));
        }
        if chain.age(now) > self.config.max_delta_chain_age_ms {
            return Some(format!(
                "chain age {}ms exceeds {}ms",
                chain.age(now),
                self.config.max_delta_chain_age_ms
            ));
        }
        if chain.metadata.memory_usage > self.config.max_delta_chain_size {
            return Some(format!(
                "chain memory {} exceeds {}",
                chain.metadata.memory_usage, self.config.max_delta_chain_size
            ));
        }
        None
    }

    /// Seal the active chain of `base_id`. Returns `false` if there was none.
    ///
    /// The caller captures the replacement full snapshot itself.
    pub fn create_new_base_snapshot(&mut self, base_id: SnapshotId) -> bool {
        match self.active.remove(&base_id) {
            Some(chain) => {
                tracing::debug!(base = %base_id, deltas = chain.len(), "sealing delta chain");
                self.sealed.insert(base_id, chain);
                self.full_snapshots_created += 1;
                true
            }
            None => false,
        }
    }

    /// Non-mutating check of a chain against its invariant and bounds.
    pub fn validate_chain(&self, chain: &DeltaChain) -> ChainValidation {
        if let Some(stray) = chain
            .deltas
            .iter()
            .find(|d| d.base_snapshot_id != chain.base_id())
        {
            return ChainValidation::fail(
                ChainAction::Reconstruct,
                format!(
                    "delta {} is based on {}, not {}",
                    stray.id,
                    stray.base_snapshot_id,
                    chain.base_id()
                ),
            );
        }
        match self.threshold_reason(chain) {
            Some(reason) => ChainValidation::fail(ChainAction::CreateBase, reason),
            None => ChainValidation::keep(),
        }
    }

    /// Active or sealed chain anchored to `base_id`.
    pub fn chain(&self, base_id: SnapshotId) -> Option<&DeltaChain> {
        self.active.get(&base_id).or_else(|| self.sealed.get(&base_id))
    }

    pub fn is_active(&self, base_id: SnapshotId) -> bool {
        self.active.contains_key(&base_id)
    }

    pub fn active_chains(&self) -> impl Iterator<Item = &DeltaChain> {
        self.active.values()
    }

    /// The chain holding the delta with this id.
    pub fn chain_containing(&self, delta_id: SnapshotId) -> Option<&DeltaChain> {
        self.active
            .values()
            .chain(self.sealed.values())
            .find(|c| c.contains(delta_id))
    }

    /// The last delta at or before `target` in the chain of `base_id`, or the
    /// chain's last delta when no target is given.
    pub fn delta_at(
        &self,
        base_id: SnapshotId,
        target: Option<SnapshotId>,
    ) -> Option<&DeltaSnapshot> {
        let chain = self.chain(base_id)?;
        match target {
            Some(id) => chain.position(id).map(|i| &chain.deltas[i]),
            None => chain.deltas.last(),
        }
    }

    /// Drop sealed chains whose base `keep` rejects. Returns their base ids.
    pub fn prune_sealed(&mut self, keep: impl Fn(SnapshotId) -> bool) -> Vec<SnapshotId> {
        let pruned: Vec<SnapshotId> = self
            .sealed
            .keys()
            .copied()
            .filter(|id| !keep(*id))
            .collect();
        for id in &pruned {
            self.sealed.remove(id);
        }
        if !pruned.is_empty() {
            tracing::debug!(pruned = pruned.len(), "pruned sealed chains");
        }
        pruned
    }

    pub fn stats(&self) -> ChainStats {
        let all = || self.active.values().chain(self.sealed.values());
        ChainStats {
            active_chains: self.active.len(),
            sealed_chains: self.sealed.len(),
            total_deltas: all().map(DeltaChain::len).sum(),
            memory_usage: all().map(|c| c.metadata.memory_usage).sum(),
            full_snapshots_created: self.full_snapshots_created,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
        }
    }

    /// Drop every chain and counter and reset the strategy.
    pub fn clear(&mut self) {
        self.active.clear();
        self.sealed.clear();
        self.full_snapshots_created = 0;
        self.cache_hits = 0;
        self.cache_misses = 0;
        self.strategy.reset();
    }
}
