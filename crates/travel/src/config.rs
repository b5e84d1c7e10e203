use std::path::Path;

use atomline_delta::{
    ChainStrategyConfig, DeltaChainConfig, EqualityMode, HistoryStrategyConfig,
    ReconstructorConfig,
};
use atomline_restore::{CheckpointConfig, RestorePolicy};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How captures are turned into delta snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// When off, every capture is a full snapshot.
    pub enabled: bool,
    /// Every Nth capture is full regardless of chain state; 0 disables.
    pub full_snapshot_interval: usize,
    pub max_delta_chain_length: usize,
    pub max_delta_chain_age_ms: u64,
    pub max_delta_chain_size: usize,
    pub equality: EqualityMode,
    /// Skip captures that change nothing.
    pub skip_empty: bool,
    pub chain_compression: ChainStrategyConfig,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        let chain = DeltaChainConfig::default();
        Self {
            enabled: true,
            full_snapshot_interval: 10,
            max_delta_chain_length: chain.max_delta_chain_length,
            max_delta_chain_age_ms: chain.max_delta_chain_age_ms,
            max_delta_chain_size: chain.max_delta_chain_size,
            equality: EqualityMode::Deep,
            skip_empty: true,
            chain_compression: ChainStrategyConfig::default(),
        }
    }
}

impl DeltaConfig {
    pub fn chain_config(&self) -> DeltaChainConfig {
        DeltaChainConfig {
            max_delta_chain_length: self.max_delta_chain_length,
            max_delta_chain_age_ms: self.max_delta_chain_age_ms,
            max_delta_chain_size: self.max_delta_chain_size,
        }
    }
}

/// Top-level configuration. Every field has a default, so a partial YAML
/// document is valid.
///
/// ```yaml
/// max_history: 100
/// delta:
///   full_snapshot_interval: 5
///   chain_compression:
///     kind: significance
/// restore:
///   on_atom_not_found: throw
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeTravelConfig {
    pub max_history: usize,
    pub delta: DeltaConfig,
    pub history_compression: HistoryStrategyConfig,
    pub reconstruction: ReconstructorConfig,
    pub checkpoints: CheckpointConfig,
    /// Policy used by undo, redo and jump.
    pub restore: RestorePolicy,
}

impl Default for TimeTravelConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            delta: DeltaConfig::default(),
            history_compression: HistoryStrategyConfig::default(),
            reconstruction: ReconstructorConfig::default(),
            checkpoints: CheckpointConfig::default(),
            restore: RestorePolicy::default(),
        }
    }
}

impl TimeTravelConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&source)?;
        tracing::info!(path = %path.display(), "loaded time travel config");
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
