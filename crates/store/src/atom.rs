use atomline_common::AtomKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Live reference to an atom, as resolved by an [`AtomRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomRef {
    pub id: String,
    pub name: String,
}

/// Registry view of one atom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomRecord {
    pub atom: AtomRef,
    pub kind: AtomKind,
    /// Last time the atom was registered or written, in ms.
    pub last_touched_ms: u64,
}

/// Errors from store reads and writes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("atom not found: {0}")]
    AtomNotFound(String),
    #[error("atom {0} is read-only")]
    ReadOnly(String),
    #[error("write to {atom} rejected: {reason}")]
    WriteRejected { atom: String, reason: String },
}

/// Value access for live atoms.
pub trait Store {
    fn get(&self, atom: &AtomRef) -> Result<Value, StoreError>;
    fn set(&mut self, atom: &AtomRef, value: Value) -> Result<(), StoreError>;
}

/// Name resolution and enumeration of live atoms.
pub trait AtomRegistry {
    /// Resolve an atom by name (or id).
    fn resolve(&self, name: &str) -> Option<AtomRef>;

    /// All live atoms, in a stable order.
    fn atoms(&self) -> Vec<AtomRecord>;

    /// Drop atoms not touched within `max_age_ms` of `now_ms`.
    /// Returns how many were removed. Liveness policy is the registry's own.
    fn cleanup_stale(&mut self, max_age_ms: u64, now_ms: u64) -> usize;
}

/// Anything that is both a [`Store`] and an [`AtomRegistry`].
pub trait AtomStore: Store + AtomRegistry {}

impl<T: Store + AtomRegistry> AtomStore for T {}
