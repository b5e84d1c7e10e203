use std::collections::BTreeMap;
use std::sync::Arc;

use atomline_common::{AtomKind, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atom::{AtomRecord, AtomRef, AtomRegistry, Store, StoreError};

/// An event record produced by every mutation to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    Registered { atom: AtomRef, value: Value },
    Written { atom: AtomRef, old: Value, new: Value },
    Removed { atom: AtomRef },
}

#[derive(Debug, Clone)]
struct AtomSlot {
    id: String,
    kind: AtomKind,
    value: Value,
    touched_at: u64,
}

/// In-memory atom store.
///
/// Atoms are keyed by name in a BTreeMap for deterministic enumeration.
/// Computed atoms are read-only: writes to them are rejected.
pub struct MemoryStore {
    atoms: BTreeMap<String, AtomSlot>,
    next_id: u64,
    clock: Arc<dyn Clock>,
    event_log: Vec<StoreEvent>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("atoms", &self.atoms)
            .field("next_id", &self.next_id)
            .field("events", &self.event_log.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            atoms: BTreeMap::new(),
            next_id: 1,
            clock,
            event_log: Vec::new(),
        }
    }

    /// Register a new atom, or overwrite the value and kind of an existing one.
    pub fn register(&mut self, name: &str, kind: AtomKind, value: Value) -> AtomRef {
        let now = self.clock.now_ms();
        let id = match self.atoms.get(name) {
            Some(slot) => slot.id.clone(),
            None => {
                let id = format!("atom-{}", self.next_id);
                self.next_id += 1;
                id
            }
        };
        self.atoms.insert(
            name.to_string(),
            AtomSlot {
                id: id.clone(),
                kind,
                value: value.clone(),
                touched_at: now,
            },
        );
        let atom = AtomRef {
            id,
            name: name.to_string(),
        };
        tracing::trace!(atom = %atom.name, "registered atom");
        self.event_log.push(StoreEvent::Registered {
            atom: atom.clone(),
            value,
        });
        atom
    }

    /// Register a plain writable atom.
    pub fn atom(&mut self, name: &str, value: Value) -> AtomRef {
        self.register(name, AtomKind::Writable, value)
    }

    /// Write by name, for callers that don't hold a reference.
    pub fn set_by_name(&mut self, name: &str, value: Value) -> Result<(), StoreError> {
        let atom = self
            .resolve(name)
            .ok_or_else(|| StoreError::AtomNotFound(name.to_string()))?;
        self.set(&atom, value)
    }

    /// Current value of an atom by name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.atoms.get(name).map(|slot| &slot.value)
    }

    /// Remove an atom. Returns its last value if it existed.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let slot = self.atoms.remove(name)?;
        self.event_log.push(StoreEvent::Removed {
            atom: AtomRef {
                id: slot.id,
                name: name.to_string(),
            },
        });
        Some(slot.value)
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[StoreEvent] {
        &self.event_log
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.event_log)
    }
}

impl Store for MemoryStore {
    fn get(&self, atom: &AtomRef) -> Result<Value, StoreError> {
        self.atoms
            .get(&atom.name)
            .map(|slot| slot.value.clone())
            .ok_or_else(|| StoreError::AtomNotFound(atom.name.clone()))
    }

    fn set(&mut self, atom: &AtomRef, value: Value) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let slot = self
            .atoms
            .get_mut(&atom.name)
            .ok_or_else(|| StoreError::AtomNotFound(atom.name.clone()))?;
        if slot.kind == AtomKind::Computed {
            return Err(StoreError::ReadOnly(atom.name.clone()));
        }
        let old = std::mem::replace(&mut slot.value, value.clone());
        slot.touched_at = now;
        self.event_log.push(StoreEvent::Written {
            atom: atom.clone(),
            old,
            new: value,
        });
        Ok(())
    }
}

impl AtomRegistry for MemoryStore {
    fn resolve(&self, name: &str) -> Option<AtomRef> {
        if let Some(slot) = self.atoms.get(name) {
            return Some(AtomRef {
                id: slot.id.clone(),
                name: name.to_string(),
            });
        }
        self.atoms
            .iter()
            .find(|(_, slot)| slot.id == name)
            .map(|(n, slot)| AtomRef {
                id: slot.id.clone(),
                name: n.clone(),
            })
    }

    fn atoms(&self) -> Vec<AtomRecord> {
        self.atoms
            .iter()
            .map(|(name, slot)| AtomRecord {
                atom: AtomRef {
                    id: slot.id.clone(),
                    name: name.clone(),
                },
                kind: slot.kind,
                last_touched_ms: slot.touched_at,
            })
            .collect()
    }

    fn cleanup_stale(&mut self, max_age_ms: u64, now_ms: u64) -> usize {
        let stale: Vec<String> = self
            .atoms
            .iter()
            .filter(|(_, slot)| now_ms.saturating_sub(slot.touched_at) > max_age_ms)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            self.remove(name);
        }
        if !stale.is_empty() {
            tracing::debug!(removed = stale.len(), "cleaned up stale atoms");
        }
        stale.len()
    }
}
