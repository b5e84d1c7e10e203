//! Listener registration with explicit disposal.

use std::collections::BTreeMap;

use atomline_common::{CheckpointId, SnapshotId};
use thiserror::Error;

/// Notifications emitted by [`TimeTravel`](crate::TimeTravel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TravelEvent {
    Captured {
        snapshot: SnapshotId,
        index: usize,
        is_delta: bool,
    },
    Traveled {
        from: Option<usize>,
        to: usize,
        snapshot: SnapshotId,
    },
    RolledBack {
        checkpoint: CheckpointId,
    },
    Cleared,
}

/// A subscriber. `dispose` runs exactly once, when the listener is removed
/// or its arena is disposed.
pub trait TravelListener {
    fn name(&self) -> &str {
        "listener"
    }

    fn on_event(&mut self, event: &TravelEvent);

    fn dispose(&mut self) -> Result<(), DisposeError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to dispose {resource}: {message}")]
pub struct DisposeError {
    pub resource: String,
    pub message: String,
}

/// Every failure from one disposal pass. Disposal never stops at the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} resource(s) failed to dispose", .errors.len())]
pub struct DisposalErrors {
    pub errors: Vec<DisposeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

/// Owns listeners by handle. Must be emptied with [`dispose_all`](Self::dispose_all)
/// or by removing every handle; dropping it with live listeners is logged.
#[derive(Default)]
pub struct ListenerArena {
    next: u64,
    listeners: BTreeMap<ListenerHandle, Box<dyn TravelListener>>,
}

impl std::fmt::Debug for ListenerArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerArena")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ListenerArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, listener: Box<dyn TravelListener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next);
        self.next += 1;
        tracing::debug!(listener = listener.name(), ?handle, "listener added");
        self.listeners.insert(handle, listener);
        handle
    }

    /// Remove and dispose one listener. `Ok(false)` if the handle is unknown.
    pub fn remove(&mut self, handle: ListenerHandle) -> Result<bool, DisposeError> {
        match self.listeners.remove(&handle) {
            Some(mut listener) => listener.dispose().map(|()| true),
            None => Ok(false),
        }
    }

    pub fn emit(&mut self, event: &TravelEvent) {
        for listener in self.listeners.values_mut() {
            listener.on_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Dispose every listener, collecting all failures.
    pub fn dispose_all(&mut self) -> Result<(), DisposalErrors> {
        let errors: Vec<DisposeError> = std::mem::take(&mut self.listeners)
            .into_values()
            .filter_map(|mut listener| listener.dispose().err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            tracing::warn!(failed = errors.len(), "listener disposal failed");
            Err(DisposalErrors { errors })
        }
    }
}

impl Drop for ListenerArena {
    fn drop(&mut self) {
        if !self.listeners.is_empty() {
            tracing::warn!(
                live = self.listeners.len(),
                "listener arena dropped without dispose"
            );
        }
    }
}
