//! Store contracts: how the time-travel engine reads and writes live atoms.
//!
//! The engine never owns atom values. It talks to a [`Store`] for reads and
//! writes and to an [`AtomRegistry`] for name resolution and enumeration.
//! [`MemoryStore`] is an in-memory implementation of both, used by tests and
//! the CLI.
//!
//! # Invariants
//! - A store gives no transactional guarantees; callers that need
//!   all-or-nothing semantics supply them.
//! - Every write through [`MemoryStore`] produces an event record.

pub mod atom;
pub mod memory;

pub use atom::{AtomRecord, AtomRef, AtomRegistry, AtomStore, Store, StoreError};
pub use memory::{MemoryStore, StoreEvent};
