//! Testing utilities for rollback and failure handling
//!
//! [`FaultyStore`] wraps any [`KeyValueStore`](crate::KeyValueStore) and
//! fails selected writes, so tests can prove that a transaction which dies
//! half-way leaves no partial trace, and that a rollback which itself fails is
//! reported as unrecoverable.
//!
//! # Example
//!
//! ```ignore
//! use vellum_storage::testing::{FaultKind, FaultRule, FaultyStore};
//! use vellum_storage::MemoryStore;
//!
//! let store = FaultyStore::new(MemoryStore::unbounded());
//! store.inject(FaultRule::NthPut(2), FaultKind::Capacity);
//! ```

mod faulty;

pub use faulty::{FaultKind, FaultRule, FaultyStore};
