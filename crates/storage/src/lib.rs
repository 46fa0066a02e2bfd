//! Storage layer for Vellum
//!
//! This crate implements the persistence substrate the engine writes through:
//! - `KeyValueStore`: capacity-bounded string-keyed text store trait
//! - `MemoryStore`: in-process store, optionally write-blocked
//! - `FileStore`: one checksummed file per key, write-fsync-rename
//! - `SafeSerializer`: cycle-tolerant record encoding
//! - `testing::FaultyStore`: failure injection for rollback tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod file;
pub mod memory;
pub mod store;
pub mod testing;

pub use codec::{SafeSerializer, BYTES_TAG, CIRCULAR_TAG, MAX_NESTING_DEPTH};
pub use file::{FileStore, MAX_KEY_BYTES};
pub use memory::MemoryStore;
pub use store::{entry_size, KeyValueStore, Usage};
