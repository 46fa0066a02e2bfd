//! The key-value substrate seam
//!
//! [`KeyValueStore`] is the only thing the engine knows about persistence: a
//! capacity-bounded, string-keyed text store. Implementations must fail
//! closed: when they cannot persist, every `put` and `delete` returns
//! `StorageDisabled` instead of pretending to succeed.

use vellum_core::Result;

/// Byte accounting of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    /// Bytes occupied by keys and values
    pub used_bytes: u64,
    /// Capacity bound of the store
    pub capacity_bytes: u64,
}

impl Usage {
    /// Bytes still available
    pub fn available(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }

    /// Used share of capacity in percent (0.0 for a zero-capacity store)
    pub fn percentage(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 * 100.0 / self.capacity_bytes as f64
    }
}

/// Size an entry occupies against the capacity bound
#[inline]
pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// Persistent, capacity-bounded, string-keyed text store
///
/// # Contract
///
/// - `put` either stores the full value or changes nothing
/// - `put` fails with `CapacityExceeded` when the write would exceed capacity
/// - in write-blocked mode `put`/`delete` fail with `StorageDisabled`;
///   reads keep working on whatever is available
/// - `delete` of an absent key succeeds
/// - `keys` is a snapshot taken at call time
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value
    fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate all keys
    fn keys(&self) -> Result<Vec<String>>;

    /// False when the store is write-blocked
    fn is_available(&self) -> bool;

    /// Current byte accounting
    fn usage(&self) -> Usage;

    /// Check whether a key is present
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
