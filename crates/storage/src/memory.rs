//! MemoryStore: capacity-bounded in-process store
//!
//! `BTreeMap<String, String>` behind a `parking_lot::RwLock`, with the used
//! byte count maintained under the same write lock as the map so capacity
//! checks and the write they guard are one step.
//!
//! A MemoryStore built with [`MemoryStore::write_blocked`] models a restricted
//! environment: reads are served, writes are refused.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use vellum_core::{Error, Result};

use crate::store::{entry_size, KeyValueStore, Usage};

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<String, String>,
    used: u64,
}

/// In-memory key-value store with a byte capacity
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    capacity: u64,
    blocked: Option<String>,
}

impl MemoryStore {
    /// Create an empty store with the given capacity in bytes
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
            blocked: None,
        }
    }

    /// Create an effectively unbounded store
    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }

    /// Create a write-blocked store, optionally pre-populated for reads
    pub fn write_blocked(reason: impl Into<String>, entries: BTreeMap<String, String>) -> Self {
        let used = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
        Self {
            inner: RwLock::new(Inner { data: entries, used }),
            capacity: u64::MAX,
            blocked: Some(reason.into()),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// True when the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Copy of every entry (for assertions and export tooling)
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.inner.read().data.clone()
    }

    fn check_writable(&self) -> Result<()> {
        match &self.blocked {
            Some(reason) => Err(Error::StorageDisabled(reason.clone())),
            None => Ok(()),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.write();
        let old = inner
            .data
            .get(key)
            .map(|v| entry_size(key, v))
            .unwrap_or(0);
        let new = entry_size(key, value);
        let base = inner.used - old;
        if base.saturating_add(new) > self.capacity {
            debug!(target: "vellum::storage", key, needed = new, "capacity exceeded");
            return Err(Error::CapacityExceeded {
                key: key.to_string(),
                needed: new,
                available: self.capacity.saturating_sub(base),
            });
        }
        inner.data.insert(key.to_string(), value.to_string());
        inner.used = base + new;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.write();
        if let Some(old) = inner.data.remove(key) {
            inner.used -= entry_size(key, &old);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().data.keys().cloned().collect())
    }

    fn is_available(&self) -> bool {
        self.blocked.is_none()
    }

    fn usage(&self) -> Usage {
        Usage {
            used_bytes: self.inner.read().used,
            capacity_bytes: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::unbounded();
        store.put("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert!(store.contains("a").unwrap());
        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
        // Deleting an absent key is fine
        store.delete("a").unwrap();
    }

    #[test]
    fn test_capacity_is_enforced_without_partial_write() {
        let store = MemoryStore::new(10);
        store.put("k", "12345").unwrap(); // 6 bytes
        let err = store.put("j", "123456").unwrap_err(); // 7 bytes > 4 left
        match err {
            Error::CapacityExceeded {
                key,
                needed,
                available,
            } => {
                assert_eq!(key, "j");
                assert_eq!(needed, 7);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(store.get("j").unwrap().is_none());
        assert_eq!(store.usage().used_bytes, 6);
    }

    #[test]
    fn test_overwrite_reuses_old_space() {
        let store = MemoryStore::new(10);
        store.put("k", "123456789").unwrap(); // exactly 10
        store.put("k", "abcdefghi").unwrap(); // replaces, still 10
        assert_eq!(store.usage().used_bytes, 10);
        store.delete("k").unwrap();
        assert_eq!(store.usage().used_bytes, 0);
    }

    #[test]
    fn test_write_blocked_store_refuses_writes_but_serves_reads() {
        let mut seed = BTreeMap::new();
        seed.insert("entity_index".to_string(), "[]".to_string());
        let store = MemoryStore::write_blocked("private browsing", seed);

        assert!(!store.is_available());
        assert_eq!(store.get("entity_index").unwrap().as_deref(), Some("[]"));
        assert!(matches!(store.put("a", "b"), Err(Error::StorageDisabled(_))));
        assert!(matches!(
            store.delete("entity_index"),
            Err(Error::StorageDisabled(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_keys_snapshot() {
        let store = MemoryStore::unbounded();
        store.put("b", "").unwrap();
        store.put("a", "").unwrap();
        let keys = store.keys().unwrap();
        store.put("c", "").unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    proptest::proptest! {
        #[test]
        fn prop_usage_matches_contents(
            ops in proptest::collection::vec(("[a-d]", proptest::option::of("[a-z]{0,8}")), 0..40)
        ) {
            let store = MemoryStore::new(40);
            for (key, value) in ops {
                match value {
                    Some(v) => { let _ = store.put(&key, &v); }
                    None => store.delete(&key).unwrap(),
                }
            }
            let expected: u64 = store.dump().iter().map(|(k, v)| entry_size(k, v)).sum();
            proptest::prop_assert_eq!(store.usage().used_bytes, expected);
            proptest::prop_assert!(expected <= 40);
        }
    }
}
