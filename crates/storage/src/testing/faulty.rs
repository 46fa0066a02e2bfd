//! Fault-injecting store wrapper

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use vellum_core::{Error, Result};

use crate::store::{KeyValueStore, Usage};

/// Where a fault fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultRule {
    /// The nth `put` counted from injection (1-based), once
    NthPut(usize),
    /// Every `put` to this exact key
    PutKey(String),
    /// Every `put` to a key with this prefix
    PutPrefix(String),
    /// Every write (`put` or `delete`) once `n` more writes have succeeded
    WritesAfter(usize),
    /// Every `delete` of this exact key
    DeleteKey(String),
}

/// What a fault looks like to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// `CapacityExceeded`
    Capacity,
    /// An I/O error
    Io,
}

#[derive(Debug)]
struct Armed {
    rule: FaultRule,
    kind: FaultKind,
    /// Writes seen since the fault was armed
    seen: usize,
    spent: bool,
}

/// Store wrapper that fails selected writes
pub struct FaultyStore<S> {
    inner: S,
    faults: Mutex<Vec<Armed>>,
    fired: AtomicUsize,
}

impl<S: KeyValueStore> FaultyStore<S> {
    /// Wrap a store with no faults armed
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            fired: AtomicUsize::new(0),
        }
    }

    /// Arm a fault
    pub fn inject(&self, rule: FaultRule, kind: FaultKind) {
        self.faults.lock().push(Armed {
            rule,
            kind,
            seen: 0,
            spent: false,
        });
    }

    /// Disarm every fault
    pub fn clear(&self) {
        self.faults.lock().clear();
    }

    /// Number of faults that fired so far
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, key: &str, is_put: bool) -> Result<()> {
        let mut faults = self.faults.lock();
        let mut hit = None;
        for armed in faults.iter_mut().filter(|a| !a.spent) {
            let fires = match &armed.rule {
                FaultRule::NthPut(n) if is_put => {
                    armed.seen += 1;
                    if armed.seen == *n {
                        armed.spent = true;
                        true
                    } else {
                        false
                    }
                }
                FaultRule::PutKey(k) => is_put && k == key,
                FaultRule::PutPrefix(p) => is_put && key.starts_with(p.as_str()),
                FaultRule::WritesAfter(n) => {
                    armed.seen += 1;
                    armed.seen > *n
                }
                FaultRule::DeleteKey(k) => !is_put && k == key,
                FaultRule::NthPut(_) => false,
            };
            if fires && hit.is_none() {
                hit = Some(armed.kind);
            }
        }
        match hit {
            None => Ok(()),
            Some(kind) => {
                self.fired.fetch_add(1, Ordering::SeqCst);
                debug!(target: "vellum::storage", key, ?kind, "injected fault");
                Err(match kind {
                    FaultKind::Capacity => Error::CapacityExceeded {
                        key: key.to_string(),
                        needed: 0,
                        available: 0,
                    },
                    FaultKind::Io => Error::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("injected fault on '{}'", key),
                    )),
                })
            }
        }
    }
}

impl<S: KeyValueStore> KeyValueStore for FaultyStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.check(key, true)?;
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check(key, false)?;
        self.inner.delete(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn usage(&self) -> Usage {
        self.inner.usage()
    }
}
