//! Transaction manager for atomic multi-key writes
//!
//! Executes an ordered batch of put/delete operations as a unit against a
//! [`KeyValueStore`] that has no transactions of its own. Atomicity comes from
//! snapshot and restore: every key the batch touches is read before the first
//! write, and a failure part-way restores the keys already written.
//!
//! ## Execute Sequence
//!
//! ```text
//! 1. called from inside a notifier on this thread -> ReentrantWrite
//! 2. poisoned by an earlier failed restore?      -> Unrecoverable
//! 3. store write-blocked?                         -> StorageDisabled
//! 4. duplicate keys in the batch?                 -> InvalidOperation
//! 5. encode every put value (nothing touched on failure)
//! 6. snapshot every touched key
//! 7. apply ops in order
//! 8. on failure: restore touched keys, return the original error;
//!    if the restore fails: poison, return Unrecoverable
//! 9. on success, for Local origin: notify each op in order
//! ```
//!
//! Writers are serialized by a single reentrant mutex. The flag inside it is
//! set while notifiers run, so a notifier that writes back on the same thread
//! is rejected instead of deadlocking or nesting a commit. Reads take the same
//! mutex, so no reader observes a half-applied batch. Callers that read, decide
//! and then write hold it across the whole sequence with
//! [`TransactionManager::with_writer`].

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, error, warn};

use vellum_core::{Error, Result, Value};
use vellum_storage::{KeyValueStore, SafeSerializer};

use crate::metrics::{Counters, TransactionMetrics};
use crate::notifier::SyncNotifier;
use crate::op::{Origin, TransactionOp};

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Operations applied
    pub applied: usize,
    /// Encoded bytes written by puts
    pub bytes_written: u64,
    /// Notifications delivered
    pub notified: usize,
}

/// Clears the in-notify flag even if a notifier panics
struct NotifyScope<'a>(&'a Cell<bool>);

impl<'a> NotifyScope<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        NotifyScope(flag)
    }
}

impl Drop for NotifyScope<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Executes batches atomically against a store
pub struct TransactionManager {
    store: Arc<dyn KeyValueStore>,
    /// Writer lock; the cell is true while notifiers run
    writer: ReentrantMutex<Cell<bool>>,
    notifier: RwLock<Option<Arc<dyn SyncNotifier>>>,
    poisoned: AtomicBool,
    counters: Counters,
}

impl TransactionManager {
    /// Create a manager over `store`
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            writer: ReentrantMutex::new(Cell::new(false)),
            notifier: RwLock::new(None),
            poisoned: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Attach (or detach with `None`) the post-commit notifier
    pub fn set_notifier(&self, notifier: Option<Arc<dyn SyncNotifier>>) {
        *self.notifier.write() = notifier;
    }

    /// True after a failed restore; writes are refused until [`clear_poison`](Self::clear_poison)
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Accept writes again after the caller reloaded its state from the store
    pub fn clear_poison(&self) {
        if self.poisoned.swap(false, Ordering::SeqCst) {
            warn!(target: "vellum::txn", "poison cleared after reload");
        }
    }

    /// Current counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.counters.snapshot(self.is_poisoned())
    }

    /// Run `f` while holding the writer lock
    ///
    /// The lock is reentrant: `read` and `execute` called from `f` on this
    /// thread proceed, while other threads wait until `f` returns. Writes from
    /// a notifier are still rejected with `ReentrantWrite`.
    pub fn with_writer<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.writer.lock();
        f()
    }

    /// Read and decode one record
    pub fn read(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.writer.lock();
        match self.store.get(key)? {
            Some(text) => Ok(Some(SafeSerializer::decode(&text)?)),
            None => Ok(None),
        }
    }

    /// Execute a batch as a unit
    ///
    /// # Errors
    /// - `Unrecoverable` if poisoned, or if this call's restore failed
    /// - `ReentrantWrite` when called from a notifier on the same thread
    /// - `StorageDisabled` for a write-blocked store
    /// - `InvalidOperation` for duplicate keys
    /// - `Serialization` for an unencodable put value
    /// - the store's error (`CapacityExceeded`, `Io`, ...) after a successful restore
    pub fn execute(&self, ops: Vec<TransactionOp>, origin: Origin) -> Result<CommitReceipt> {
        let guard = self.writer.lock();
        if guard.get() {
            let key = ops.first().map(TransactionOp::key).unwrap_or_default();
            return Err(Error::ReentrantWrite(key.to_string()));
        }
        // Checked under the lock: a rollback on another thread may have failed
        // while this call was waiting
        if self.is_poisoned() {
            return Err(Error::Unrecoverable(
                "an earlier rollback failed; reload before writing".to_string(),
            ));
        }

        if !self.store.is_available() {
            self.counters.aborted();
            return Err(Error::StorageDisabled(
                "the store cannot persist writes".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(ops.len());
        for op in &ops {
            if !seen.insert(op.key()) {
                self.counters.aborted();
                return Err(Error::invalid(format!(
                    "key '{}' appears more than once in one transaction",
                    op.key()
                )));
            }
        }

        let encoded = match encode_all(&ops) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.counters.aborted();
                return Err(e);
            }
        };

        let mut snapshot = Vec::with_capacity(ops.len());
        for op in &ops {
            match self.store.get(op.key()) {
                Ok(before) => snapshot.push(before),
                Err(e) => {
                    self.counters.aborted();
                    return Err(e);
                }
            }
        }

        let mut bytes_written = 0u64;
        for (i, (op, text)) in ops.iter().zip(&encoded).enumerate() {
            let applied = match text {
                Some(text) => self.store.put(op.key(), text).map(|_| text.len() as u64),
                None => self.store.delete(op.key()).map(|_| 0),
            };
            match applied {
                Ok(n) => bytes_written += n,
                Err(cause) => return Err(self.roll_back(&ops[..i], &snapshot[..i], cause)),
            }
        }

        self.counters.committed();
        debug!(target: "vellum::txn", ops = ops.len(), bytes_written, ?origin, "committed");

        let mut notified = 0;
        if origin.is_local() {
            let notifier = self.notifier.read().clone();
            if let Some(notifier) = notifier {
                let _scope = NotifyScope::enter(&guard);
                for op in &ops {
                    notifier.notify(op.key(), op.final_value(), true);
                    notified += 1;
                }
            }
        }

        Ok(CommitReceipt {
            applied: ops.len(),
            bytes_written,
            notified,
        })
    }

    /// Restore the keys written so far, newest first
    ///
    /// The failing op itself is not restored: a failed `put`/`delete` leaves
    /// its key unchanged. Every key is attempted even after a restore fails.
    fn roll_back(&self, applied: &[TransactionOp], snapshot: &[Option<String>], cause: Error) -> Error {
        warn!(target: "vellum::txn", error = %cause, restoring = applied.len(), "apply failed, rolling back");
        let mut unrestored = Vec::new();
        for (op, before) in applied.iter().zip(snapshot).rev() {
            let restored = match before {
                Some(text) => self.store.put(op.key(), text),
                None => self.store.delete(op.key()),
            };
            if let Err(e) = restored {
                error!(target: "vellum::txn", key = op.key(), cause = %cause, error = %e, "restore failed");
                unrestored.push(format!("'{}' ({})", op.key(), e));
            }
        }
        if unrestored.is_empty() {
            self.counters.rolled_back();
            return cause;
        }

        self.poisoned.store(true, Ordering::SeqCst);
        self.counters.failed_rollback();
        error!(target: "vellum::txn", unrestored = unrestored.len(), "rollback incomplete, store state unknown");
        Error::Unrecoverable(format!(
            "restoring {} failed while rolling back ({})",
            unrestored.join(", "),
            cause
        ))
    }
}

fn encode_all(ops: &[TransactionOp]) -> Result<Vec<Option<String>>> {
    ops.iter()
        .map(|op| match op {
            TransactionOp::Put { value, .. } => SafeSerializer::encode(value).map(Some),
            TransactionOp::Delete { .. } => Ok(None),
        })
        .collect()
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("poisoned", &self.is_poisoned())
            .field("metrics", &self.counters)
            .finish()
    }
}
