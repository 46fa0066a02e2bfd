//! Post-commit notification boundary
//!
//! A [`SyncNotifier`] hands committed local writes to the replication layer.
//! It runs synchronously on the committing thread with the writer lock held,
//! so it must not write back through the engine: such a call is rejected with
//! `ReentrantWrite`.

use vellum_core::Value;

/// Receiver of committed local writes
pub trait SyncNotifier: Send + Sync {
    /// Called once per operation, in batch order, after the batch committed
    ///
    /// `value` is the final value for puts and `None` for deletes.
    fn notify(&self, key: &str, value: Option<&Value>, origin_was_local: bool);
}

impl<F> SyncNotifier for F
where
    F: Fn(&str, Option<&Value>, bool) + Send + Sync,
{
    fn notify(&self, key: &str, value: Option<&Value>, origin_was_local: bool) {
        self(key, value, origin_was_local)
    }
}
