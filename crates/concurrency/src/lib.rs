//! Concurrency layer for Vellum
//!
//! This crate turns a plain key-value store into a transactional one:
//! - TransactionManager: snapshot/restore atomic batches, single writer
//! - TransactionOp / Origin: the batch format and where it came from
//! - SyncNotifier: post-commit hand-off to replication
//! - TransactionMetrics: commit/abort/rollback counters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
mod metrics;
pub mod notifier;
pub mod op;

pub use manager::{CommitReceipt, TransactionManager};
pub use metrics::TransactionMetrics;
pub use notifier::SyncNotifier;
pub use op::{Origin, TransactionOp};
