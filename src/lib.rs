//! Vellum - transactional tiered record storage
//!
//! Vellum keeps entity records in a capacity-bounded key-value store: a
//! compact index per entity kind for listings, one detail blob per entity for
//! the full payload, a recycle bin for soft deletes and an integrity scanner
//! that repairs whatever an interrupted write or an outside edit left behind.
//!
//! # Quick Start
//!
//! ```ignore
//! use vellum::{DetailRecord, Engine, EntityId, Origin};
//!
//! let engine = Engine::open_dir("/data/app")?;
//! let entities = engine.default_entities()?;
//!
//! let detail = DetailRecord::new(EntityId::new(), engine.now()).with("name", "Ada");
//! entities.create_projected(detail, Origin::Local)?;
//!
//! let report = engine.scanner().scan()?;
//! assert!(report.is_clean());
//! ```
//!
//! # Architecture
//!
//! | Crate                | Role                                              |
//! |----------------------|---------------------------------------------------|
//! | `vellum-core`        | values, records, ids, key catalog, errors         |
//! | `vellum-storage`     | `KeyValueStore` seam, memory and file stores      |
//! | `vellum-concurrency` | atomic batches, rollback, post-commit notifier    |
//! | `vellum-engine`      | tiered store, migration, recycle bin, scanner     |

pub use vellum_concurrency::{CommitReceipt, Origin, SyncNotifier, TransactionMetrics, TransactionOp};
pub use vellum_core::{
    Clock, DetailRecord, Draft, EntityId, Error, IndexRow, KeyCatalog, KeyClass, KindName,
    ManualClock, RecycleEntry, RecycleReason, Result, RowPatch, RowStatus, SystemClock, Timestamp,
    Value,
};
pub use vellum_engine::*;
pub use vellum_storage::{FileStore, KeyValueStore, MemoryStore, SafeSerializer, Usage};
