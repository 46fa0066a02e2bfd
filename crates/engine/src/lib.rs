//! Engine for Vellum
//!
//! This crate ties the lower layers into one explicit engine instance:
//! - Engine: open, kinds, singletons, replication hand-off
//! - TieredEntityStore: index rows plus per-entity detail blobs
//! - MigrationEngine: legacy monolithic blob to tiered layout
//! - RecycleBin: soft delete, restore, purge
//! - IntegrityScanner: repairs index/detail/trash divergence, expires drafts
//! - Export/import bundles and the usage report
//!
//! Every write goes through the concurrency crate's TransactionManager.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundle;
pub mod database;
pub mod drafts;
pub mod kind;
pub mod migration;
pub mod recycle;
pub mod scanner;
pub mod tiered;
pub mod usage;

pub use bundle::{ExportBundle, ImportReport, BUNDLE_VERSION};
pub use database::{
    Engine, EngineBuilder, EngineConfig, CONFIG_FILE_NAME, DATA_DIR_NAME, DEFAULT_CAPACITY_BYTES,
    SETTINGS_KEY,
};
pub use drafts::Drafts;
pub use kind::{EntityKind, FieldProjection, Projection};
pub use migration::{MigrationEngine, MigrationOutcome};
pub use recycle::RecycleBin;
pub use scanner::{IntegrityScanner, ScanReport};
pub use tiered::TieredEntityStore;
pub use usage::{UsageLevel, UsageReport};
