//! Engine struct and open logic
//!
//! The [`Engine`] is one explicit instance owning the transaction manager, the
//! key catalog and the registered entity kinds. Callers get short-lived
//! handles from it:
//!
//! - [`Engine::entities`]: index and detail access for one kind
//! - [`Engine::recycle_bin`]: soft delete, restore, purge
//! - [`Engine::scanner`]: integrity scan
//! - [`Engine::drafts`]: autosave drafts
//!
//! ## Opening
//!
//! ```text
//! validate config -> register kinds and singletons -> migrate (opt.) -> scan (opt.)
//! ```
//!
//! A migration that fails on open is logged and left for a later retry; only
//! a fatal error (failed rollback) aborts the open.

pub mod builder;
pub mod config;

pub use builder::EngineBuilder;
pub use config::{EngineConfig, CONFIG_FILE_NAME, DEFAULT_CAPACITY_BYTES};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use vellum_concurrency::{
    CommitReceipt, Origin, SyncNotifier, TransactionManager, TransactionMetrics, TransactionOp,
};
use vellum_core::{
    Clock, Error, KeyCatalog, KeyClass, KindName, Result, SystemClock, Timestamp, Value,
};
use vellum_storage::{FileStore, KeyValueStore};

use crate::bundle::{self, ExportBundle, ImportReport};
use crate::drafts::Drafts;
use crate::kind::EntityKind;
use crate::migration::{MigrationEngine, MigrationOutcome};
use crate::recycle::RecycleBin;
use crate::scanner::{IntegrityScanner, ScanReport};
use crate::tiered::TieredEntityStore;
use crate::usage::UsageReport;

/// Singleton holding application settings; always registered
pub const SETTINGS_KEY: &str = "settings";

/// Directory under an engine path holding the file store
pub const DATA_DIR_NAME: &str = "data";

// ============================================================================
// Engine
// ============================================================================

/// Transactional tiered record engine
pub struct Engine {
    pub(crate) txn: TransactionManager,
    pub(crate) catalog: KeyCatalog,
    pub(crate) kinds: BTreeMap<KindName, EntityKind>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
}

impl Engine {
    /// Open an engine over `store` with the default entity kind
    pub fn open(store: Arc<dyn KeyValueStore>, config: EngineConfig) -> Result<Self> {
        Self::assemble(
            store,
            config,
            Vec::new(),
            Vec::new(),
            Arc::new(SystemClock),
            None,
        )
    }

    /// Open an engine persisted under `path`
    ///
    /// Creates `path/vellum.toml` with defaults on first open and stores
    /// records in `path/data`. An unwritable directory opens write-blocked.
    pub fn open_dir(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path.as_ref()).open()
    }

    /// Builder for kinds, singletons, clock and notifier
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn assemble(
        store: Arc<dyn KeyValueStore>,
        config: EngineConfig,
        kinds: Vec<EntityKind>,
        singletons: Vec<String>,
        clock: Arc<dyn Clock>,
        notifier: Option<Arc<dyn SyncNotifier>>,
    ) -> Result<Self> {
        config.validate()?;

        let kinds = if kinds.is_empty() {
            vec![EntityKind::new(KindName::default_kind())]
        } else {
            kinds
        };
        let mut catalog = KeyCatalog::new();
        let mut registered = BTreeMap::new();
        for kind in kinds {
            catalog.register_kind(kind.name().clone(), kind.legacy_key().map(str::to_string))?;
            registered.insert(kind.name().clone(), kind);
        }
        catalog.register_singleton(SETTINGS_KEY)?;
        for name in singletons {
            catalog.register_singleton(name)?;
        }

        let txn = TransactionManager::new(store);
        txn.set_notifier(notifier);
        let engine = Self {
            txn,
            catalog,
            kinds: registered,
            clock,
            config,
        };

        let available = engine.txn.store().is_available();
        if !available {
            warn!(target: "vellum::engine", "store is write-blocked, engine opened read-only");
        }
        if engine.config.migrate_on_open && available {
            for kind in engine.kinds.values() {
                match engine.migration().migrate_if_needed(kind) {
                    Ok(MigrationOutcome::NotNeeded | MigrationOutcome::AlreadyMigrated) => {}
                    Ok(outcome) => {
                        info!(target: "vellum::engine", kind = %kind.name(), ?outcome, "migration on open")
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(target: "vellum::engine", kind = %kind.name(), error = %e, "migration on open failed, will retry on next load")
                    }
                }
            }
        }
        if engine.config.scan_on_open {
            engine.scanner().scan()?;
        }
        info!(target: "vellum::engine", kinds = engine.kinds.len(), "engine opened");
        Ok(engine)
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    /// Index and detail access for a registered kind
    ///
    /// # Errors
    /// `InvalidOperation` for an unregistered kind.
    pub fn entities(&self, kind: &KindName) -> Result<TieredEntityStore<'_>> {
        let kind = self
            .kinds
            .get(kind)
            .ok_or_else(|| Error::invalid(format!("kind '{}' is not registered", kind)))?;
        Ok(TieredEntityStore::new(self, kind))
    }

    /// [`Engine::entities`] for the default `entity` kind
    pub fn default_entities(&self) -> Result<TieredEntityStore<'_>> {
        self.entities(&KindName::default_kind())
    }

    /// Registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = &EntityKind> {
        self.kinds.values()
    }

    /// The recycle bin
    pub fn recycle_bin(&self) -> RecycleBin<'_> {
        RecycleBin::new(self)
    }

    /// The integrity scanner
    pub fn scanner(&self) -> IntegrityScanner<'_> {
        IntegrityScanner::new(self)
    }

    /// Legacy blob migration
    pub fn migration(&self) -> MigrationEngine<'_> {
        MigrationEngine::new(&self.txn)
    }

    /// Migrate every registered kind, stopping at the first error
    pub fn migrate_all(&self) -> Result<Vec<(KindName, MigrationOutcome)>> {
        self.kinds
            .values()
            .map(|kind| Ok((kind.name().clone(), self.migration().migrate_if_needed(kind)?)))
            .collect()
    }

    /// Autosave drafts
    pub fn drafts(&self) -> Drafts<'_> {
        Drafts::new(self)
    }

    // ------------------------------------------------------------------------
    // Singletons and replication
    // ------------------------------------------------------------------------

    fn ensure_singleton(&self, name: &str) -> Result<()> {
        match self.catalog.classify(name) {
            KeyClass::Singleton(_) => Ok(()),
            _ => Err(Error::invalid(format!("'{}' is not a registered singleton", name))),
        }
    }

    /// Read a registered singleton
    pub fn get_singleton(&self, name: &str) -> Result<Option<Value>> {
        self.ensure_singleton(name)?;
        self.txn.read(name)
    }

    /// Replace a registered singleton
    pub fn put_singleton(&self, name: &str, value: Value, origin: Origin) -> Result<CommitReceipt> {
        self.ensure_singleton(name)?;
        self.txn
            .execute(vec![TransactionOp::put(name, value)], origin)
    }

    /// Apply a write received from replication
    ///
    /// Committed with `Origin::Remote`, so the notifier is not called and the
    /// write is never echoed back. `None` deletes the key.
    ///
    /// # Errors
    /// `InvalidOperation` for a key outside every known namespace.
    pub fn apply_remote(&self, key: &str, value: Option<Value>) -> Result<CommitReceipt> {
        if let KeyClass::Unknown = self.catalog.classify(key) {
            return Err(Error::invalid(format!("remote write to unknown key '{}'", key)));
        }
        let op = match value {
            Some(value) => TransactionOp::put(key, value),
            None => TransactionOp::delete(key),
        };
        self.txn.execute(vec![op], Origin::Remote)
    }

    /// Install the post-commit notifier
    pub fn set_notifier(&self, notifier: Arc<dyn SyncNotifier>) {
        self.txn.set_notifier(Some(notifier));
    }

    /// Remove the post-commit notifier
    pub fn clear_notifier(&self) {
        self.txn.set_notifier(None);
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Snapshot every kind, catalog and the settings
    pub fn export(&self) -> Result<ExportBundle> {
        bundle::export(self)
    }

    /// Import a bundle; see [`crate::bundle`] for the staging
    pub fn import(&self, bundle: &ExportBundle, origin: Origin) -> Result<ImportReport> {
        bundle::import(self, bundle, origin)
    }

    /// Usage against the capacity bound
    pub fn usage_report(&self) -> Result<UsageReport> {
        Ok(UsageReport::from_usage(
            self.txn.store().usage(),
            self.config.warning_percent,
            self.config.critical_percent,
        ))
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.txn.metrics()
    }

    /// True after a failed rollback; writes are refused until [`Engine::reload`]
    pub fn is_poisoned(&self) -> bool {
        self.txn.is_poisoned()
    }

    /// Accept writes again after a failed rollback and repair what it left
    pub fn reload(&self) -> Result<ScanReport> {
        self.txn.clear_poison();
        warn!(target: "vellum::engine", "reloading after failed rollback");
        self.scanner().scan()
    }

    /// The key catalog
    pub fn catalog(&self) -> &KeyCatalog {
        &self.catalog
    }

    /// The configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        self.txn.store()
    }

    /// Current time from the engine clock
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

pub(crate) fn open_file_store(path: &Path, config: &EngineConfig) -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(FileStore::open(
        path.join(DATA_DIR_NAME),
        config.capacity_bytes,
    )?))
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("txn", &self.txn)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_storage::MemoryStore;

    fn engine() -> Engine {
        Engine::open(Arc::new(MemoryStore::unbounded()), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_open_registers_default_kind_and_settings() {
        let engine = engine();
        assert!(engine.default_entities().is_ok());
        assert_eq!(
            engine.catalog().classify(SETTINGS_KEY),
            KeyClass::Singleton(SETTINGS_KEY.to_string())
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let engine = engine();
        let err = engine.entities(&KindName::parse("invoice").unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            warning_percent: 95,
            ..EngineConfig::default()
        };
        let err = Engine::open(Arc::new(MemoryStore::unbounded()), config).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_singletons() {
        let engine = engine();
        assert_eq!(engine.get_singleton(SETTINGS_KEY).unwrap(), None);
        engine
            .put_singleton(SETTINGS_KEY, Value::object().with("theme", "dark"), Origin::Local)
            .unwrap();
        assert_eq!(
            engine.get_singleton(SETTINGS_KEY).unwrap().unwrap().get_str("theme"),
            Some("dark")
        );
        assert!(engine.get_singleton("templates").is_err());
    }

    #[test]
    fn test_apply_remote_rejects_unknown_keys() {
        let engine = engine();
        assert!(engine.apply_remote("whatever", Some(Value::from(1))).is_err());
        engine.apply_remote("settings", Some(Value::from(1))).unwrap();
        engine.apply_remote("settings", None).unwrap();
        assert_eq!(engine.get_singleton("settings").unwrap(), None);
    }
}
