//! Engine builder for fluent configuration

use std::path::PathBuf;
use std::sync::Arc;

use vellum_concurrency::SyncNotifier;
use vellum_core::{Clock, Result, SystemClock};
use vellum_storage::{KeyValueStore, MemoryStore};

use super::config::{EngineConfig, CONFIG_FILE_NAME};
use super::{open_file_store, Engine};
use crate::kind::EntityKind;

// ============================================================================
// Engine Builder
// ============================================================================

/// Builder for an [`Engine`]
///
/// ```ignore
/// use vellum_engine::{Engine, EntityKind, FieldProjection};
///
/// // Persisted under a directory, config read from `vellum.toml`
/// let engine = Engine::builder().path("/data/app").open()?;
///
/// // In memory, with a custom kind migrated from a legacy blob
/// let engine = Engine::builder()
///     .kind(
///         EntityKind::new(KindName::parse("customer")?)
///             .with_legacy_key("customers")
///             .with_projection(FieldProjection::default().count("history")),
///     )
///     .singleton("templates")
///     .open()?;
/// ```
///
/// Without `store` or `path`, the engine runs over a [`MemoryStore`] bounded
/// by the configured capacity. An explicit `config` wins over `vellum.toml`.
pub struct EngineBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    path: Option<PathBuf>,
    config: Option<EngineConfig>,
    kinds: Vec<EntityKind>,
    singletons: Vec<String>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn SyncNotifier>>,
}

impl EngineBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self {
            store: None,
            path: None,
            config: None,
            kinds: Vec::new(),
            singletons: Vec::new(),
            clock: Arc::new(SystemClock),
            notifier: None,
        }
    }

    /// Use an existing store
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist under a directory
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use this configuration instead of the defaults or `vellum.toml`
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register an entity kind; without any, the default `entity` kind is used
    pub fn kind(mut self, kind: EntityKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Register a singleton catalog key
    pub fn singleton(mut self, name: impl Into<String>) -> Self {
        self.singletons.push(name.into());
        self
    }

    /// Replace the clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install a post-commit notifier
    pub fn notifier(mut self, notifier: Arc<dyn SyncNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Open the engine
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the config file cannot be written, read or validated
    /// - a kind or singleton collides in the key catalog
    /// - a migration or scan on open hits a fatal error
    pub fn open(self) -> Result<Engine> {
        let config = match (self.config, &self.path) {
            (Some(config), _) => config,
            (None, Some(path)) => {
                std::fs::create_dir_all(path)?;
                let file = path.join(CONFIG_FILE_NAME);
                EngineConfig::write_default_if_missing(&file)?;
                EngineConfig::from_file(&file)?
            }
            (None, None) => EngineConfig::default(),
        };

        let store = match (self.store, &self.path) {
            (Some(store), _) => store,
            (None, Some(path)) => open_file_store(path, &config)?,
            (None, None) => Arc::new(MemoryStore::new(config.capacity_bytes)),
        };

        Engine::assemble(
            store,
            config,
            self.kinds,
            self.singletons,
            self.clock,
            self.notifier,
        )
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("kinds", &self.kinds)
            .field("singletons", &self.singletons)
            .finish_non_exhaustive()
    }
}
