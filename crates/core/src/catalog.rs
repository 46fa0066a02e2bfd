//! Key catalog: the registry of key namespaces
//!
//! Every key the engine writes belongs to a namespace registered here:
//!
//! ```text
//! {kind}_index      index of one entity kind
//! {kind}_{id}       detail blob
//! trash_{id}        quarantined detail blob
//! recycleBinIndex   recycle bin listing
//! draft_{id}        disposable scratch entry
//! <singleton>       registered singleton (settings, tag catalogs, ...)
//! <legacy key>      per-kind monolithic blob awaiting migration
//! ```
//!
//! Maintenance passes ask the catalog to classify raw keys instead of
//! matching key strings themselves.

use crate::error::{Error, Result};
use crate::types::{EntityId, KindName};
use std::collections::{BTreeMap, BTreeSet};

/// Key of the recycle bin listing
pub const RECYCLE_INDEX_KEY: &str = "recycleBinIndex";
/// Prefix of quarantined detail blobs
pub const TRASH_PREFIX: &str = "trash_";
/// Prefix of scratch drafts
pub const DRAFT_PREFIX: &str = "draft_";

const RESERVED_KINDS: &[&str] = &["trash", "draft"];

/// What a raw key is, according to the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyClass {
    /// Index of an entity kind
    Index(KindName),
    /// Detail blob of an entity
    Detail(KindName, EntityId),
    /// Quarantined detail blob
    Trash(EntityId),
    /// The recycle bin listing
    RecycleIndex,
    /// Scratch draft
    Draft(EntityId),
    /// Registered singleton
    Singleton(String),
    /// Legacy monolithic blob of an entity kind
    Legacy(KindName),
    /// Not in any registered namespace
    Unknown,
}

/// Registry of key namespaces
#[derive(Debug, Clone, Default)]
pub struct KeyCatalog {
    kinds: BTreeMap<KindName, Option<String>>,
    singletons: BTreeSet<String>,
}

impl KeyCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity kind with an optional legacy blob key
    ///
    /// # Errors
    /// `InvalidOperation` if the kind is reserved or already registered, or
    /// if the legacy key falls inside another namespace.
    pub fn register_kind(&mut self, kind: KindName, legacy_key: Option<String>) -> Result<()> {
        if RESERVED_KINDS.contains(&kind.as_str()) {
            return Err(Error::invalid(format!("kind name '{}' is reserved", kind)));
        }
        if self.kinds.contains_key(&kind) {
            return Err(Error::invalid(format!("kind '{}' already registered", kind)));
        }
        if let Some(legacy) = &legacy_key {
            self.ensure_free(legacy)?;
            let prefix = format!("{}_", kind);
            if legacy.starts_with(&prefix) {
                return Err(Error::invalid(format!(
                    "legacy key '{}' collides with the '{}' namespace",
                    legacy, kind
                )));
            }
        }
        for singleton in &self.singletons {
            if singleton.starts_with(&format!("{}_", kind)) {
                return Err(Error::invalid(format!(
                    "kind '{}' collides with singleton '{}'",
                    kind, singleton
                )));
            }
        }
        self.kinds.insert(kind, legacy_key);
        Ok(())
    }

    /// Register a singleton key
    pub fn register_singleton(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid("singleton name must not be empty"));
        }
        if self.singletons.contains(&name) {
            return Ok(());
        }
        self.ensure_free(&name)?;
        self.singletons.insert(name);
        Ok(())
    }

    fn ensure_free(&self, key: &str) -> Result<()> {
        match self.classify(key) {
            KeyClass::Unknown => {}
            other => {
                return Err(Error::invalid(format!(
                    "key '{}' is already used as {:?}",
                    key, other
                )))
            }
        }
        if key.starts_with(TRASH_PREFIX) || key.starts_with(DRAFT_PREFIX) {
            return Err(Error::invalid(format!("key '{}' uses a reserved prefix", key)));
        }
        Ok(())
    }

    /// True when the kind is registered
    pub fn has_kind(&self, kind: &KindName) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered kinds in name order
    pub fn kinds(&self) -> impl Iterator<Item = &KindName> {
        self.kinds.keys()
    }

    /// Registered singleton names in order
    pub fn singletons(&self) -> impl Iterator<Item = &str> {
        self.singletons.iter().map(String::as_str)
    }

    /// Legacy blob key of a kind, if configured
    pub fn legacy_key(&self, kind: &KindName) -> Option<&str> {
        self.kinds.get(kind).and_then(|k| k.as_deref())
    }

    /// Index key of a kind
    pub fn index_key(kind: &KindName) -> String {
        format!("{}_index", kind)
    }

    /// Detail key of an entity
    pub fn detail_key(kind: &KindName, id: &EntityId) -> String {
        format!("{}_{}", kind, id)
    }

    /// Quarantine key of an entity
    pub fn trash_key(id: &EntityId) -> String {
        format!("{}{}", TRASH_PREFIX, id)
    }

    /// Draft key
    pub fn draft_key(id: &EntityId) -> String {
        format!("{}{}", DRAFT_PREFIX, id)
    }

    /// Classify a raw key
    pub fn classify(&self, key: &str) -> KeyClass {
        if key == RECYCLE_INDEX_KEY {
            return KeyClass::RecycleIndex;
        }
        if self.singletons.contains(key) {
            return KeyClass::Singleton(key.to_string());
        }
        for (kind, legacy) in &self.kinds {
            if legacy.as_deref() == Some(key) {
                return KeyClass::Legacy(kind.clone());
            }
        }
        if let Some(rest) = key.strip_prefix(TRASH_PREFIX) {
            return EntityId::parse(rest)
                .map(KeyClass::Trash)
                .unwrap_or(KeyClass::Unknown);
        }
        if let Some(rest) = key.strip_prefix(DRAFT_PREFIX) {
            return EntityId::parse(rest)
                .map(KeyClass::Draft)
                .unwrap_or(KeyClass::Unknown);
        }
        // Kind names carry no underscore, so the first one splits the key
        if let Some((prefix, rest)) = key.split_once('_') {
            if let Some((kind, _)) = self.kinds.iter().find(|(k, _)| k.as_str() == prefix) {
                if rest == crate::types::RESERVED_ID {
                    return KeyClass::Index(kind.clone());
                }
                if let Ok(id) = EntityId::parse(rest) {
                    return KeyClass::Detail(kind.clone(), id);
                }
            }
        }
        KeyClass::Unknown
    }
}
