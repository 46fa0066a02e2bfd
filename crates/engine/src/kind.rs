//! Entity kinds and index projections
//!
//! An [`EntityKind`] names one family of entities (`entity`, `customer`, ...),
//! optionally points at the legacy monolithic blob its data used to live in,
//! and carries the [`Projection`] that derives an index row from a detail
//! record.

use std::fmt;
use std::sync::Arc;

use vellum_core::{DetailRecord, IndexRow, KindName, Value};

/// Derives the index row of an entity from its detail record
pub trait Projection: Send + Sync {
    /// Build the row; `updated_at` is taken from the record
    fn project(&self, detail: &DetailRecord) -> IndexRow;
}

/// Projection copying named display fields and counting named collections
///
/// Counts land in `cachedStats` as `{collection: length}`; a missing or
/// non-array collection counts as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldProjection {
    display_fields: Vec<String>,
    counted_collections: Vec<String>,
}

impl FieldProjection {
    /// Projection with no fields
    pub fn empty() -> Self {
        Self {
            display_fields: Vec::new(),
            counted_collections: Vec::new(),
        }
    }

    /// Also copy `field` into the row's display fields
    pub fn display(mut self, field: impl Into<String>) -> Self {
        self.display_fields.push(field.into());
        self
    }

    /// Also count the elements of `collection` into `cachedStats`
    pub fn count(mut self, collection: impl Into<String>) -> Self {
        self.counted_collections.push(collection.into());
        self
    }
}

impl Default for FieldProjection {
    /// Copies `name` only
    fn default() -> Self {
        Self::empty().display("name")
    }
}

impl Projection for FieldProjection {
    fn project(&self, detail: &DetailRecord) -> IndexRow {
        let mut row = IndexRow::new(detail.id.clone(), detail.updated_at);
        for field in &self.display_fields {
            match detail.field(field) {
                Some(value) if !value.is_null() => {
                    row.display.insert(field.clone(), value.detached());
                }
                _ => {}
            }
        }
        let mut stats = Value::object();
        for collection in &self.counted_collections {
            let len = detail
                .field(collection)
                .and_then(Value::as_array)
                .map_or(0, <[Value]>::len);
            stats = stats.with(collection.clone(), len);
        }
        row.cached_stats = stats;
        row
    }
}

/// One registered family of entities
#[derive(Clone)]
pub struct EntityKind {
    name: KindName,
    legacy_key: Option<String>,
    projection: Arc<dyn Projection>,
}

impl EntityKind {
    /// Kind with the default projection and no legacy blob
    pub fn new(name: KindName) -> Self {
        Self {
            name,
            legacy_key: None,
            projection: Arc::new(FieldProjection::default()),
        }
    }

    /// Set the legacy monolithic blob key to migrate from
    pub fn with_legacy_key(mut self, key: impl Into<String>) -> Self {
        self.legacy_key = Some(key.into());
        self
    }

    /// Replace the projection
    pub fn with_projection(mut self, projection: impl Projection + 'static) -> Self {
        self.projection = Arc::new(projection);
        self
    }

    /// Kind name
    pub fn name(&self) -> &KindName {
        &self.name
    }

    /// Legacy blob key, if configured
    pub fn legacy_key(&self) -> Option<&str> {
        self.legacy_key.as_deref()
    }

    /// Derive the index row of a detail record
    pub fn project(&self, detail: &DetailRecord) -> IndexRow {
        self.projection.project(detail)
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityKind")
            .field("name", &self.name)
            .field("legacy_key", &self.legacy_key)
            .finish_non_exhaustive()
    }
}
