//! Typed views over the records the engine stores
//!
//! Each type converts to and from the [`Value`] form written through the
//! serializer. Conversions from stored values are strict about the fields the
//! engine relies on (`id`, `status`, ...) and lenient about everything else.

use crate::error::{Error, Result};
use crate::timestamp::Timestamp;
use crate::types::{EntityId, KindName};
use crate::value::{Map, Value};

fn expect_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map> {
    value
        .as_object()
        .ok_or_else(|| Error::Corruption(format!("{} is a {}, expected an object", what, value.type_name())))
}

fn required_id(map: &Map, what: &str) -> Result<EntityId> {
    let raw = map
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Corruption(format!("{} has no string id", what)))?;
    EntityId::parse(raw)
}

fn timestamp_field(map: &Map, field: &str) -> Timestamp {
    map.get(field)
        .and_then(Value::as_int)
        .map(Timestamp::from_record_int)
        .unwrap_or(Timestamp::EPOCH)
}

// ============================================================================
// Index rows
// ============================================================================

/// Lifecycle status of an index row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowStatus {
    /// Live entity; must have a detail blob
    Active,
    /// Detail could not be written during migration; excluded from link checks
    MigrationFailed,
}

impl RowStatus {
    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Active => "active",
            RowStatus::MigrationFailed => "migration_failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(RowStatus::Active),
            "migration_failed" => Ok(RowStatus::MigrationFailed),
            other => Err(Error::Corruption(format!("unknown row status '{}'", other))),
        }
    }
}

/// One row of an entity kind's index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    /// Entity id
    pub id: EntityId,
    /// Fields shown in listings and used for search
    pub display: Map,
    /// Row status
    pub status: RowStatus,
    /// Last modification time
    pub updated_at: Timestamp,
    /// Derived statistics cached for listings
    pub cached_stats: Value,
}

impl IndexRow {
    /// Create an active row with no display fields
    pub fn new(id: EntityId, updated_at: Timestamp) -> Self {
        Self {
            id,
            display: Map::new(),
            status: RowStatus::Active,
            updated_at,
            cached_stats: Value::object(),
        }
    }

    /// Builder-style display field
    pub fn with_display(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.display.insert(field.into(), value.into());
        self
    }

    /// Display name used in recycle bin listings
    pub fn display_name(&self) -> Option<&str> {
        self.display.get("name").and_then(Value::as_str)
    }

    /// True when the row must be backed by a detail blob
    pub fn is_active(&self) -> bool {
        self.status == RowStatus::Active
    }

    /// Stored form
    pub fn to_value(&self) -> Value {
        Value::object()
            .with("id", self.id.as_str())
            .with("display", Value::Object(self.display.clone()))
            .with("status", self.status.as_str())
            .with("updatedAt", self.updated_at)
            .with("cachedStats", self.cached_stats.clone())
    }

    /// Parse the stored form
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = expect_object(value, "index row")?;
        let display = match map.get("display") {
            Some(Value::Object(d)) => d.clone(),
            _ => Map::new(),
        };
        let status = match map.get("status").and_then(Value::as_str) {
            Some(s) => RowStatus::parse(s)?,
            None => RowStatus::Active,
        };
        Ok(Self {
            id: required_id(map, "index row")?,
            display,
            status,
            updated_at: timestamp_field(map, "updatedAt"),
            cached_stats: map.get("cachedStats").cloned().unwrap_or_else(Value::object),
        })
    }
}

/// Patch applied to an index row by `update_entity`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPatch {
    /// Display fields to set; `Value::Null` removes a field
    pub display: Map,
    /// Replacement statistics
    pub cached_stats: Option<Value>,
}

impl RowPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style display field
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.display.insert(field.into(), value.into());
        self
    }

    /// Builder-style stats replacement
    pub fn stats(mut self, stats: Value) -> Self {
        self.cached_stats = Some(stats);
        self
    }

    /// Apply to a row, refreshing `updated_at`
    pub fn apply(&self, row: &mut IndexRow, now: Timestamp) {
        for (field, value) in &self.display {
            if value.is_null() {
                row.display.remove(field);
            } else {
                row.display.insert(field.clone(), value.clone());
            }
        }
        if let Some(stats) = &self.cached_stats {
            row.cached_stats = stats.clone();
        }
        row.updated_at = now;
    }
}

/// Encode a whole index
pub fn index_to_value(rows: &[IndexRow]) -> Value {
    Value::Array(rows.iter().map(IndexRow::to_value).collect())
}

/// Decode a whole index
pub fn index_from_value(value: &Value) -> Result<Vec<IndexRow>> {
    let rows = value
        .as_array()
        .ok_or_else(|| Error::Corruption(format!("index is a {}, expected an array", value.type_name())))?;
    rows.iter().map(IndexRow::from_value).collect()
}

// ============================================================================
// Detail records
// ============================================================================

/// Full payload of one entity
///
/// Stored as the body object with `id`, `createdAt` and `updatedAt` merged in
/// at the top level, which is also the shape of legacy monolithic records.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    /// Entity id
    pub id: EntityId,
    /// Creation time
    pub created_at: Timestamp,
    /// Last modification time
    pub updated_at: Timestamp,
    /// Everything else, including nested collections such as history logs
    pub body: Map,
}

impl DetailRecord {
    /// Create a record with an empty body
    pub fn new(id: EntityId, now: Timestamp) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            body: Map::new(),
        }
    }

    /// Builder-style body field
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(field.into(), value.into());
        self
    }

    /// Body field lookup
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// Stored form
    pub fn to_value(&self) -> Value {
        let mut map = self.body.clone();
        map.insert("id".into(), Value::from(self.id.as_str()));
        map.insert("createdAt".into(), Value::from(self.created_at));
        map.insert("updatedAt".into(), Value::from(self.updated_at));
        Value::Object(map)
    }

    /// Parse the stored form
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = expect_object(value, "detail record")?;
        let id = required_id(map, "detail record")?;
        let created_at = timestamp_field(map, "createdAt");
        let updated_at = timestamp_field(map, "updatedAt");
        let mut body = map.clone();
        body.remove("id");
        body.remove("createdAt");
        body.remove("updatedAt");
        Ok(Self {
            id,
            created_at,
            updated_at,
            body,
        })
    }
}

// ============================================================================
// Recycle bin entries
// ============================================================================

/// Why an entity ended up in the recycle bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecycleReason {
    /// Deleted by the user
    UserDelete,
    /// Index row whose detail blob was missing
    MissingFile,
    /// Detail blob found with no index row
    OrphanRecovered,
}

impl RecycleReason {
    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            RecycleReason::UserDelete => "user_delete",
            RecycleReason::MissingFile => "missing_file",
            RecycleReason::OrphanRecovered => "orphan_recovered",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "user_delete" => Ok(RecycleReason::UserDelete),
            "missing_file" => Ok(RecycleReason::MissingFile),
            "orphan_recovered" => Ok(RecycleReason::OrphanRecovered),
            other => Err(Error::Corruption(format!("unknown recycle reason '{}'", other))),
        }
    }
}

/// One entry of the recycle bin listing
#[derive(Debug, Clone, PartialEq)]
pub struct RecycleEntry {
    /// Entity id
    pub id: EntityId,
    /// Kind the entity belonged to
    pub kind: KindName,
    /// Display name at deletion time
    pub name: String,
    /// Deletion time
    pub deleted_at: Timestamp,
    /// Why it was recycled
    pub reason: RecycleReason,
    /// Whether `trash_{id}` holds the detail blob
    pub has_file: bool,
    /// Index row captured at deletion time
    pub row: Option<IndexRow>,
}

impl RecycleEntry {
    /// Stored form
    pub fn to_value(&self) -> Value {
        let mut v = Value::object()
            .with("id", self.id.as_str())
            .with("kind", self.kind.as_str())
            .with("name", self.name.as_str())
            .with("deletedAt", self.deleted_at)
            .with("reason", self.reason.as_str())
            .with("hasFile", self.has_file);
        if let Some(row) = &self.row {
            v = v.with("row", row.to_value());
        }
        v
    }

    /// Parse the stored form
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = expect_object(value, "recycle entry")?;
        let kind = match map.get("kind").and_then(Value::as_str) {
            Some(k) => KindName::parse(k)?,
            None => KindName::default_kind(),
        };
        let reason = match map.get("reason").and_then(Value::as_str) {
            Some(r) => RecycleReason::parse(r)?,
            None => RecycleReason::UserDelete,
        };
        let row = match map.get("row") {
            Some(v) if !v.is_null() => Some(IndexRow::from_value(v)?),
            _ => None,
        };
        let id = required_id(map, "recycle entry")?;
        Ok(Self {
            name: map
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string()),
            id,
            kind,
            deleted_at: timestamp_field(map, "deletedAt"),
            reason,
            has_file: map.get("hasFile").and_then(Value::as_bool).unwrap_or(false),
            row,
        })
    }
}

/// Encode the recycle bin listing
pub fn recycle_to_value(entries: &[RecycleEntry]) -> Value {
    Value::Array(entries.iter().map(RecycleEntry::to_value).collect())
}

/// Decode the recycle bin listing
pub fn recycle_from_value(value: &Value) -> Result<Vec<RecycleEntry>> {
    let entries = value.as_array().ok_or_else(|| {
        Error::Corruption(format!("recycle bin is a {}, expected an array", value.type_name()))
    })?;
    entries.iter().map(RecycleEntry::from_value).collect()
}

// ============================================================================
// Drafts
// ============================================================================

/// Disposable scratch entry (autosave draft)
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    /// When the draft was saved
    pub saved_at: Timestamp,
    /// Draft contents
    pub body: Value,
}

impl Draft {
    /// Stored form
    pub fn to_value(&self) -> Value {
        Value::object()
            .with("savedAt", self.saved_at)
            .with("body", self.body.clone())
    }

    /// Parse the stored form; `None` when `savedAt` is unreadable
    pub fn from_value(value: &Value) -> Option<Self> {
        let saved = value.get_int("savedAt")?;
        Some(Self {
            saved_at: Timestamp::from_record_int(saved),
            body: value.get("body").cloned().unwrap_or(Value::Null),
        })
    }
}
