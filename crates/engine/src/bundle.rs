//! Export and import of the whole entity space
//!
//! ## Bundle shape
//!
//! ```text
//! {
//!   version: 1,
//!   exportedAt: "2026-01-01T00:00:00.000000Z",
//!   index:             { kind: [row, ...] },
//!   details:           { kind: [record, ...] },
//!   auxiliaryCatalogs: { singleton: value },
//!   settings:          value | null
//! }
//! ```
//!
//! ## Import
//!
//! Import is staged like a migration: each detail goes in its own
//! transaction, then one final transaction merges the index rows, catalogs
//! and settings. If the final transaction fails every detail written by the
//! import is put back the way it was, so a bundle lands fully or not at all.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, TimeZone, Utc};
use tracing::{info, warn};

use vellum_concurrency::{Origin, TransactionOp};
use vellum_core::{
    index_to_value, DetailRecord, EntityId, Error, IndexRow, KeyCatalog, KeyClass, KindName, Map,
    Result, RowStatus, Timestamp, Value,
};
use vellum_storage::SafeSerializer;

use crate::database::{Engine, SETTINGS_KEY};
use crate::migration::read_legacy;

/// Bundle format version written by this build
pub const BUNDLE_VERSION: i64 = 1;

/// Snapshot of every entity kind, catalog and the settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBundle {
    /// Format version
    pub version: i64,
    /// Export time, RFC 3339
    pub exported_at: String,
    /// Index rows per kind
    pub index: BTreeMap<String, Vec<IndexRow>>,
    /// Detail records per kind
    pub details: BTreeMap<String, Vec<DetailRecord>>,
    /// Singleton catalogs other than settings
    pub auxiliary_catalogs: BTreeMap<String, Value>,
    /// The settings singleton
    pub settings: Option<Value>,
    /// Entries dropped while parsing: (location, reason)
    pub rejected: Vec<(String, String)>,
}

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entities written
    pub imported: usize,
    /// Records not imported: (id or location, reason)
    pub failed: Vec<(String, String)>,
}

fn rfc3339(ts: Timestamp) -> String {
    let micros = ts.as_micros();
    let secs = (micros / 1_000_000) as i64;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_default()
}

impl ExportBundle {
    fn empty(exported_at: String) -> Self {
        Self {
            version: BUNDLE_VERSION,
            exported_at,
            index: BTreeMap::new(),
            details: BTreeMap::new(),
            auxiliary_catalogs: BTreeMap::new(),
            settings: None,
            rejected: Vec::new(),
        }
    }

    /// Number of detail records in the bundle
    pub fn entity_count(&self) -> usize {
        self.details.values().map(Vec::len).sum()
    }

    /// Stored form
    pub fn to_value(&self) -> Value {
        let mut index = Map::new();
        for (kind, rows) in &self.index {
            index.insert(kind.clone(), index_to_value(rows));
        }
        let mut details = Map::new();
        for (kind, records) in &self.details {
            details.insert(
                kind.clone(),
                Value::Array(records.iter().map(DetailRecord::to_value).collect()),
            );
        }
        let catalogs: Map = self
            .auxiliary_catalogs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::object()
            .with("version", self.version)
            .with("exportedAt", self.exported_at.as_str())
            .with("index", Value::Object(index))
            .with("details", Value::Object(details))
            .with("auxiliaryCatalogs", Value::Object(catalogs))
            .with("settings", self.settings.clone())
    }

    /// Parse the stored form
    ///
    /// Rows and records that do not parse are collected in `rejected`
    /// instead of failing the whole bundle.
    ///
    /// # Errors
    /// `Serialization` when the bundle itself is not an object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            Error::serialization(format!("bundle is a {}, expected an object", value.type_name()))
        })?;
        let mut bundle = Self::empty(
            map.get("exportedAt")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        );
        bundle.version = map.get("version").and_then(Value::as_int).unwrap_or(0);

        for (kind, rows) in section(map, "index") {
            let parsed = bundle.index.entry(kind.clone()).or_default();
            for (pos, row) in rows.as_array().unwrap_or_default().iter().enumerate() {
                match IndexRow::from_value(row) {
                    Ok(row) => parsed.push(row),
                    Err(e) => bundle
                        .rejected
                        .push((format!("index/{}#{}", kind, pos), e.to_string())),
                }
            }
        }
        for (kind, records) in section(map, "details") {
            let parsed = bundle.details.entry(kind.clone()).or_default();
            for (pos, record) in records.as_array().unwrap_or_default().iter().enumerate() {
                match DetailRecord::from_value(record) {
                    Ok(record) => parsed.push(record),
                    Err(e) => bundle
                        .rejected
                        .push((format!("details/{}#{}", kind, pos), e.to_string())),
                }
            }
        }
        for (name, catalog) in section(map, "auxiliaryCatalogs") {
            bundle.auxiliary_catalogs.insert(name.clone(), catalog.clone());
        }
        bundle.settings = map.get("settings").filter(|v| !v.is_null()).cloned();
        Ok(bundle)
    }

    /// Encode to text
    pub fn to_text(&self) -> Result<String> {
        SafeSerializer::encode(&self.to_value())
    }

    /// Decode text written by [`ExportBundle::to_text`]
    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_value(&SafeSerializer::decode(text)?)
    }
}

fn section<'m>(map: &'m Map, name: &str) -> impl Iterator<Item = (&'m String, &'m Value)> {
    map.get(name).and_then(Value::as_object).into_iter().flatten()
}

// ============================================================================
// Export
// ============================================================================

pub(crate) fn export(engine: &Engine) -> Result<ExportBundle> {
    engine.txn.with_writer(|| {
        let mut bundle = ExportBundle::empty(rfc3339(engine.now()));
        let store = engine.txn.store();

        let mut detail_ids: BTreeMap<KindName, Vec<EntityId>> = BTreeMap::new();
        for key in store.keys()? {
            if let KeyClass::Detail(kind, id) = engine.catalog.classify(&key) {
                detail_ids.entry(kind).or_default().push(id);
            }
        }

        for kind in engine.kinds.values() {
            let tiered = engine.entities(kind.name())?;
            let rows = tiered.load_index()?;
            let mut records = Vec::new();
            for id in detail_ids.remove(kind.name()).unwrap_or_default() {
                match tiered.load_detail(&id) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(target: "vellum::engine", kind = %kind.name(), id = %id, error = %e, "detail unreadable, left out of export");
                        bundle
                            .rejected
                            .push((tiered.detail_key(&id), e.to_string()));
                    }
                }
            }
            if records.is_empty() && !store.is_available() {
                // Not migrated and cannot be: export straight from the legacy blob
                if let Some(batch) = read_legacy(&engine.txn, kind)? {
                    records = batch.records;
                }
            }
            bundle.index.insert(kind.name().to_string(), rows);
            bundle.details.insert(kind.name().to_string(), records);
        }

        for name in engine.catalog.singletons() {
            let Some(value) = engine.txn.read(name)? else {
                continue;
            };
            if name == SETTINGS_KEY {
                bundle.settings = Some(value);
            } else {
                bundle.auxiliary_catalogs.insert(name.to_string(), value);
            }
        }

        info!(target: "vellum::engine", entities = bundle.entity_count(), "exported");
        Ok(bundle)
    })
}

// ============================================================================
// Import
// ============================================================================

struct Written {
    key: String,
    prior: Option<Value>,
}

pub(crate) fn import(engine: &Engine, bundle: &ExportBundle, origin: Origin) -> Result<ImportReport> {
    engine.txn.with_writer(|| {
        if bundle.version != BUNDLE_VERSION {
            return Err(Error::invalid(format!(
                "bundle version {} is not supported (expected {})",
                bundle.version, BUNDLE_VERSION
            )));
        }
        let store = engine.txn.store();
        if !store.is_available() {
            return Err(Error::StorageDisabled(
                "cannot import into a write-blocked store".to_string(),
            ));
        }

        let mut report = ImportReport {
            imported: 0,
            failed: bundle.rejected.clone(),
        };
        let mut written: Vec<Written> = Vec::new();
        let mut landed: BTreeMap<KindName, Vec<&DetailRecord>> = BTreeMap::new();

        // Stage 1: details, one transaction each
        for (kind_name, records) in &bundle.details {
            let kind = match KindName::parse(kind_name.as_str()) {
                Ok(kind) if engine.kinds.contains_key(&kind) => kind,
                _ => {
                    for record in records {
                        report
                            .failed
                            .push((record.id.to_string(), format!("unknown kind '{}'", kind_name)));
                    }
                    continue;
                }
            };
            for record in records {
                let key = KeyCatalog::detail_key(&kind, &record.id);
                if store.contains(&KeyCatalog::trash_key(&record.id))? {
                    report
                        .failed
                        .push((record.id.to_string(), "id is held by the recycle bin".to_string()));
                    continue;
                }
                let prior = match engine.txn.read(&key) {
                    Ok(prior) => prior,
                    Err(e) => {
                        report
                            .failed
                            .push((record.id.to_string(), format!("existing detail unreadable: {}", e)));
                        continue;
                    }
                };
                match engine
                    .txn
                    .execute(vec![TransactionOp::put(key.clone(), record.to_value())], origin)
                {
                    Ok(_) => {
                        written.push(Written { key, prior });
                        landed.entry(kind.clone()).or_default().push(record);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => report.failed.push((record.id.to_string(), e.to_string())),
                }
            }
        }

        // Stage 2: index rows, catalogs, settings
        let mut ops = Vec::new();
        for (kind, records) in &landed {
            let tiered = engine.entities(kind)?;
            let mut rows = tiered.load_index()?;
            let bundled = bundle.index.get(kind.as_str());
            for record in records {
                let mut row = bundled
                    .and_then(|rows| rows.iter().find(|r| r.id == record.id))
                    .cloned()
                    .unwrap_or_else(|| tiered.project(record));
                row.status = RowStatus::Active;
                rows.retain(|r| r.id != record.id);
                rows.push(row);
            }
            ops.push(TransactionOp::put(tiered.index_key(), index_to_value(&rows)));
        }
        for (name, catalog) in &bundle.auxiliary_catalogs {
            match engine.catalog.classify(name) {
                KeyClass::Singleton(_) if name != SETTINGS_KEY => {
                    ops.push(TransactionOp::put(name.clone(), catalog.clone()));
                }
                _ => report
                    .failed
                    .push((name.clone(), "not a registered catalog".to_string())),
            }
        }
        if let Some(settings) = &bundle.settings {
            ops.push(TransactionOp::put(SETTINGS_KEY, settings.clone()));
        }

        if !ops.is_empty() {
            if let Err(e) = engine.txn.execute(ops, origin) {
                if e.is_fatal() {
                    return Err(e);
                }
                let leftover = undo(engine, written, origin);
                warn!(target: "vellum::engine", error = %e, leftover, "import failed, staged details reverted");
                return Err(e);
            }
        }

        report.imported = written.len();
        info!(target: "vellum::engine", imported = report.imported, failed = report.failed.len(), "imported bundle");
        Ok(report)
    })
}

/// Put every staged key back under the import's origin; returns how many
/// could not be reverted
fn undo(engine: &Engine, written: Vec<Written>, origin: Origin) -> usize {
    written
        .into_iter()
        .rev()
        .filter(|w| {
            let op = match &w.prior {
                Some(prior) => TransactionOp::put(w.key.clone(), prior.clone()),
                None => TransactionOp::delete(w.key.clone()),
            };
            engine.txn.execute(vec![op], origin).is_err()
        })
        .count()
}
