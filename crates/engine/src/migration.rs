//! Legacy monolithic blob to tiered layout migration
//!
//! Older data kept every entity of a kind in one array under a single key
//! (`customers`, ...). Migration splits it into an index plus one detail blob
//! per entity.
//!
//! ## Sequence
//!
//! ```text
//! 1. index + (legacy blob with assigned ids), one transaction
//! 2. each detail blob, one transaction each
//! 3. legacy blob deleted, or replaced by {"unconverted": [rejected records]}
//! ```
//!
//! A failure in step 2 removes the index and every detail written by this run,
//! puts the legacy blob back as it was, and reports what could not be cleaned
//! up. An index found next to a legacy blob that still holds convertible
//! records means an earlier run stopped before step 3. The resume writes the
//! missing details of rows the index still lists; a row that is gone was
//! deleted since and stays gone.
//!
//! Records lacking an id get a fresh one in step 1. The ids are written back
//! into the legacy blob in the same transaction so a resumed run maps every
//! record to the same row.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use vellum_concurrency::{Origin, TransactionManager, TransactionOp};
use vellum_core::{
    index_from_value, index_to_value, DetailRecord, EntityId, Error, KeyCatalog, Result,
    RowStatus, Value,
};

use crate::kind::EntityKind;

/// Result of a migration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy key configured, or no legacy blob and no index
    NotNeeded,
    /// Index present and legacy blob gone
    AlreadyMigrated,
    /// Fresh conversion finished
    Migrated {
        /// Entities converted
        entities: usize,
        /// Legacy records that could not be converted: (id or position, reason)
        rejected: Vec<(String, String)>,
    },
    /// An interrupted conversion was resumed
    Resumed {
        /// Detail blobs written by this run
        entities: usize,
        /// Rows whose detail still could not be written (marked `migration_failed`)
        failed: Vec<EntityId>,
        /// Legacy records that could not be converted: (id or position, reason)
        rejected: Vec<(String, String)>,
    },
}

/// Parsed legacy blob
#[derive(Debug, Clone)]
pub(crate) struct LegacyBatch {
    /// Convertible records, in blob order
    pub(crate) records: Vec<DetailRecord>,
    /// Records that could not be converted
    pub(crate) rejected: Vec<(String, String)>,
    /// The rejected records as stored
    pub(crate) rejected_items: Vec<Value>,
    /// The blob as read
    pub(crate) original: Value,
    /// The blob with assigned ids stamped in
    pub(crate) stamped: Value,
    /// True when some record received a fresh id
    pub(crate) ids_assigned: bool,
}

/// Field of a retired legacy blob holding the records that were not converted
pub(crate) const UNCONVERTED_FIELD: &str = "unconverted";

fn failure(kind: &EntityKind, reason: impl Into<String>, leftover_keys: Vec<String>) -> Error {
    Error::MigrationFailure {
        kind: kind.name().to_string(),
        reason: reason.into(),
        leftover_keys,
    }
}

/// Read and parse the legacy blob of a kind; `None` when there is none
pub(crate) fn read_legacy(txn: &TransactionManager, kind: &EntityKind) -> Result<Option<LegacyBatch>> {
    let Some(legacy_key) = kind.legacy_key() else {
        return Ok(None);
    };
    let value = match txn.read(legacy_key) {
        Ok(Some(value)) => value,
        Ok(None) => return Ok(None),
        Err(e @ (Error::Serialization(_) | Error::Corruption(_))) => {
            return Err(failure(kind, format!("legacy blob unreadable: {}", e), Vec::new()))
        }
        Err(e) => return Err(e),
    };
    if let Some(Value::Array(items)) = value.get(UNCONVERTED_FIELD) {
        return Ok(Some(LegacyBatch {
            records: Vec::new(),
            rejected: Vec::new(),
            rejected_items: items.clone(),
            original: value.clone(),
            stamped: value.clone(),
            ids_assigned: false,
        }));
    }
    let items = value.as_array().ok_or_else(|| {
        failure(
            kind,
            format!("legacy blob is a {}, expected an array", value.type_name()),
            Vec::new(),
        )
    })?;

    let mut batch = LegacyBatch {
        records: Vec::with_capacity(items.len()),
        rejected: Vec::new(),
        rejected_items: Vec::new(),
        original: Value::Null,
        stamped: Value::Null,
        ids_assigned: false,
    };
    let mut seen = BTreeSet::new();
    let mut stamped = Vec::with_capacity(items.len());

    for (pos, item) in items.iter().enumerate() {
        let mut item = item.clone();
        let label = match item.get("id") {
            Some(Value::String(s)) => s.clone(),
            _ => format!("#{}", pos),
        };
        if !item.is_object() {
            batch
                .rejected
                .push((label, format!("record is a {}", item.type_name())));
            batch.rejected_items.push(item.clone());
            stamped.push(item);
            continue;
        }

        let id = match item.get("id") {
            None | Some(Value::Null) => {
                let id = EntityId::new();
                if let Some(map) = item.as_object_mut() {
                    map.insert("id".into(), Value::from(id.as_str()));
                }
                batch.ids_assigned = true;
                Ok(id)
            }
            Some(Value::String(s)) => EntityId::parse(s.as_str()),
            Some(other) => Err(Error::invalid(format!("id is a {}", other.type_name()))),
        };
        let parsed = id.and_then(|id| {
            if !seen.insert(id.clone()) {
                return Err(Error::invalid(format!("duplicate id '{}'", id)));
            }
            DetailRecord::from_value(&item)
        });
        match parsed {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                batch.rejected.push((label, e.to_string()));
                batch.rejected_items.push(item.clone());
            }
        }
        stamped.push(item);
    }
    batch.stamped = Value::Array(stamped);
    batch.original = value;
    Ok(Some(batch))
}

/// Runs legacy conversions through the transaction manager
#[derive(Debug, Clone, Copy)]
pub struct MigrationEngine<'a> {
    txn: &'a TransactionManager,
}

impl<'a> MigrationEngine<'a> {
    /// Create a migration engine writing through `txn`
    pub fn new(txn: &'a TransactionManager) -> Self {
        Self { txn }
    }

    /// Convert the kind's legacy blob if one is present
    ///
    /// # Errors
    /// `MigrationFailure` when the conversion could not complete; the legacy
    /// blob is left in place and the call can be retried. `StorageDisabled`
    /// for a write-blocked store.
    pub fn migrate_if_needed(&self, kind: &EntityKind) -> Result<MigrationOutcome> {
        self.txn.with_writer(|| {
            let Some(legacy_key) = kind.legacy_key() else {
                return Ok(MigrationOutcome::NotNeeded);
            };
            let store = self.txn.store();
            let index_key = KeyCatalog::index_key(kind.name());
            let index_present = store.contains(&index_key)?;

            if !store.contains(legacy_key)? {
                return Ok(if index_present {
                    MigrationOutcome::AlreadyMigrated
                } else {
                    MigrationOutcome::NotNeeded
                });
            }
            if !store.is_available() {
                return Err(Error::StorageDisabled(format!(
                    "cannot migrate '{}' on a write-blocked store",
                    kind.name()
                )));
            }
            let Some(batch) = read_legacy(self.txn, kind)? else {
                return Ok(MigrationOutcome::NotNeeded);
            };

            if index_present {
                if batch.records.is_empty() {
                    // Retired blob: only rejected records are left behind
                    return Ok(MigrationOutcome::AlreadyMigrated);
                }
                self.resume(kind, legacy_key, &index_key, batch)
            } else {
                self.fresh(kind, legacy_key, &index_key, batch)
            }
        })
    }

    fn fresh(
        &self,
        kind: &EntityKind,
        legacy_key: &str,
        index_key: &str,
        batch: LegacyBatch,
    ) -> Result<MigrationOutcome> {
        let rows: Vec<_> = batch.records.iter().map(|d| kind.project(d)).collect();
        let mut ops = vec![TransactionOp::put(index_key, index_to_value(&rows))];
        if batch.ids_assigned {
            ops.push(TransactionOp::put(legacy_key, batch.stamped.clone()));
        }
        self.txn.execute(ops, Origin::Local).map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                failure(kind, format!("writing the index failed: {}", e), Vec::new())
            }
        })?;

        let store = self.txn.store();
        let mut written = Vec::with_capacity(batch.records.len());
        for record in &batch.records {
            let key = KeyCatalog::detail_key(kind.name(), &record.id);
            if store.contains(&key)? {
                debug!(target: "vellum::migration", key = %key, "detail already present, keeping it");
                continue;
            }
            if let Err(e) = self
                .txn
                .execute(vec![TransactionOp::put(key.clone(), record.to_value())], Origin::Local)
            {
                if e.is_fatal() {
                    return Err(e);
                }
                let mut cleanup = vec![index_key.to_string()];
                cleanup.extend(written);
                let mut leftover_keys = self.remove_all(&cleanup);
                if batch.ids_assigned
                    && self
                        .txn
                        .execute(
                            vec![TransactionOp::put(legacy_key, batch.original.clone())],
                            Origin::Local,
                        )
                        .is_err()
                {
                    leftover_keys.push(legacy_key.to_string());
                }
                warn!(target: "vellum::migration", kind = %kind.name(), key = %key, error = %e, leftover = leftover_keys.len(), "migration failed, partial output removed");
                return Err(failure(
                    kind,
                    format!("writing detail '{}' failed: {}", key, e),
                    leftover_keys,
                ));
            }
            written.push(key);
        }

        self.retire_legacy(kind, legacy_key, &batch);
        info!(target: "vellum::migration", kind = %kind.name(), entities = batch.records.len(), "migrated legacy blob");
        Ok(MigrationOutcome::Migrated {
            entities: batch.records.len(),
            rejected: batch.rejected,
        })
    }

    fn resume(
        &self,
        kind: &EntityKind,
        legacy_key: &str,
        index_key: &str,
        batch: LegacyBatch,
    ) -> Result<MigrationOutcome> {
        let mut rows = match self.txn.read(index_key)? {
            Some(value) => index_from_value(&value).map_err(|e| {
                failure(kind, format!("existing index unreadable: {}", e), Vec::new())
            })?,
            None => Vec::new(),
        };
        let store = self.txn.store();
        let mut changed = false;
        let mut written = 0;
        let mut added = Vec::new();
        let mut failed = Vec::new();

        for row in rows.iter_mut() {
            let Some(record) = batch.records.iter().find(|r| r.id == row.id) else {
                continue;
            };
            let key = KeyCatalog::detail_key(kind.name(), &record.id);
            if !store.contains(&key)? {
                if store.contains(&KeyCatalog::trash_key(&record.id))? {
                    debug!(target: "vellum::migration", key = %key, "id is held by the recycle bin, not resumed");
                    continue;
                }
                match self
                    .txn
                    .execute(vec![TransactionOp::put(key.clone(), record.to_value())], Origin::Local)
                {
                    Ok(_) => {
                        written += 1;
                        added.push(key);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(target: "vellum::migration", key = %key, error = %e, "detail still cannot be written");
                        if row.status != RowStatus::MigrationFailed {
                            row.status = RowStatus::MigrationFailed;
                            changed = true;
                        }
                        failed.push(record.id.clone());
                        continue;
                    }
                }
            }
            if row.status == RowStatus::MigrationFailed {
                row.status = RowStatus::Active;
                changed = true;
            }
        }

        if changed {
            if let Err(e) = self.txn.execute(
                vec![TransactionOp::put(index_key, index_to_value(&rows))],
                Origin::Local,
            ) {
                if e.is_fatal() {
                    return Err(e);
                }
                return Err(failure(kind, format!("writing the index failed: {}", e), added));
            }
        }

        if failed.is_empty() {
            self.retire_legacy(kind, legacy_key, &batch);
        }
        info!(target: "vellum::migration", kind = %kind.name(), written, failed = failed.len(), "resumed interrupted migration");
        Ok(MigrationOutcome::Resumed {
            entities: written,
            failed,
            rejected: batch.rejected,
        })
    }

    /// Delete each key in its own transaction; returns keys still present
    fn remove_all(&self, keys: &[String]) -> Vec<String> {
        let store = self.txn.store();
        keys.iter()
            .filter(|key| {
                let _ = self
                    .txn
                    .execute(vec![TransactionOp::delete(key.as_str())], Origin::Local);
                !matches!(store.get(key), Ok(None))
            })
            .cloned()
            .collect()
    }

    /// Delete the legacy blob, or retire it to the rejected records
    ///
    /// Converted records never stay behind, so a later run cannot replay them
    /// over entities deleted since. Rejected records are kept for inspection
    /// under [`UNCONVERTED_FIELD`] and are never converted again.
    fn retire_legacy(&self, kind: &EntityKind, legacy_key: &str, batch: &LegacyBatch) {
        let op = if batch.rejected_items.is_empty() {
            TransactionOp::delete(legacy_key)
        } else {
            warn!(target: "vellum::migration", kind = %kind.name(), rejected = batch.rejected.len(), "some legacy records were not converted, kept under the legacy key");
            TransactionOp::put(
                legacy_key,
                Value::object().with(UNCONVERTED_FIELD, Value::Array(batch.rejected_items.clone())),
            )
        };
        // A full blob left behind is picked up by the next run's resume path
        if let Err(e) = self.txn.execute(vec![op], Origin::Local) {
            warn!(target: "vellum::migration", kind = %kind.name(), error = %e, "legacy blob could not be retired");
        }
    }
}
