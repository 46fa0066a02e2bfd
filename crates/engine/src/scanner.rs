//! Integrity scanner
//!
//! One pass over the key space that repairs divergence between index rows,
//! detail blobs and the recycle bin, and drops expired drafts:
//!
//! ```text
//! active row, no detail        -> row moved to recycle bin (missing_file)
//! detail, no row               -> blob moved to trash_{id} (orphan_recovered)
//! draft past retention         -> deleted
//! trash_{id} with no entry     -> entry added (orphan_recovered)
//! entry hasFile, no trash blob -> hasFile cleared
//! ```
//!
//! All repairs are collected first and committed as one transaction.
//! Integrity problems are reported as counts, never as errors; only a failed
//! write surfaces as an error.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use vellum_concurrency::{Origin, TransactionOp};
use vellum_core::{
    index_from_value, index_to_value, recycle_from_value, recycle_to_value, Draft, EntityId, Error,
    KeyCatalog, KeyClass, KindName, RecycleEntry, RecycleReason, Result, RECYCLE_INDEX_KEY,
};

use crate::database::Engine;

/// Counts of repairs made by one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanReport {
    /// Active rows without a detail, moved to the recycle bin
    pub fixed_links: usize,
    /// Details without a row, moved to the recycle bin
    pub recovered_orphans: usize,
    /// Drafts deleted for age or unreadable timestamps
    pub purged_expired: usize,
    /// Recycle bin entries added or corrected
    pub reconciled_trash: usize,
}

impl ScanReport {
    /// True when the scan changed nothing
    pub fn is_clean(&self) -> bool {
        *self == ScanReport::default()
    }
}

/// Handle on the integrity scanner
#[derive(Debug, Clone, Copy)]
pub struct IntegrityScanner<'a> {
    engine: &'a Engine,
}

#[derive(Default)]
struct KeySpace {
    details: BTreeMap<KindName, BTreeSet<EntityId>>,
    indexes: BTreeSet<KindName>,
    trash: BTreeSet<EntityId>,
    drafts: Vec<(String, EntityId)>,
}

impl<'a> IntegrityScanner<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Run one scan
    ///
    /// A write-blocked store is left alone and yields a zeroed report.
    pub fn scan(&self) -> Result<ScanReport> {
        self.engine.txn.with_writer(|| {
            let txn = &self.engine.txn;
            let store = txn.store();
            if !store.is_available() {
                debug!(target: "vellum::scan", "store is write-blocked, scan skipped");
                return Ok(ScanReport::default());
            }

            let space = self.classify_keys()?;
            let now = self.engine.now();
            let mut report = ScanReport::default();
            let mut ops = Vec::new();

            let mut entries = match txn.read(RECYCLE_INDEX_KEY) {
                Ok(Some(value)) => recycle_from_value(&value).unwrap_or_else(|e| {
                    warn!(target: "vellum::scan", error = %e, "recycle bin unreadable, rebuilding it from trash blobs");
                    Vec::new()
                }),
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(target: "vellum::scan", error = %e, "recycle bin unreadable, rebuilding it from trash blobs");
                    Vec::new()
                }
            };
            let entries_before = entries.clone();
            let mut trash = space.trash.clone();

            for kind in self.engine.catalog.kinds() {
                let index_key = KeyCatalog::index_key(kind);
                let details = space.details.get(kind).cloned().unwrap_or_default();
                let legacy_pending = self
                    .engine
                    .catalog
                    .legacy_key(kind)
                    .map(|k| store.contains(k))
                    .transpose()?
                    .unwrap_or(false);
                if !space.indexes.contains(kind) && legacy_pending {
                    // Not migrated yet: the details are not orphans
                    continue;
                }

                let mut rows = if space.indexes.contains(kind) {
                    match txn.read(&index_key).and_then(|v| match v {
                        Some(v) => index_from_value(&v),
                        None => Ok(Vec::new()),
                    }) {
                        Ok(rows) => rows,
                        Err(e) => {
                            warn!(target: "vellum::scan", kind = %kind, error = %e, "index unreadable, kind skipped");
                            continue;
                        }
                    }
                } else {
                    Vec::new()
                };

                // Active rows with no detail
                let row_count = rows.len();
                let mut missing = Vec::new();
                rows.retain(|row| {
                    if row.is_active() && !details.contains(&row.id) {
                        missing.push(row.clone());
                        false
                    } else {
                        true
                    }
                });
                for row in missing {
                    warn!(target: "vellum::scan", kind = %kind, id = %row.id, "row without detail moved to recycle bin");
                    entries.retain(|e| e.id != row.id);
                    entries.insert(
                        0,
                        RecycleEntry {
                            id: row.id.clone(),
                            kind: kind.clone(),
                            name: row.display_name().unwrap_or(row.id.as_str()).to_string(),
                            deleted_at: now,
                            reason: RecycleReason::MissingFile,
                            has_file: trash.contains(&row.id),
                            row: Some(row),
                        },
                    );
                    report.fixed_links += 1;
                }
                if rows.len() != row_count {
                    ops.push(TransactionOp::put(index_key.clone(), index_to_value(&rows)));
                }

                // Details with no row
                for id in details.iter().filter(|id| !rows.iter().any(|r| r.id == **id)) {
                    let detail_key = KeyCatalog::detail_key(kind, id);
                    if trash.contains(id) {
                        warn!(target: "vellum::scan", key = %detail_key, "orphan left in place, its id already has a trash blob");
                        continue;
                    }
                    let blob = match txn.read(&detail_key) {
                        Ok(Some(blob)) => blob,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(target: "vellum::scan", key = %detail_key, error = %e, "orphan unreadable, left in place");
                            continue;
                        }
                    };
                    let name = blob.get_str("name").unwrap_or(id.as_str()).to_string();
                    ops.push(TransactionOp::put(KeyCatalog::trash_key(id), blob));
                    ops.push(TransactionOp::delete(detail_key));
                    trash.insert(id.clone());
                    entries.retain(|e| e.id != *id);
                    entries.insert(
                        0,
                        RecycleEntry {
                            id: id.clone(),
                            kind: kind.clone(),
                            name,
                            deleted_at: now,
                            reason: RecycleReason::OrphanRecovered,
                            has_file: true,
                            row: None,
                        },
                    );
                    info!(target: "vellum::scan", kind = %kind, id = %id, "orphan detail recovered into recycle bin");
                    report.recovered_orphans += 1;
                }
            }

            // Expired drafts
            let retention = self.engine.config.draft_retention();
            for (key, _) in &space.drafts {
                let expired = match txn.read(key) {
                    Ok(Some(value)) => match Draft::from_value(&value) {
                        Some(draft) => draft.saved_at.saturating_add(retention).is_before(now),
                        None => true,
                    },
                    Ok(None) => false,
                    Err(Error::Serialization(_) | Error::Corruption(_)) => true,
                    Err(e) => {
                        warn!(target: "vellum::scan", key = %key, error = %e, "draft could not be read, kept");
                        false
                    }
                };
                if expired {
                    ops.push(TransactionOp::delete(key.clone()));
                    report.purged_expired += 1;
                }
            }

            // Recycle bin against trash blobs
            for id in &trash {
                if !entries.iter().any(|e| e.id == *id) {
                    entries.push(RecycleEntry {
                        id: id.clone(),
                        kind: KindName::default_kind(),
                        name: id.to_string(),
                        deleted_at: now,
                        reason: RecycleReason::OrphanRecovered,
                        has_file: true,
                        row: None,
                    });
                    report.reconciled_trash += 1;
                }
            }
            for entry in entries.iter_mut() {
                if entry.has_file && !trash.contains(&entry.id) {
                    entry.has_file = false;
                    report.reconciled_trash += 1;
                }
            }
            if entries != entries_before {
                ops.push(TransactionOp::put(RECYCLE_INDEX_KEY, recycle_to_value(&entries)));
            }

            if !ops.is_empty() {
                txn.execute(ops, Origin::Local)?;
            }
            if report.is_clean() {
                debug!(target: "vellum::scan", "scan found nothing to repair");
            } else {
                info!(
                    target: "vellum::scan",
                    fixed_links = report.fixed_links,
                    recovered_orphans = report.recovered_orphans,
                    purged_expired = report.purged_expired,
                    reconciled_trash = report.reconciled_trash,
                    "scan repaired store"
                );
            }
            Ok(report)
        })
    }

    fn classify_keys(&self) -> Result<KeySpace> {
        let mut space = KeySpace::default();
        for key in self.engine.txn.store().keys()? {
            match self.engine.catalog.classify(&key) {
                KeyClass::Detail(kind, id) => {
                    space.details.entry(kind).or_default().insert(id);
                }
                KeyClass::Index(kind) => {
                    space.indexes.insert(kind);
                }
                KeyClass::Trash(id) => {
                    space.trash.insert(id);
                }
                KeyClass::Draft(id) => space.drafts.push((key, id)),
                KeyClass::RecycleIndex
                | KeyClass::Singleton(_)
                | KeyClass::Legacy(_)
                | KeyClass::Unknown => {}
            }
        }
        Ok(space)
    }
}
