//! Recycle bin: soft delete, restore, purge
//!
//! Deleting an entity moves its detail blob to `trash_{id}`, removes its index
//! row and records a [`RecycleEntry`] (with the captured row) in
//! `recycleBinIndex`, all in one transaction. Restore reverses that; purge is
//! the only operation that destroys data.

use tracing::{debug, info};

use vellum_concurrency::{CommitReceipt, Origin, TransactionOp};
use vellum_core::{
    index_to_value, recycle_from_value, recycle_to_value, EntityId, Error, KeyCatalog, KeyClass,
    KindName, RecycleEntry, RecycleReason, Result, RowStatus, RECYCLE_INDEX_KEY,
};

use crate::database::Engine;
use crate::tiered::detail_from_blob;

/// Handle on the recycle bin
#[derive(Debug, Clone, Copy)]
pub struct RecycleBin<'a> {
    engine: &'a Engine,
}

impl<'a> RecycleBin<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// All entries, most recent first
    pub fn list(&self) -> Result<Vec<RecycleEntry>> {
        match self.engine.txn.read(RECYCLE_INDEX_KEY)? {
            Some(value) => recycle_from_value(&value),
            None => Ok(Vec::new()),
        }
    }

    /// Entry for an id, if any
    pub fn entry(&self, id: &EntityId) -> Result<Option<RecycleEntry>> {
        Ok(self.list()?.into_iter().find(|e| e.id == *id))
    }

    /// Move an entity to the recycle bin
    ///
    /// # Errors
    /// `NotFound` if the kind has neither a row nor a detail for `id`;
    /// `InvalidOperation` for an unregistered kind or an id already in the bin.
    pub fn soft_delete(&self, kind: &KindName, id: &EntityId, origin: Origin) -> Result<CommitReceipt> {
        self.engine.txn.with_writer(|| {
            let tiered = self.engine.entities(kind)?;
            let mut rows = tiered.load_index()?;
            let row = rows
                .iter()
                .position(|r| r.id == *id)
                .map(|pos| rows.remove(pos));
            let detail_key = tiered.detail_key(id);
            let detail = self.engine.txn.read(&detail_key)?;
            if row.is_none() && detail.is_none() {
                return Err(Error::NotFound(format!("{} '{}'", kind, id)));
            }

            let trash_key = KeyCatalog::trash_key(id);
            if self.engine.txn.store().contains(&trash_key)? {
                return Err(Error::invalid(format!("'{}' is already in the recycle bin", id)));
            }

            let name = row
                .as_ref()
                .and_then(|r| r.display_name())
                .or_else(|| detail.as_ref().and_then(|d| d.get_str("name")))
                .unwrap_or(id.as_str())
                .to_string();
            let entry = RecycleEntry {
                id: id.clone(),
                kind: kind.clone(),
                name,
                deleted_at: self.engine.now(),
                reason: RecycleReason::UserDelete,
                has_file: detail.is_some(),
                row: row.clone(),
            };
            let mut entries = self.list()?;
            entries.retain(|e| e.id != *id);
            entries.insert(0, entry);

            let mut ops = Vec::with_capacity(4);
            if let Some(detail) = detail {
                ops.push(TransactionOp::put(trash_key, detail));
                ops.push(TransactionOp::delete(detail_key));
            }
            if row.is_some() {
                ops.push(TransactionOp::put(tiered.index_key(), index_to_value(&rows)));
            }
            ops.push(TransactionOp::put(RECYCLE_INDEX_KEY, recycle_to_value(&entries)));

            let receipt = self.engine.txn.execute(ops, origin)?;
            info!(target: "vellum::recycle", kind = %kind, id = %id, "soft-deleted");
            Ok(receipt)
        })
    }

    /// Bring an entity back from the recycle bin
    ///
    /// The row captured at deletion is reinstated (or projected from the
    /// detail when none was captured) with a fresh `updatedAt`.
    ///
    /// # Errors
    /// `BackupMissing` without a `trash_{id}` blob; `NotFound` without an
    /// entry; `InvalidOperation` when a live detail already exists for the id.
    pub fn restore(&self, id: &EntityId, origin: Origin) -> Result<CommitReceipt> {
        self.engine.txn.with_writer(|| {
            let trash_key = KeyCatalog::trash_key(id);
            let Some(blob) = self.engine.txn.read(&trash_key)? else {
                return Err(Error::BackupMissing(id.to_string()));
            };
            let mut entries = self.list()?;
            let pos = entries
                .iter()
                .position(|e| e.id == *id)
                .ok_or_else(|| Error::NotFound(format!("recycle entry '{}'", id)))?;
            let entry = entries.remove(pos);

            let tiered = self.engine.entities(&entry.kind)?;
            let detail_key = tiered.detail_key(id);
            if self.engine.txn.store().contains(&detail_key)? {
                return Err(Error::invalid(format!(
                    "'{}' already has a live detail; restore would overwrite it",
                    id
                )));
            }

            let detail = detail_from_blob(id, blob)?;
            let mut row = match entry.row {
                Some(row) => row,
                None => tiered.project(&detail),
            };
            row.updated_at = self.engine.now();
            row.status = RowStatus::Active;

            let mut rows = tiered.load_index()?;
            rows.retain(|r| r.id != *id);
            rows.push(row);

            let receipt = self.engine.txn.execute(
                vec![
                    TransactionOp::put(detail_key, detail.to_value()),
                    TransactionOp::delete(trash_key),
                    TransactionOp::put(tiered.index_key(), index_to_value(&rows)),
                    TransactionOp::put(RECYCLE_INDEX_KEY, recycle_to_value(&entries)),
                ],
                origin,
            )?;
            info!(target: "vellum::recycle", kind = %entry.kind, id = %id, "restored");
            Ok(receipt)
        })
    }

    /// Permanently remove one entity from the recycle bin
    ///
    /// # Errors
    /// `NotFound` when the bin holds neither an entry nor a blob for `id`.
    pub fn purge(&self, id: &EntityId, origin: Origin) -> Result<CommitReceipt> {
        self.engine.txn.with_writer(|| {
            let trash_key = KeyCatalog::trash_key(id);
            let mut entries = self.list()?;
            let before = entries.len();
            entries.retain(|e| e.id != *id);
            let had_blob = self.engine.txn.store().contains(&trash_key)?;
            if entries.len() == before && !had_blob {
                return Err(Error::NotFound(format!("recycle entry '{}'", id)));
            }

            let receipt = self.engine.txn.execute(
                vec![
                    TransactionOp::delete(trash_key),
                    TransactionOp::put(RECYCLE_INDEX_KEY, recycle_to_value(&entries)),
                ],
                origin,
            )?;
            debug!(target: "vellum::recycle", id = %id, "purged");
            Ok(receipt)
        })
    }

    /// Permanently empty the recycle bin; returns the number of ids purged
    pub fn purge_all(&self, origin: Origin) -> Result<usize> {
        self.engine.txn.with_writer(|| {
            let entries = self.list()?;
            let mut ids: Vec<EntityId> = entries.into_iter().map(|e| e.id).collect();
            for key in self.engine.txn.store().keys()? {
                if let KeyClass::Trash(id) = self.engine.catalog.classify(&key) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            if ids.is_empty() {
                return Ok(0);
            }

            let mut ops: Vec<_> = ids
                .iter()
                .map(|id| TransactionOp::delete(KeyCatalog::trash_key(id)))
                .collect();
            ops.push(TransactionOp::delete(RECYCLE_INDEX_KEY));
            self.engine.txn.execute(ops, origin)?;
            info!(target: "vellum::recycle", purged = ids.len(), "recycle bin emptied");
            Ok(ids.len())
        })
    }
}
