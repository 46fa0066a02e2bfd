//! Two-tier entity storage
//!
//! Each entity kind keeps one compact index (`{kind}_index`, an array of
//! [`IndexRow`]) for listings and search, plus one detail blob per entity
//! (`{kind}_{id}`) holding the full payload. Rows and details are created and
//! updated together in one transaction; deletion goes through the recycle bin.

use tracing::debug;

use vellum_concurrency::{CommitReceipt, Origin, TransactionOp};
use vellum_core::{
    index_from_value, index_to_value, DetailRecord, EntityId, Error, IndexRow, KeyCatalog,
    Result, RowPatch, RowStatus, Value,
};

use crate::database::Engine;
use crate::kind::EntityKind;
use crate::migration::{read_legacy, MigrationEngine};

/// Index and detail access for one entity kind
#[derive(Debug, Clone, Copy)]
pub struct TieredEntityStore<'a> {
    engine: &'a Engine,
    kind: &'a EntityKind,
}

impl<'a> TieredEntityStore<'a> {
    pub(crate) fn new(engine: &'a Engine, kind: &'a EntityKind) -> Self {
        Self { engine, kind }
    }

    /// The kind this store serves
    pub fn kind(&self) -> &'a EntityKind {
        self.kind
    }

    /// Key of this kind's index
    pub fn index_key(&self) -> String {
        KeyCatalog::index_key(self.kind.name())
    }

    /// Key of an entity's detail blob
    pub fn detail_key(&self, id: &EntityId) -> String {
        KeyCatalog::detail_key(self.kind.name(), id)
    }

    /// Read the index without triggering migration; `None` when absent
    pub fn peek_index(&self) -> Result<Option<Vec<IndexRow>>> {
        match self.engine.txn.read(&self.index_key())? {
            Some(value) => Ok(Some(index_from_value(&value)?)),
            None => Ok(None),
        }
    }

    /// Load the index
    ///
    /// An absent index with a legacy blob present triggers the migration. On a
    /// write-blocked store the rows are projected from the legacy blob in
    /// memory instead, without writing anything.
    pub fn load_index(&self) -> Result<Vec<IndexRow>> {
        self.engine.txn.with_writer(|| {
            if let Some(rows) = self.peek_index()? {
                return Ok(rows);
            }
            let store = self.engine.txn.store();
            let legacy_present = match self.kind.legacy_key() {
                Some(key) => store.contains(key)?,
                None => false,
            };
            if !legacy_present {
                return Ok(Vec::new());
            }
            if !store.is_available() {
                debug!(target: "vellum::migration", kind = %self.kind.name(), "store is write-blocked, serving legacy rows read-only");
                let batch = read_legacy(&self.engine.txn, self.kind)?;
                return Ok(batch
                    .map(|b| b.records.iter().map(|d| self.kind.project(d)).collect())
                    .unwrap_or_default());
            }
            MigrationEngine::new(&self.engine.txn).migrate_if_needed(self.kind)?;
            Ok(self.peek_index()?.unwrap_or_default())
        })
    }

    /// Replace the whole index
    pub fn save_index(&self, rows: &[IndexRow], origin: Origin) -> Result<CommitReceipt> {
        self.engine.txn.execute(
            vec![TransactionOp::put(self.index_key(), index_to_value(rows))],
            origin,
        )
    }

    /// Load one detail record
    pub fn load_detail(&self, id: &EntityId) -> Result<Option<DetailRecord>> {
        match self.engine.txn.read(&self.detail_key(id))? {
            Some(value) => Ok(Some(detail_from_blob(id, value)?)),
            None => Ok(None),
        }
    }

    /// Write one detail record without touching the index
    pub fn save_detail(&self, record: &DetailRecord, origin: Origin) -> Result<CommitReceipt> {
        self.engine.txn.execute(
            vec![TransactionOp::put(self.detail_key(&record.id), record.to_value())],
            origin,
        )
    }

    /// Create an entity: row appended to the index and detail written, as one unit
    ///
    /// # Errors
    /// `InvalidOperation` if the row and detail ids differ, or the id is
    /// already live or sitting in the recycle bin.
    pub fn create_entity(
        &self,
        detail: DetailRecord,
        row: IndexRow,
        origin: Origin,
    ) -> Result<CommitReceipt> {
        self.engine.txn.with_writer(|| {
            if row.id != detail.id {
                return Err(Error::invalid(format!(
                    "row id '{}' does not match detail id '{}'",
                    row.id, detail.id
                )));
            }
            let mut rows = self.load_index()?;
            let store = self.engine.txn.store();
            if rows.iter().any(|r| r.id == detail.id) || store.contains(&self.detail_key(&detail.id))? {
                return Err(Error::invalid(format!("entity '{}' already exists", detail.id)));
            }
            if store.contains(&KeyCatalog::trash_key(&detail.id))? {
                return Err(Error::invalid(format!(
                    "id '{}' is held by the recycle bin",
                    detail.id
                )));
            }

            let detail_key = self.detail_key(&detail.id);
            rows.push(row);
            self.engine.txn.execute(
                vec![
                    TransactionOp::put(self.index_key(), index_to_value(&rows)),
                    TransactionOp::put(detail_key, detail.to_value()),
                ],
                origin,
            )
        })
    }

    /// Create an entity whose row is derived by the kind's projection
    pub fn create_projected(&self, detail: DetailRecord, origin: Origin) -> Result<CommitReceipt> {
        let row = self.project(&detail);
        self.create_entity(detail, row, origin)
    }

    /// Update an entity: row patched and detail replaced, as one unit
    ///
    /// The row's `updatedAt` and the detail's `updatedAt` are both refreshed.
    ///
    /// # Errors
    /// `NotFound` if the index has no row for `id`; `InvalidOperation` if the
    /// detail carries a different id.
    pub fn update_entity(
        &self,
        id: &EntityId,
        mut detail: DetailRecord,
        patch: &RowPatch,
        origin: Origin,
    ) -> Result<CommitReceipt> {
        self.engine.txn.with_writer(|| {
            if detail.id != *id {
                return Err(Error::invalid(format!(
                    "detail id '{}' does not match '{}'",
                    detail.id, id
                )));
            }
            let mut rows = self.load_index()?;
            let row = rows
                .iter_mut()
                .find(|r| r.id == *id)
                .ok_or_else(|| Error::NotFound(format!("{} '{}'", self.kind.name(), id)))?;

            let now = self.engine.now();
            patch.apply(row, now);
            row.status = RowStatus::Active;
            detail.updated_at = now;

            self.engine.txn.execute(
                vec![
                    TransactionOp::put(self.index_key(), index_to_value(&rows)),
                    TransactionOp::put(self.detail_key(id), detail.to_value()),
                ],
                origin,
            )
        })
    }

    /// Row and detail of an entity; `None` when the index has no row
    pub fn get(&self, id: &EntityId) -> Result<Option<(IndexRow, Option<DetailRecord>)>> {
        self.engine.txn.with_writer(|| {
            let rows = self.load_index()?;
            match rows.into_iter().find(|r| r.id == *id) {
                Some(row) => Ok(Some((row, self.load_detail(id)?))),
                None => Ok(None),
            }
        })
    }

    /// Derive an index row from a detail record
    pub fn project(&self, detail: &DetailRecord) -> IndexRow {
        self.kind.project(detail)
    }
}

/// Parse a stored detail blob, tolerating a missing `id` field
pub(crate) fn detail_from_blob(id: &EntityId, mut value: Value) -> Result<DetailRecord> {
    if let Some(map) = value.as_object_mut() {
        map.entry("id".to_string())
            .or_insert_with(|| Value::from(id.as_str()));
    }
    DetailRecord::from_value(&value)
}
