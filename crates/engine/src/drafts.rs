//! Autosave drafts
//!
//! Drafts live under `draft_{id}` as `{savedAt, body}`. They are not entities:
//! no index row, no recycle bin. The scanner deletes them once they are older
//! than the configured retention.

use tracing::debug;

use vellum_concurrency::{CommitReceipt, Origin, TransactionOp};
use vellum_core::{Draft, EntityId, KeyCatalog, Result, Value};

use crate::database::Engine;

/// Handle on the draft namespace
#[derive(Debug, Clone, Copy)]
pub struct Drafts<'a> {
    engine: &'a Engine,
}

impl<'a> Drafts<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Save (or overwrite) the draft for `id`, stamped with the current time
    pub fn save_draft(&self, id: &EntityId, body: Value) -> Result<CommitReceipt> {
        let draft = Draft {
            saved_at: self.engine.now(),
            body,
        };
        self.engine.txn.execute(
            vec![TransactionOp::put(KeyCatalog::draft_key(id), draft.to_value())],
            Origin::Local,
        )
    }

    /// Load the draft for `id`
    ///
    /// A draft whose `savedAt` cannot be read is treated as absent; the next
    /// scan removes it.
    pub fn load_draft(&self, id: &EntityId) -> Result<Option<Draft>> {
        let Some(value) = self.engine.txn.read(&KeyCatalog::draft_key(id))? else {
            return Ok(None);
        };
        let draft = Draft::from_value(&value);
        if draft.is_none() {
            debug!(target: "vellum::engine", id = %id, "draft has no readable savedAt");
        }
        Ok(draft)
    }

    /// Remove the draft for `id`; absent drafts are not an error
    pub fn discard_draft(&self, id: &EntityId) -> Result<CommitReceipt> {
        self.engine.txn.execute(
            vec![TransactionOp::delete(KeyCatalog::draft_key(id))],
            Origin::Local,
        )
    }
}
