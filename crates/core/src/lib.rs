//! Core types for Vellum
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: record graph (may contain shared nodes and cycles)
//! - Timestamp / Clock: microsecond time and injectable clocks
//! - EntityId / KindName: validated identifiers
//! - KeyCatalog: registry of key namespaces
//! - Record views: IndexRow, DetailRecord, RecycleEntry, Draft
//! - Error: error taxonomy shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod error;
pub mod record;
pub mod timestamp;
pub mod types;
pub mod value;

pub use catalog::{KeyCatalog, KeyClass, DRAFT_PREFIX, RECYCLE_INDEX_KEY, TRASH_PREFIX};
pub use error::{Error, Result};
pub use record::{
    index_from_value, index_to_value, recycle_from_value, recycle_to_value, DetailRecord, Draft,
    IndexRow, RecycleEntry, RecycleReason, RowPatch, RowStatus,
};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};
pub use types::{EntityId, KindName, MAX_ID_LEN, MAX_KIND_LEN};
pub use value::{Map, SharedValue, Value};
