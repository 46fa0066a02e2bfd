//! Integrity scan and rollback scenarios
//!
//! - a row whose detail vanished is moved to the recycle bin
//! - a detail with no row is recovered into the recycle bin and restorable
//! - a create whose detail write runs out of space leaves the index untouched

use std::sync::Arc;

use vellum_concurrency::Origin;
use vellum_core::{
    index_from_value, DetailRecord, EntityId, Error, KeyCatalog, KindName, ManualClock,
    RecycleReason, Timestamp, Value,
};
use vellum_engine::{Engine, ScanReport};
use vellum_storage::testing::{FaultKind, FaultRule, FaultyStore};
use vellum_storage::{KeyValueStore, MemoryStore, SafeSerializer};

// ============================================================================
// Test Helpers
// ============================================================================

fn id(s: &str) -> EntityId {
    EntityId::parse(s).unwrap()
}

fn open(store: Arc<dyn KeyValueStore>) -> Engine {
    Engine::builder()
        .store(store)
        .clock(Arc::new(ManualClock::new(Timestamp::from_secs(1_700_000_000))))
        .open()
        .unwrap()
}

fn create(engine: &Engine, raw_id: &str, name: &str) {
    let detail = DetailRecord::new(id(raw_id), engine.now())
        .with("name", name)
        .with("notes", Value::Array(vec![Value::from("first visit")]));
    engine
        .default_entities()
        .unwrap()
        .create_projected(detail, Origin::Local)
        .unwrap();
}

fn detail_key(raw_id: &str) -> String {
    KeyCatalog::detail_key(&KindName::default_kind(), &id(raw_id))
}

// ============================================================================
// Row without detail
// ============================================================================

#[test]
fn test_missing_detail_moves_row_to_recycle_bin() {
    let store = Arc::new(MemoryStore::unbounded());
    let engine = open(store.clone());
    create(&engine, "1", "One");
    create(&engine, "2", "Two");
    create(&engine, "3", "Three");

    // Deleted behind the engine's back
    store.delete(&detail_key("2")).unwrap();

    let report = engine.scanner().scan().unwrap();
    assert_eq!(
        report,
        ScanReport {
            fixed_links: 1,
            recovered_orphans: 0,
            purged_expired: 0,
            reconciled_trash: 0,
        }
    );

    let rows = engine.default_entities().unwrap().load_index().unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);

    let entry = engine.recycle_bin().entry(&id("2")).unwrap().unwrap();
    assert_eq!(entry.reason, RecycleReason::MissingFile);
    assert!(!entry.has_file);
    assert_eq!(entry.name, "Two");
    assert_eq!(entry.row.unwrap().display_name(), Some("Two"));

    // Nothing to bring back
    let err = engine.recycle_bin().restore(&id("2"), Origin::Local).unwrap_err();
    assert!(matches!(err, Error::BackupMissing(_)));

    assert!(engine.scanner().scan().unwrap().is_clean());
}

// ============================================================================
// Detail without row
// ============================================================================

#[test]
fn test_orphan_detail_is_recovered_and_restorable() {
    let store = Arc::new(MemoryStore::unbounded());
    let engine = open(store.clone());
    create(&engine, "1", "One");

    let orphan = DetailRecord::new(id("x9"), Timestamp::from_secs(1_600_000_000)).with("name", "Nine");
    store
        .put(
            &detail_key("x9"),
            &SafeSerializer::encode(&orphan.to_value()).unwrap(),
        )
        .unwrap();

    let report = engine.scanner().scan().unwrap();
    assert_eq!(report.recovered_orphans, 1);
    assert_eq!(report.fixed_links, 0);

    let entry = engine.recycle_bin().entry(&id("x9")).unwrap().unwrap();
    assert_eq!(entry.reason, RecycleReason::OrphanRecovered);
    assert!(entry.has_file);
    assert_eq!(entry.name, "Nine");
    assert!(store.contains(&KeyCatalog::trash_key(&id("x9"))).unwrap());
    assert!(!store.contains(&detail_key("x9")).unwrap());

    engine.recycle_bin().restore(&id("x9"), Origin::Local).unwrap();

    let (row, detail) = engine
        .default_entities()
        .unwrap()
        .get(&id("x9"))
        .unwrap()
        .unwrap();
    assert_eq!(row.display_name(), Some("Nine"));
    assert!(row.is_active());
    assert_eq!(detail, Some(orphan));
    assert!(engine.recycle_bin().list().unwrap().is_empty());
    assert!(engine.scanner().scan().unwrap().is_clean());
}

#[test]
fn test_trash_blob_without_entry_is_listed() {
    let store = Arc::new(MemoryStore::unbounded());
    let engine = open(store.clone());
    store
        .put(&KeyCatalog::trash_key(&id("t1")), "{\"id\":\"t1\",\"name\":\"Lost\"}")
        .unwrap();

    let report = engine.scanner().scan().unwrap();
    assert_eq!(report.reconciled_trash, 1);
    let entry = engine.recycle_bin().entry(&id("t1")).unwrap().unwrap();
    assert!(entry.has_file);
    assert_eq!(entry.kind, KindName::default_kind());
}

#[test]
fn test_entry_claiming_missing_blob_is_corrected() {
    let store = Arc::new(MemoryStore::unbounded());
    let engine = open(store.clone());
    create(&engine, "1", "One");
    engine
        .recycle_bin()
        .soft_delete(&KindName::default_kind(), &id("1"), Origin::Local)
        .unwrap();
    store.delete(&KeyCatalog::trash_key(&id("1"))).unwrap();

    let report = engine.scanner().scan().unwrap();
    assert_eq!(report.reconciled_trash, 1);
    assert!(!engine.recycle_bin().entry(&id("1")).unwrap().unwrap().has_file);
}

#[test]
fn test_write_blocked_scan_is_a_no_op() {
    let mut entries = std::collections::BTreeMap::new();
    entries.insert(detail_key("o1"), "{\"id\":\"o1\"}".to_string());
    let store = Arc::new(MemoryStore::write_blocked("read-only medium", entries));
    let engine = open(store.clone());

    assert_eq!(engine.scanner().scan().unwrap(), ScanReport::default());
    assert!(store.contains(&detail_key("o1")).unwrap());
}

// ============================================================================
// Capacity exhausted mid-transaction
// ============================================================================

#[test]
fn test_capacity_on_detail_write_rolls_back_index() {
    let store = Arc::new(FaultyStore::new(MemoryStore::unbounded()));
    let engine = open(store.clone());
    create(&engine, "a", "Alpha");
    let before = store.inner().dump();

    store.inject(FaultRule::PutKey(detail_key("c1")), FaultKind::Capacity);
    let detail = DetailRecord::new(id("c1"), engine.now()).with("name", "Gamma");
    let err = engine
        .default_entities()
        .unwrap()
        .create_projected(detail, Origin::Local)
        .unwrap_err();

    assert!(matches!(err, Error::CapacityExceeded { .. }));
    assert_eq!(store.fired(), 1);
    assert_eq!(store.inner().dump(), before);

    let index = engine
        .store()
        .get(&KeyCatalog::index_key(&KindName::default_kind()))
        .unwrap()
        .unwrap();
    let rows = index_from_value(&SafeSerializer::decode(&index).unwrap()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id("a"));

    let metrics = engine.metrics();
    assert_eq!(metrics.total_rolled_back, 1);
    assert!(!engine.is_poisoned());
}

#[test]
fn test_real_capacity_bound_rolls_back_index() {
    let store = Arc::new(MemoryStore::new(400));
    let engine = open(store.clone());
    create(&engine, "a", "Alpha");
    let before = store.dump();

    let detail = DetailRecord::new(id("big"), engine.now()).with("name", "x".repeat(400));
    let err = engine
        .default_entities()
        .unwrap()
        .create_projected(detail, Origin::Local)
        .unwrap_err();

    assert!(matches!(err, Error::CapacityExceeded { .. }));
    assert_eq!(store.dump(), before);
}
