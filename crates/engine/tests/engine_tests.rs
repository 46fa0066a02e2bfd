//! Engine-level integration tests
//!
//! Drafts, export/import, replication hand-off, usage reporting and reopening
//! a file-backed engine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use tempfile::TempDir;

use vellum_concurrency::Origin;
use vellum_core::{
    DetailRecord, EntityId, Error, KeyCatalog, KindName, ManualClock, RowStatus, Timestamp, Value,
};
use vellum_engine::{
    Engine, EngineConfig, EntityKind, ExportBundle, UsageLevel, BUNDLE_VERSION, SETTINGS_KEY,
};
use vellum_storage::testing::{FaultKind, FaultRule, FaultyStore};
use vellum_storage::{FileStore, KeyValueStore, MemoryStore};

// ============================================================================
// Test Helpers
// ============================================================================

fn id(s: &str) -> EntityId {
    EntityId::parse(s).unwrap()
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_secs(1_700_000_000)))
}

fn open(store: Arc<dyn KeyValueStore>) -> Engine {
    Engine::builder()
        .store(store)
        .clock(clock())
        .singleton("templates")
        .open()
        .unwrap()
}

fn create(engine: &Engine, raw_id: &str, name: &str) {
    let detail = DetailRecord::new(id(raw_id), engine.now()).with("name", name);
    engine
        .default_entities()
        .unwrap()
        .create_projected(detail, Origin::Local)
        .unwrap();
}

// ============================================================================
// Drafts
// ============================================================================

#[test]
fn test_drafts_expire_after_retention() {
    let clock = clock();
    let store = Arc::new(MemoryStore::unbounded());
    let engine = Engine::builder()
        .store(store.clone())
        .clock(clock.clone())
        .open()
        .unwrap();
    let drafts = engine.drafts();

    drafts.save_draft(&id("d1"), Value::from("old")).unwrap();
    clock.advance(Duration::from_secs(29 * 86_400));
    drafts.save_draft(&id("d2"), Value::from("new")).unwrap();
    clock.advance(Duration::from_secs(2 * 86_400));
    // Unreadable savedAt: always expired
    store.put("draft_d3", "{\"body\":1}").unwrap();

    let loaded = drafts.load_draft(&id("d2")).unwrap().unwrap();
    assert_eq!(loaded.body, Value::from("new"));
    assert!(drafts.load_draft(&id("d3")).unwrap().is_none());

    let report = engine.scanner().scan().unwrap();
    assert_eq!(report.purged_expired, 2);
    assert!(drafts.load_draft(&id("d1")).unwrap().is_none());
    assert!(drafts.load_draft(&id("d2")).unwrap().is_some());

    drafts.discard_draft(&id("d2")).unwrap();
    assert!(drafts.load_draft(&id("d2")).unwrap().is_none());
    // Discarding twice is fine
    drafts.discard_draft(&id("d2")).unwrap();
}

// ============================================================================
// Export / import
// ============================================================================

#[test]
fn test_export_import_round_trip() {
    let source = open(Arc::new(MemoryStore::unbounded()));
    create(&source, "a", "Alpha");
    create(&source, "b", "Beta");
    source
        .put_singleton(SETTINGS_KEY, Value::object().with("theme", "dark"), Origin::Local)
        .unwrap();
    source
        .put_singleton("templates", Value::Array(vec![Value::from("invoice")]), Origin::Local)
        .unwrap();

    let text = source.export().unwrap().to_text().unwrap();
    let bundle = ExportBundle::from_text(&text).unwrap();
    assert_eq!(bundle.version, BUNDLE_VERSION);
    assert_eq!(bundle.entity_count(), 2);
    assert!(bundle.exported_at.starts_with("2023-11-14T"));

    let target = open(Arc::new(MemoryStore::unbounded()));
    let report = target.import(&bundle, Origin::Local).unwrap();
    assert_eq!(report.imported, 2);
    assert!(report.failed.is_empty());

    let source_rows = source.default_entities().unwrap().load_index().unwrap();
    let target_rows = target.default_entities().unwrap().load_index().unwrap();
    assert_eq!(target_rows, source_rows);
    assert_eq!(
        target.default_entities().unwrap().load_detail(&id("b")).unwrap(),
        source.default_entities().unwrap().load_detail(&id("b")).unwrap()
    );
    assert_eq!(
        target.get_singleton(SETTINGS_KEY).unwrap(),
        source.get_singleton(SETTINGS_KEY).unwrap()
    );
    assert_eq!(
        target.get_singleton("templates").unwrap(),
        source.get_singleton("templates").unwrap()
    );
    assert!(target.scanner().scan().unwrap().is_clean());
}

#[test]
fn test_import_reports_unknown_kinds() {
    let target = open(Arc::new(MemoryStore::unbounded()));
    let value = Value::object()
        .with("version", BUNDLE_VERSION)
        .with(
            "details",
            Value::object()
                .with(
                    "entity",
                    Value::Array(vec![Value::object().with("id", "a").with("name", "Alpha")]),
                )
                .with(
                    "invoice",
                    Value::Array(vec![Value::object().with("id", "i1")]),
                ),
        );
    let bundle = ExportBundle::from_value(&value).unwrap();

    let report = target.import(&bundle, Origin::Local).unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "i1");

    // Without a bundled row the row is projected from the detail
    let rows = target.default_entities().unwrap().load_index().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].display_name(), Some("Alpha"));
    assert_eq!(rows[0].status, RowStatus::Active);
}

#[test]
fn test_import_rejects_unsupported_version() {
    let target = open(Arc::new(MemoryStore::unbounded()));
    let bundle = ExportBundle::from_value(&Value::object().with("version", 99)).unwrap();
    assert!(matches!(
        target.import(&bundle, Origin::Local),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_failed_import_leaves_nothing_behind() {
    let source = open(Arc::new(MemoryStore::unbounded()));
    create(&source, "a", "Alpha");
    create(&source, "b", "Beta");
    let bundle = source.export().unwrap();

    let store = Arc::new(FaultyStore::new(MemoryStore::unbounded()));
    let target = open(store.clone());
    // Pre-existing detail that the import overwrites and must put back
    let existing = DetailRecord::new(id("b"), Timestamp::from_secs(1)).with("name", "Old Beta");
    target
        .default_entities()
        .unwrap()
        .save_detail(&existing, Origin::Local)
        .unwrap();
    let before = store.inner().dump();

    store.inject(
        FaultRule::PutKey(KeyCatalog::index_key(&KindName::default_kind())),
        FaultKind::Capacity,
    );
    let err = target.import(&bundle, Origin::Local).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { .. }));
    assert_eq!(store.inner().dump(), before);
}

#[test]
fn test_failed_remote_import_reverts_without_notifying() {
    let source = open(Arc::new(MemoryStore::unbounded()));
    create(&source, "r1", "Remote");
    let bundle = source.export().unwrap();

    let store = Arc::new(FaultyStore::new(MemoryStore::unbounded()));
    let target = open(store.clone());
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    target.set_notifier(Arc::new(move |key: &str, _value: Option<&Value>, _local: bool| {
        sink.lock().push(key.to_string());
    }));
    let before = store.inner().dump();

    store.inject(
        FaultRule::PutKey(KeyCatalog::index_key(&KindName::default_kind())),
        FaultKind::Capacity,
    );
    assert!(target.import(&bundle, Origin::Remote).is_err());
    assert_eq!(store.inner().dump(), before);
    assert!(seen.lock().is_empty());
}

// ============================================================================
// Replication hand-off
// ============================================================================

#[test]
fn test_notifier_sees_local_writes_only() {
    let engine = open(Arc::new(MemoryStore::unbounded()));
    let seen: Arc<Mutex<Vec<(String, bool, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.set_notifier(Arc::new(move |key: &str, value: Option<&Value>, local: bool| {
        sink.lock().push((key.to_string(), value.is_some(), local));
    }));

    create(&engine, "a", "Alpha");
    assert_eq!(
        *seen.lock(),
        vec![
            ("entity_index".to_string(), true, true),
            ("entity_a".to_string(), true, true),
        ]
    );

    seen.lock().clear();
    engine
        .apply_remote(SETTINGS_KEY, Some(Value::object().with("theme", "light")))
        .unwrap();
    engine.apply_remote("entity_a", None).unwrap();
    assert!(seen.lock().is_empty());
    assert!(engine.get_singleton(SETTINGS_KEY).unwrap().is_some());

    let err = engine.apply_remote("stray", Some(Value::from(1))).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    engine.clear_notifier();
    create(&engine, "b", "Beta");
    assert!(seen.lock().is_empty());
}

// ============================================================================
// Concurrent callers
// ============================================================================

#[test]
fn test_concurrent_writers_keep_index_and_details_in_step() {
    let store = Arc::new(MemoryStore::unbounded());
    let engine = Arc::new(open(store.clone()));
    let threads = 8;
    let per_thread = 25;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    create(&engine, &format!("t{}-{}", t, i), "Concurrent");
                }
                // Half of each thread's entities go to the recycle bin while
                // the other threads are still creating
                for i in (0..per_thread).step_by(2) {
                    engine
                        .recycle_bin()
                        .soft_delete(
                            &KindName::default_kind(),
                            &id(&format!("t{}-{}", t, i)),
                            Origin::Local,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let deleted_per_thread = (per_thread + 1) / 2;
    let live = threads * (per_thread - deleted_per_thread);
    let rows = engine.default_entities().unwrap().load_index().unwrap();
    assert_eq!(rows.len(), live);
    let details = store
        .keys()
        .unwrap()
        .into_iter()
        .filter(|k| k.starts_with("entity_") && k != "entity_index")
        .count();
    assert_eq!(details, live);
    assert_eq!(
        engine.recycle_bin().list().unwrap().len(),
        threads * deleted_per_thread
    );
    assert!(engine.scanner().scan().unwrap().is_clean());
    assert_eq!(engine.metrics().total_aborted, 0);
}

// ============================================================================
// Usage
// ============================================================================

#[test]
fn test_usage_report_levels_and_capacity() {
    let config = EngineConfig {
        capacity_bytes: 200,
        ..EngineConfig::default()
    };
    let engine = Engine::builder().config(config).singleton("templates").open().unwrap();
    assert_eq!(engine.usage_report().unwrap().level, UsageLevel::Normal);

    // "settings" (8) + quoted 160-char string (162) = 170 bytes = 85%
    engine
        .put_singleton(SETTINGS_KEY, Value::from("x".repeat(160)), Origin::Local)
        .unwrap();
    let report = engine.usage_report().unwrap();
    assert_eq!(report.used_bytes, 170);
    assert_eq!(report.capacity_bytes, 200);
    assert_eq!(report.level, UsageLevel::Warning);

    let err = engine
        .put_singleton("templates", Value::from("y".repeat(100)), Origin::Local)
        .unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { .. }));
    assert_eq!(engine.usage_report().unwrap().used_bytes, 170);
}

// ============================================================================
// Reopen
// ============================================================================

#[test]
fn test_file_backed_engine_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open_dir(dir.path()).unwrap();
        create(&engine, "a", "Alpha");
        engine
            .recycle_bin()
            .soft_delete(&KindName::default_kind(), &id("a"), Origin::Local)
            .unwrap();
        create(&engine, "b", "Beta");
    }

    let engine = Engine::open_dir(dir.path()).unwrap();
    let rows = engine.default_entities().unwrap().load_index().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].display_name(), Some("Beta"));
    assert_eq!(engine.recycle_bin().list().unwrap().len(), 1);
    engine.recycle_bin().restore(&id("a"), Origin::Local).unwrap();
    assert_eq!(engine.default_entities().unwrap().load_index().unwrap().len(), 2);
}

#[test]
fn test_scan_keeps_draft_that_cannot_be_read() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path(), 1 << 20).unwrap());
    let engine = Engine::open(store.clone(), EngineConfig::default()).unwrap();
    engine.drafts().save_draft(&id("ok"), Value::from("body")).unwrap();

    // A directory where the draft file should be reads back as an I/O error
    let blocked = store.path_for(&KeyCatalog::draft_key(&id("d1")));
    std::fs::create_dir(&blocked).unwrap();
    assert!(matches!(
        store.get(&KeyCatalog::draft_key(&id("d1"))),
        Err(Error::Io(_))
    ));

    let report = engine.scanner().scan().unwrap();
    assert_eq!(report.purged_expired, 0);
    assert!(blocked.is_dir());
    assert!(engine.drafts().load_draft(&id("ok")).unwrap().is_some());
}

#[test]
fn test_scan_on_open() {
    let store = Arc::new(MemoryStore::unbounded());
    store.put("entity_orphan", "{\"id\":\"orphan\"}").unwrap();
    let config = EngineConfig {
        scan_on_open: true,
        ..EngineConfig::default()
    };
    let engine = Engine::builder()
        .store(store.clone())
        .config(config)
        .kind(EntityKind::new(KindName::default_kind()))
        .open()
        .unwrap();
    assert!(engine.recycle_bin().entry(&id("orphan")).unwrap().is_some());
    assert!(!store.contains("entity_orphan").unwrap());
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum Action {
    Create(u8),
    Delete(u8),
    Restore(u8),
    Purge(u8),
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..6).prop_map(Action::Create),
        (0u8..6).prop_map(Action::Delete),
        (0u8..6).prop_map(Action::Restore),
        (0u8..6).prop_map(Action::Purge),
    ]
}

proptest! {
    #[test]
    fn prop_api_operations_keep_store_consistent(actions in proptest::collection::vec(arb_action(), 1..30)) {
        let store = Arc::new(MemoryStore::unbounded());
        let engine = open(store.clone());
        let kind = KindName::default_kind();

        for action in actions {
            // Rejected operations are fine; they must simply change nothing
            let _ = match action {
                Action::Create(n) => engine
                    .default_entities()
                    .unwrap()
                    .create_projected(
                        DetailRecord::new(id(&format!("e{}", n)), engine.now()).with("name", n as i64),
                        Origin::Local,
                    )
                    .map(|_| ()),
                Action::Delete(n) => engine
                    .recycle_bin()
                    .soft_delete(&kind, &id(&format!("e{}", n)), Origin::Local)
                    .map(|_| ()),
                Action::Restore(n) => engine
                    .recycle_bin()
                    .restore(&id(&format!("e{}", n)), Origin::Local)
                    .map(|_| ()),
                Action::Purge(n) => engine
                    .recycle_bin()
                    .purge(&id(&format!("e{}", n)), Origin::Local)
                    .map(|_| ()),
            };
        }

        // No id is both live and in the trash, and nothing needs repair
        let rows = engine.default_entities().unwrap().load_index().unwrap();
        for row in &rows {
            prop_assert!(!store.contains(&KeyCatalog::trash_key(&row.id)).unwrap());
        }
        prop_assert!(engine.scanner().scan().unwrap().is_clean());
    }
}
