//! End-to-end walk through the public facade

use std::sync::Arc;

use tempfile::TempDir;
use vellum::{
    DetailRecord, Engine, EntityId, EntityKind, FieldProjection, KindName, MemoryStore, Origin,
    RecycleReason, RowPatch, SafeSerializer, Value,
};

#[test]
fn test_customer_lifecycle_in_memory() {
    let customer = KindName::parse("customer").unwrap();
    let store = Arc::new(MemoryStore::unbounded());
    let legacy = Value::Array(vec![
        Value::object().with("id", "c1").with("name", "Ada"),
        Value::object().with("id", "c2").with("name", "Grace"),
    ]);
    vellum::KeyValueStore::put(
        store.as_ref(),
        "customers",
        &SafeSerializer::encode(&legacy).unwrap(),
    )
    .unwrap();

    let engine = Engine::builder()
        .store(store)
        .kind(
            EntityKind::new(customer.clone())
                .with_legacy_key("customers")
                .with_projection(FieldProjection::default().count("orders")),
        )
        .open()
        .unwrap();

    let customers = engine.entities(&customer).unwrap();
    assert_eq!(customers.load_index().unwrap().len(), 2);

    let c3 = EntityId::parse("c3").unwrap();
    customers
        .create_projected(
            DetailRecord::new(c3.clone(), engine.now()).with("name", "Barbara"),
            Origin::Local,
        )
        .unwrap();

    let (_, detail) = customers.get(&c3).unwrap().unwrap();
    let detail = detail
        .unwrap()
        .with("orders", Value::Array(vec![Value::object().with("total", 42)]));
    customers
        .update_entity(
            &c3,
            detail,
            &RowPatch::new().stats(Value::object().with("orders", 1)),
            Origin::Local,
        )
        .unwrap();

    engine
        .recycle_bin()
        .soft_delete(&customer, &EntityId::parse("c1").unwrap(), Origin::Local)
        .unwrap();
    let entry = &engine.recycle_bin().list().unwrap()[0];
    assert_eq!(entry.reason, RecycleReason::UserDelete);

    assert!(engine.scanner().scan().unwrap().is_clean());
    assert_eq!(engine.metrics().total_aborted, 0);
}

#[test]
fn test_open_dir_writes_default_config() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open_dir(dir.path()).unwrap();
    assert!(dir.path().join(vellum::CONFIG_FILE_NAME).exists());
    assert_eq!(engine.usage_report().unwrap().used_bytes, 0);
}
