//! Pipeline tests against a real PostgreSQL
//!
//! These tests require Docker. Run with:
//!
//! ```bash
//! cargo test -p tabload-ingest --test postgres_tests -- --ignored --nocapture
//! ```

mod common;

use common::{init_test_tracing, write_fixtures, write_source, TestPostgres};
use serial_test::serial;
use std::collections::BTreeSet;
use tabload_ingest::model::{Product, Supplier, TransactionItem};
use tabload_ingest::upsert::UpsertEngine;
use tabload_ingest::{
    CsvSource, EntityType, LoadError, LoadStatus, Orchestrator, RowBatch, Store, StoreError,
};

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_full_load_and_rerun() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path()).unwrap();
    let source = CsvSource::new(dir.path());
    let orchestrator = Orchestrator::new(pg.store(), &source);

    let first = orchestrator.run().await.expect("first run failed");
    assert_eq!(first.rows(EntityType::TransactionItems), 4);

    let expected = [
        ("customers", 3),
        ("suppliers", 2),
        ("products", 3),
        ("payment_methods", 2),
        ("transactions", 3),
        ("transaction_items", 4),
    ];
    for (table, count) in expected {
        assert_eq!(pg.count(table).await.unwrap(), count, "{}", table);
    }

    let suppliers_before: Vec<(String, i64)> =
        sqlx::query_as("SELECT name, id FROM suppliers ORDER BY name")
            .fetch_all(pg.store().pool())
            .await
            .unwrap();

    let second = orchestrator.run().await.expect("second run failed");
    assert_eq!(first, second);
    for (table, count) in expected {
        assert_eq!(pg.count(table).await.unwrap(), count, "{}", table);
    }

    let suppliers_after: Vec<(String, i64)> =
        sqlx::query_as("SELECT name, id FROM suppliers ORDER BY name")
            .fetch_all(pg.store().pool())
            .await
            .unwrap();
    assert_eq!(suppliers_before, suppliers_after);

    let audit = pg.store().recent_audit(100).await.unwrap();
    assert_eq!(audit.len(), 12);
    assert!(audit.iter().all(|e| e.load_status() == Some(LoadStatus::Success)));
    assert_eq!(audit[0].table_name, "transaction_items");
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_missing_customer_is_rejected_before_write() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path()).unwrap();
    write_source(
        dir.path(),
        "transactions.csv",
        "id,customer_id,product_id,quantity,timestamp,payment_method\n\
         500,1,1,1,2024-04-01T08:00:00,PayPal\n\
         501,99,2,1,2024-04-01T09:00:00,PayPal\n",
    )
    .unwrap();

    let err = Orchestrator::new(pg.store(), &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap_err();

    match err {
        LoadError::ReferentialIntegrity { entity, missing, .. } => {
            assert_eq!(entity, EntityType::Transactions);
            assert_eq!(missing, BTreeSet::from([99]));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pg.count("transactions").await.unwrap(), 0);
    assert_eq!(pg.count("customers").await.unwrap(), 3);

    let latest = pg.store().recent_audit(1).await.unwrap();
    assert_eq!(latest[0].table_name, "transactions");
    assert_eq!(latest[0].status, "failed");
    assert_eq!(latest[0].row_count, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_upsert_overwrites_and_rolls_back() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = pg.store();
    let engine = UpsertEngine::new(store);

    engine
        .upsert(&RowBatch::from_rows(&[Supplier { name: "Acme".into() }]), &["name"])
        .await
        .unwrap();
    let supplier_id: i64 = sqlx::query_scalar("SELECT id FROM suppliers WHERE name = 'Acme'")
        .fetch_one(store.pool())
        .await
        .unwrap();

    let product = |name: &str, price: f64, supplier_id: Option<i64>| Product {
        id: 5,
        name: name.into(),
        category: None,
        price,
        supplier_id,
    };
    engine
        .upsert(&RowBatch::from_rows(&[product("A", 10.0, Some(supplier_id))]), &["id"])
        .await
        .unwrap();
    engine
        .upsert(&RowBatch::from_rows(&[product("B", 12.0, Some(supplier_id))]), &["id"])
        .await
        .unwrap();

    let stored: (i64, String, f64) = sqlx::query_as("SELECT id, name, price FROM products")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(stored, (5, "B".to_string(), 12.0));

    // Three rows across two INSERT chunks; the NULL supplier in the last one
    // must roll back the whole batch
    let batch = RowBatch::from_rows(&[
        Product {
            id: 6,
            ..product("C", 1.0, Some(supplier_id))
        },
        Product {
            id: 7,
            ..product("D", 2.0, Some(supplier_id))
        },
        Product {
            id: 8,
            ..product("E", 3.0, None)
        },
    ]);
    let err = engine.upsert(&batch, &["id"]).await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint { table: "products", .. }));
    assert_eq!(pg.count("products").await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_composite_key_and_reset() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path()).unwrap();
    Orchestrator::new(pg.store(), &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap();

    let items = RowBatch::from_rows(&[
        TransactionItem {
            transaction_id: 100,
            product_id: 1,
            quantity: 7,
        },
        TransactionItem {
            transaction_id: 100,
            product_id: 1,
            quantity: 9,
        },
    ]);
    let affected = UpsertEngine::new(pg.store())
        .upsert(&items, &["transaction_id", "product_id"])
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let quantity: i64 = sqlx::query_scalar(
        "SELECT quantity FROM transaction_items WHERE transaction_id = 100 AND product_id = 1",
    )
    .fetch_one(pg.store().pool())
    .await
    .unwrap();
    assert_eq!(quantity, 9);
    assert_eq!(pg.count("transaction_items").await.unwrap(), 4);

    pg.store().reset_schema().await.unwrap();
    assert_eq!(pg.count("customers").await.unwrap(), 0);
    assert_eq!(pg.count("load_audit").await.unwrap(), 0);
}
