//! End-to-end pipeline tests against the in-memory store
//!
//! Source files are written to a temporary directory and read through
//! `CsvSource`, exactly as the `tabload load --dry-run` command does.

mod common;

use common::{init_test_tracing, write_fixtures, write_source, CUSTOMERS_CSV, PRODUCTS_CSV};
use std::collections::BTreeSet;
use tabload_ingest::resolver::{NaturalKeyRef, NaturalKeyResolver};
use tabload_ingest::{
    CsvSource, EntityType, LoadError, LoadPlan, MemoryStore, Orchestrator, StepOutcome, Value,
};
use tempfile::TempDir;

fn fixture_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path()).unwrap();
    dir
}

fn counts(store: &MemoryStore) -> Vec<(EntityType, usize)> {
    EntityType::ALL
        .into_iter()
        .map(|entity| (entity, store.row_count(entity)))
        .collect()
}

#[tokio::test]
async fn test_full_load_from_csv() {
    init_test_tracing();
    let dir = fixture_dir();
    let store = MemoryStore::new();
    let source = CsvSource::new(dir.path());

    let report = Orchestrator::new(&store, &source).run().await.unwrap();

    assert_eq!(
        counts(&store),
        vec![
            (EntityType::Customers, 3),
            (EntityType::Suppliers, 2),
            (EntityType::Products, 3),
            (EntityType::PaymentMethods, 2),
            (EntityType::Transactions, 3),
            (EntityType::TransactionItems, 4),
        ]
    );
    assert_eq!(report.total_rows(), 17);
    assert!(report.skipped().is_empty());

    let audit = store.audit_entries();
    let tables: Vec<&str> = audit.iter().map(|e| e.table_name.as_str()).collect();
    assert_eq!(
        tables,
        vec![
            "customers",
            "suppliers",
            "products",
            "payment_methods",
            "transactions",
            "transaction_items"
        ]
    );
}

#[tokio::test]
async fn test_optional_fields_load_as_absent() {
    let dir = fixture_dir();
    let store = MemoryStore::new();
    Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap();

    let linus = store
        .rows(EntityType::Customers)
        .into_iter()
        .find(|row| row["id"] == Value::Int(3))
        .unwrap();
    assert_eq!(linus["registration_date"], Value::Absent);
    assert_eq!(linus["country"], Value::Text("Finland".into()));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = fixture_dir();
    let store = MemoryStore::new();
    let source = CsvSource::new(dir.path());
    let orchestrator = Orchestrator::new(&store, &source);

    let first = orchestrator.run().await.unwrap();
    let counts_after_first = counts(&store);
    let suppliers_after_first = store.rows(EntityType::Suppliers);

    let second = orchestrator.run().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(counts(&store), counts_after_first);
    assert_eq!(store.rows(EntityType::Suppliers), suppliers_after_first);
    assert_eq!(store.audit_entries().len(), 12);
}

#[tokio::test]
async fn test_absent_transactions_file_skips_dependent_steps() {
    let dir = tempfile::tempdir().unwrap();
    write_source(dir.path(), "customers.csv", CUSTOMERS_CSV).unwrap();
    write_source(dir.path(), "products.csv", PRODUCTS_CSV).unwrap();
    let store = MemoryStore::new();

    let report = Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome(EntityType::Products), Some(StepOutcome::Loaded { rows: 3 }));
    assert_eq!(
        report.skipped(),
        vec![
            EntityType::PaymentMethods,
            EntityType::Transactions,
            EntityType::TransactionItems
        ]
    );
    assert_eq!(store.audit_entries().len(), 3);
}

#[tokio::test]
async fn test_unknown_customer_stops_run_before_items() {
    let dir = fixture_dir();
    write_source(
        dir.path(),
        "transactions.csv",
        "id,customer_id,product_id,quantity,timestamp,payment_method\n\
         200,1,1,1,2024-02-01T08:00:00,PayPal\n\
         201,2,2,1,2024-02-01T09:00:00,PayPal\n\
         202,99,3,1,2024-02-01T10:00:00,PayPal\n",
    )
    .unwrap();
    let store = MemoryStore::new();

    let err = Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap_err();

    match &err {
        LoadError::ReferentialIntegrity { entity, missing, .. } => {
            assert_eq!(*entity, EntityType::Transactions);
            assert_eq!(missing, &BTreeSet::from([99]));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.row_count(EntityType::Transactions), 0);
    assert_eq!(store.row_count(EntityType::TransactionItems), 0);

    // Earlier steps stay committed
    assert_eq!(store.row_count(EntityType::Customers), 3);
    assert_eq!(store.row_count(EntityType::PaymentMethods), 1);

    let last = store.audit_entries().pop().unwrap();
    assert_eq!(last.table_name, "transactions");
    assert_eq!(last.status, "failed");
    assert_eq!(last.row_count, 3);
}

#[tokio::test]
async fn test_audit_has_one_entry_per_attempted_step() {
    let dir = tempfile::tempdir().unwrap();
    write_source(dir.path(), "products.csv", PRODUCTS_CSV).unwrap();
    write_source(
        dir.path(),
        "transactions.csv",
        "id,customer_id,product_id,quantity,timestamp,payment_method\n\
         300,42,1,1,2024-03-01T08:00:00,PayPal\n\
         301,43,2,2,2024-03-01T09:00:00,PayPal\n",
    )
    .unwrap();

    // Parents loaded by an earlier run
    let store = MemoryStore::new();
    let resolver = NaturalKeyResolver::new(&store);
    resolver
        .register(
            &NaturalKeyRef::SUPPLIER,
            &["Acme Corp".to_string(), "Globex".to_string()],
        )
        .await
        .unwrap();
    resolver
        .register(&NaturalKeyRef::PAYMENT_METHOD, &["PayPal".to_string()])
        .await
        .unwrap();

    let plan = LoadPlan::for_entities(&[EntityType::Products, EntityType::Transactions]).unwrap();
    let err = Orchestrator::with_plan(&store, &CsvSource::new(dir.path()), plan)
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.entity_type(), EntityType::Transactions);

    let audit: Vec<(String, i64, String)> = store
        .audit_entries()
        .into_iter()
        .map(|e| (e.table_name, e.row_count, e.status))
        .collect();
    assert_eq!(
        audit,
        vec![
            ("products".to_string(), 3, "success".to_string()),
            ("transactions".to_string(), 2, "failed".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_product_without_supplier_fails_upsert() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "products.csv",
        "id,name,category,price,supplier\n\
         1,Lamp,Home,19.99,Acme Corp\n\
         2,Desk,Office,120.00,\n",
    )
    .unwrap();
    let store = MemoryStore::new();

    let err = Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Upsert { entity: EntityType::Products, .. }));
    assert_eq!(store.row_count(EntityType::Products), 0);
    assert_eq!(store.row_count(EntityType::Suppliers), 1);
}

#[tokio::test]
async fn test_malformed_price_reports_row_number() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "products.csv",
        "id,name,category,price,supplier\n\
         1,Lamp,Home,19.99,Acme Corp\n\
         2,Desk,Office,cheap,Globex\n",
    )
    .unwrap();
    let store = MemoryStore::new();

    let err = Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap_err();

    match err {
        LoadError::InvalidRecord { entity, row, .. } => {
            assert_eq!(entity, EntityType::Products);
            assert_eq!(row, 2);
        },
        other => panic!("unexpected error: {other}"),
    }
    let last = store.audit_entries().pop().unwrap();
    assert_eq!((last.table_name.as_str(), last.row_count), ("products", 0));
}

#[tokio::test]
async fn test_padded_natural_keys_resolve_to_registered_rows() {
    let dir = fixture_dir();
    write_source(
        dir.path(),
        "products.csv",
        "id,name,category,price,supplier\n\
         1,Lamp,Home,19.99, Acme Corp\n\
         2,Desk,Office,120.00,Acme Corp  \n\
         3,Chair,Office,45.50,   \n",
    )
    .unwrap();
    write_source(
        dir.path(),
        "transactions.csv",
        "id,customer_id,product_id,quantity,timestamp,payment_method\n\
         100,1,1,2,2024-01-05T10:00:00,  PayPal\n\
         101,2,2,1,2024-01-06T12:30:00,PayPal \n",
    )
    .unwrap();
    let store = MemoryStore::new();

    // The blank supplier leaves Chair without one, which the schema rejects
    let err = Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Upsert { entity: EntityType::Products, .. }));

    let suppliers = store.rows(EntityType::Suppliers);
    assert_eq!(suppliers.len(), 1);
    assert_eq!(suppliers[0]["name"], Value::Text("Acme Corp".into()));

    write_source(
        dir.path(),
        "products.csv",
        "id,name,category,price,supplier\n\
         1,Lamp,Home,19.99, Acme Corp\n\
         2,Desk,Office,120.00,Acme Corp  \n",
    )
    .unwrap();
    let report = Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap();

    assert_eq!(report.rows(EntityType::Suppliers), 1);
    assert_eq!(report.rows(EntityType::Products), 2);
    assert_eq!(store.row_count(EntityType::Suppliers), 1);
    let supplier_id = store.rows(EntityType::Suppliers)[0]["id"].clone();
    assert!(store
        .rows(EntityType::Products)
        .iter()
        .all(|row| row["supplier_id"] == supplier_id));

    let methods = store.rows(EntityType::PaymentMethods);
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0]["method"], Value::Text("PayPal".into()));
    assert_eq!(report.rows(EntityType::Transactions), 2);
}

#[tokio::test]
async fn test_header_only_customers_file_is_audited_as_empty_success() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "customers.csv",
        "id,name,email,registration_date,country\n",
    )
    .unwrap();
    let store = MemoryStore::new();

    let report = Orchestrator::with_plan(
        &store,
        &CsvSource::new(dir.path()),
        LoadPlan::for_entities(&[EntityType::Customers]).unwrap(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.outcome(EntityType::Customers), Some(StepOutcome::Loaded { rows: 0 }));
    assert_eq!(store.row_count(EntityType::Customers), 0);

    let audit = store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(
        (audit[0].table_name.as_str(), audit[0].row_count, audit[0].status.as_str()),
        ("customers", 0, "success")
    );
}

#[tokio::test]
async fn test_header_only_transactions_file_loads_nothing_without_parents() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "transactions.csv",
        "id,customer_id,product_id,quantity,timestamp,payment_method\n",
    )
    .unwrap();

    // No customers or products exist, so any guard read with ids would fail
    let store = MemoryStore::new();
    let report = Orchestrator::new(&store, &CsvSource::new(dir.path()))
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.skipped(),
        vec![EntityType::Customers, EntityType::Suppliers, EntityType::Products]
    );
    for entity in [
        EntityType::PaymentMethods,
        EntityType::Transactions,
        EntityType::TransactionItems,
    ] {
        assert_eq!(report.outcome(entity), Some(StepOutcome::Loaded { rows: 0 }), "{}", entity);
        assert_eq!(store.row_count(entity), 0);
    }

    let audit: Vec<(String, i64, String)> = store
        .audit_entries()
        .into_iter()
        .map(|e| (e.table_name, e.row_count, e.status))
        .collect();
    assert_eq!(
        audit,
        vec![
            ("payment_methods".to_string(), 0, "success".to_string()),
            ("transactions".to_string(), 0, "success".to_string()),
            ("transaction_items".to_string(), 0, "success".to_string()),
        ]
    );
}
