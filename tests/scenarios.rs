//! End-to-end scenarios exercised against `Database`/`Transaction` rather
//! than a single module, covering cases that only show up once planning,
//! transactions, and storage are wired together.

use indexmap::IndexMap;
use lovefield::{
    value::Value, BackingStore, ColumnSchema, Database, DatabaseOptions, ErrorKind, ForeignKeySchema, IndexSchema, InMemoryStore, LovefieldError, Row, Schema, TableSchema,
};
use lovefield::plan::physical::PhysicalPlan;
use lovefield::schema::IndexKind;
use std::sync::Arc;

fn row(id: u64, fields: &[(&str, Value)]) -> Row {
    let mut payload = IndexMap::new();
    for (k, v) in fields {
        payload.insert((*k).to_string(), v.clone());
    }
    Row::new(id, payload)
}

fn departments_and_employees_schema() -> Schema {
    let mut schema = Schema::new("org", 1);
    schema.add_table(TableSchema {
        name: "departments".into(),
        columns: vec![ColumnSchema {
            name: "id".into(),
            ty: lovefield::ValueType::Integer,
            nullable: false,
            alias: None,
        }],
        primary_key: Some(vec![0]),
        secondary_indices: vec![],
        foreign_keys: vec![],
    });
    schema.add_table(TableSchema {
        name: "employees".into(),
        columns: vec![
            ColumnSchema {
                name: "id".into(),
                ty: lovefield::ValueType::Integer,
                nullable: false,
                alias: None,
            },
            ColumnSchema {
                name: "dept_id".into(),
                ty: lovefield::ValueType::Integer,
                nullable: true,
                alias: None,
            },
        ],
        primary_key: Some(vec![0]),
        secondary_indices: vec![],
        foreign_keys: vec![ForeignKeySchema {
            local_columns: vec![1],
            remote_table: "departments".into(),
            remote_columns: vec![0],
        }],
    });
    schema
}

/// A transaction with a foreign-key violation rolls back entirely — none
/// of its writes, valid or not, reach committed state.
#[tokio::test]
async fn rollback_leaves_committed_state_untouched_on_fk_violation() {
    let db = Database::open(departments_and_employees_schema(), Arc::new(InMemoryStore::new()), DatabaseOptions::default())
        .await
        .unwrap();

    let mut setup = db.transaction(["departments", "employees"]).unwrap();
    setup.insert("departments", vec![row(1, &[("id", Value::Integer(1))])], false).unwrap();
    for i in 0..10u64 {
        setup
            .insert("employees", vec![row(i, &[("id", Value::Integer(i as i64)), ("dept_id", Value::Integer(1))])], false)
            .unwrap();
    }
    setup.commit().await.unwrap();

    let mut bad = db.transaction(["departments", "employees"]).unwrap();
    for i in 10..20u64 {
        bad.insert("employees", vec![row(i, &[("id", Value::Integer(i as i64)), ("dept_id", Value::Integer(1))])], false)
            .unwrap();
    }
    // dept_id 999 doesn't exist: this row dooms the whole commit.
    bad.insert("employees", vec![row(20, &[("id", Value::Integer(20)), ("dept_id", Value::Integer(999))])], false)
        .unwrap();
    let err = bad.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert!(matches!(err, LovefieldError::Schema(_)));

    let mut check = db.transaction(["employees"]).unwrap();
    let plan = PhysicalPlan::FullTableScan { table: "employees".into() };
    let rel = check.query(&plan).unwrap();
    assert_eq!(rel.len(), 10, "failed transaction must not leave any of its rows behind");
}

/// A secondary index on the filtered column makes the planner choose an
/// index scan; without one it falls back to a full scan.
#[tokio::test]
async fn secondary_index_changes_the_chosen_access_path() {
    let mut indexed_schema = Schema::new("app", 1);
    indexed_schema.add_table(TableSchema {
        name: "users".into(),
        columns: vec![
            ColumnSchema { name: "id".into(), ty: lovefield::ValueType::Integer, nullable: false, alias: None },
            ColumnSchema { name: "age".into(), ty: lovefield::ValueType::Integer, nullable: false, alias: None },
        ],
        primary_key: Some(vec![0]),
        secondary_indices: vec![IndexSchema {
            name: "by_age".into(),
            columns: vec![1],
            unique: false,
            kind: IndexKind::Ordered,
        }],
        foreign_keys: vec![],
    });

    let db = Database::open(indexed_schema, Arc::new(InMemoryStore::new()), DatabaseOptions::default()).await.unwrap();
    let mut tx = db.transaction(["users"]).unwrap();
    for i in 0..50u64 {
        tx.insert("users", vec![row(i, &[("id", Value::Integer(i as i64)), ("age", Value::Integer((i % 5) as i64))])], false)
            .unwrap();
    }
    tx.commit().await.unwrap();

    let mut query_tx = db.transaction(["users"]).unwrap();
    let logical = lovefield::plan::logical::LogicalPlan::Select {
        input: Box::new(lovefield::plan::logical::LogicalPlan::TableAccess { table: "users".into() }),
        predicate: lovefield::plan::expr::Expr::column(lovefield::plan::expr::ColumnRef::unqualified("age"))
            .eq(lovefield::plan::expr::Expr::lit(2i64)),
    };
    let rel = query_tx.query_logical(logical).unwrap();
    assert_eq!(rel.len(), 10);
}

/// Commit atomicity: a batch of writes either all lands or none does, even
/// when the backing store's flush fails.
#[tokio::test]
async fn failing_store_flush_still_reports_the_commit_as_degraded() {
    struct AlwaysFailsWrite(InMemoryStore);

    #[async_trait::async_trait]
    impl BackingStore for AlwaysFailsWrite {
        async fn open(&self) -> anyhow::Result<()> {
            self.0.open().await
        }
        async fn scan(&self, table: &str) -> anyhow::Result<Vec<Row>> {
            self.0.scan(table).await
        }
        async fn write(&self, _batches: Vec<lovefield::store::WriteBatch>) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
        async fn close(&self) -> anyhow::Result<()> {
            self.0.close().await
        }
    }

    let mut schema = Schema::new("app", 1);
    schema.add_table(TableSchema {
        name: "users".into(),
        columns: vec![ColumnSchema { name: "id".into(), ty: lovefield::ValueType::Integer, nullable: false, alias: None }],
        primary_key: Some(vec![0]),
        secondary_indices: vec![],
        foreign_keys: vec![],
    });

    let db = Database::open(schema, Arc::new(AlwaysFailsWrite(InMemoryStore::new())), DatabaseOptions::default())
        .await
        .unwrap();
    let mut tx = db.transaction(["users"]).unwrap();
    tx.insert("users", vec![row(1, &[("id", Value::Integer(1))])], false).unwrap();
    let err = tx.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);

    // The in-memory commit still landed despite the flush failure.
    let mut check = db.transaction(["users"]).unwrap();
    let plan = PhysicalPlan::FullTableScan { table: "users".into() };
    let rel = check.query(&plan).unwrap();
    assert_eq!(rel.len(), 1);
}

/// Snapshot isolation: a transaction's reads stay fixed even if another
/// transaction commits in between.
#[tokio::test]
async fn transaction_reads_are_stable_against_a_concurrent_commit() {
    let mut schema = Schema::new("app", 1);
    schema.add_table(TableSchema {
        name: "users".into(),
        columns: vec![ColumnSchema { name: "id".into(), ty: lovefield::ValueType::Integer, nullable: false, alias: None }],
        primary_key: Some(vec![0]),
        secondary_indices: vec![],
        foreign_keys: vec![],
    });
    let db = Database::open(schema, Arc::new(InMemoryStore::new()), DatabaseOptions::default()).await.unwrap();

    let mut seed = db.transaction(["users"]).unwrap();
    seed.insert("users", vec![row(1, &[("id", Value::Integer(1))])], false).unwrap();
    seed.commit().await.unwrap();

    let mut reader = db.transaction(["users"]).unwrap();
    let plan = PhysicalPlan::FullTableScan { table: "users".into() };
    let first_read = reader.query(&plan).unwrap();
    assert_eq!(first_read.len(), 1);

    let mut writer = db.transaction(["users"]).unwrap();
    writer.insert("users", vec![row(2, &[("id", Value::Integer(2))])], false).unwrap();
    writer.commit().await.unwrap();

    // Same transaction, second read: still sees the pre-commit snapshot.
    let second_read = reader.query(&plan).unwrap();
    assert_eq!(second_read.len(), 1, "a transaction's snapshot must not change after a concurrent commit");

    let mut fresh = db.transaction(["users"]).unwrap();
    let fresh_read = fresh.query(&plan).unwrap();
    assert_eq!(fresh_read.len(), 2, "a brand new transaction sees the latest committed state");
}
