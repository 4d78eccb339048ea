//! Database handle tying schema, tables, cache, and the backing store
//! together; owns the committed state and hands out transactions that
//! borrow from it.

use crate::cache::Cache;
use crate::error::{LovefieldError, Result};
use crate::schema::Schema;
use crate::store::BackingStore;
use crate::table::Table;
use crate::tx::Transaction;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Database-open options (ambient configuration: typed, not a file
/// format, since the engine is embedded rather than a standalone process).
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Whether `open` pushes every table's rows into the read cache up
    /// front, or leaves the cache cold and lets the first transaction to
    /// touch a table warm it on miss. Tables themselves are always loaded
    /// from the backing store at open time either way.
    pub eager_warm_up: bool,
    /// A hash join's build side is only chosen as the hash side when its
    /// estimated row count is at or below this threshold; above it the
    /// planner falls back to a nested-loop join to bound join memory use.
    pub hash_join_memory_threshold: usize,
    /// Maximum number of journal entries a single commit batches into one
    /// call to the backing store's `write`.
    pub journal_batch_flush_size: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            eager_warm_up: true,
            hash_join_memory_threshold: 10_000,
            journal_batch_flush_size: 1_000,
        }
    }
}

pub struct Database {
    schema: Arc<Schema>,
    tables: HashMap<String, RwLock<Table>>,
    cache: Cache,
    store: Arc<dyn BackingStore>,
    options: DatabaseOptions,
}

impl Database {
    /// Opens a database for `schema` against `store`, loading every table's
    /// rows from the store's `scan` per startup contract. `options.eager_warm_up`
    /// only controls whether the read cache is pre-populated at open time;
    /// a cold cache is warmed lazily by the first transaction that touches
    /// a given table.
    #[tracing::instrument(skip_all, fields(schema = %schema.name))]
    pub async fn open(schema: Schema, store: Arc<dyn BackingStore>, options: DatabaseOptions) -> Result<Self> {
        store.open().await.map_err(LovefieldError::Store)?;
        let schema = Arc::new(schema);
        let cache = Cache::new();
        let mut tables = HashMap::new();
        for name in schema.table_names() {
            let table_schema = schema.table(name).expect("table_names only yields tables present in schema");
            let mut table = Table::new(table_schema);
            let rows = store.scan(name).await.map_err(LovefieldError::Store)?;
            let mut high_water_mark = 0;
            for row in rows.clone() {
                high_water_mark = high_water_mark.max(row.id() + 1);
                table.insert(row)?;
            }
            table.restore_row_id_high_water_mark(high_water_mark);
            if options.eager_warm_up {
                cache.warm(name, rows);
            }
            tables.insert(name.to_owned(), RwLock::new(table));
        }
        Ok(Database {
            schema,
            tables,
            cache,
            store,
            options,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Opens a transaction scoped to `tables`: a transaction declares the
    /// tables it touches up front, and the runtime acquires their locks, in
    /// a fixed order, before any operation runs.
    pub fn transaction(&self, tables: impl IntoIterator<Item = impl Into<String>>) -> Result<Transaction<'_>> {
        Transaction::new(
            self.schema.clone(),
            &self.tables,
            &self.cache,
            self.store.as_ref(),
            tables.into_iter().map(Into::into).collect(),
            self.options.hash_join_memory_threshold,
            self.options.journal_batch_flush_size,
        )
    }

    /// Opens a transaction scoped to every table in the schema; convenient
    /// for ad hoc queries that don't want to enumerate a scope by hand.
    pub fn transaction_all_tables(&self) -> Result<Transaction<'_>> {
        self.transaction(self.schema.table_names().map(str::to_owned))
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await.map_err(LovefieldError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::store::InMemoryStore;
    use crate::value::{Value, ValueType};
    use indexmap::IndexMap;

    fn users_schema() -> Schema {
        let mut schema = Schema::new("app", 1);
        schema.add_table(TableSchema {
            name: "users".into(),
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    ty: ValueType::Integer,
                    nullable: false,
                    alias: None,
                },
                ColumnSchema {
                    name: "name".into(),
                    ty: ValueType::String,
                    nullable: false,
                    alias: None,
                },
            ],
            primary_key: Some(vec![0]),
            secondary_indices: vec![],
            foreign_keys: vec![],
        });
        schema
    }

    #[tokio::test]
    async fn open_insert_commit_and_query_round_trip() {
        let db = Database::open(users_schema(), Arc::new(InMemoryStore::new()), DatabaseOptions::default())
            .await
            .unwrap();
        let mut tx = db.transaction(["users"]).unwrap();
        let mut payload = IndexMap::new();
        payload.insert("id".to_string(), Value::Integer(1));
        payload.insert("name".to_string(), Value::String("ada".into()));
        tx.insert("users", vec![crate::schema::Row::new(0, payload)], false).unwrap();
        tx.commit().await.unwrap();

        let mut tx2 = db.transaction(["users"]).unwrap();
        let plan = crate::plan::physical::PhysicalPlan::FullTableScan { table: "users".into() };
        let rel = tx2.query(&plan).unwrap();
        assert_eq!(rel.len(), 1);
        assert_eq!(rel.entries()[0].get("name"), Some(&Value::String("ada".into())));
    }

    /// A cold cache (`eager_warm_up: false`) must not leave a table looking
    /// permanently empty: rows are always loaded from the store at `open`,
    /// and a read against a cold table warms the cache lazily.
    #[tokio::test]
    async fn eager_warm_up_false_still_serves_rows_loaded_from_the_store() {
        let store = Arc::new(InMemoryStore::new());

        let db1 = Database::open(users_schema(), store.clone(), DatabaseOptions::default()).await.unwrap();
        let mut tx = db1.transaction(["users"]).unwrap();
        let mut payload = IndexMap::new();
        payload.insert("id".to_string(), Value::Integer(1));
        payload.insert("name".to_string(), Value::String("ada".into()));
        tx.insert("users", vec![crate::schema::Row::new(0, payload)], false).unwrap();
        tx.commit().await.unwrap();

        let cold_options = DatabaseOptions {
            eager_warm_up: false,
            ..DatabaseOptions::default()
        };
        let db2 = Database::open(users_schema(), store, cold_options).await.unwrap();
        let mut tx2 = db2.transaction(["users"]).unwrap();
        let plan = crate::plan::physical::PhysicalPlan::FullTableScan { table: "users".into() };
        let rel = tx2.query(&plan).unwrap();
        assert_eq!(rel.len(), 1, "rows must load from the store even when eager_warm_up is false");
        assert_eq!(rel.entries()[0].get("name"), Some(&Value::String("ada".into())));
    }
}
