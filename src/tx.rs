//! Transaction runtime and its locking model: acquire the declared scope's
//! locks up front, in a fixed order, then validate/apply/flush/release.

use crate::cache::Cache;
use crate::error::{BuilderError, LovefieldError, Result, SchemaError, TxError};
use crate::journal::{Journal, JournalOp};
use crate::key::Key;
use crate::plan::logical::Assignment;
use crate::plan::physical::PhysicalPlan;
use crate::schema::{Row, RowId, Schema, TableSchema};
use crate::store::{BackingStore, WriteBatch, WriteOp};
use crate::table::{Table, TableSnapshot};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Checks `payload` against `schema`'s declared columns: a missing or
/// `Null` value on a non-nullable column is a `NotNullable` violation; a
/// present, non-null value whose runtime type doesn't match the column's
/// declared type is a `Type` mismatch.
fn validate_row(schema: &TableSchema, payload: &IndexMap<String, crate::value::Value>) -> Result<()> {
    for col in &schema.columns {
        let value = payload.get(&col.name).unwrap_or(&crate::value::Value::Null);
        if value.is_null() {
            if !col.nullable {
                return Err(LovefieldError::Schema(SchemaError::NotNullable(col.name.clone())));
            }
            continue;
        }
        if let Some(found) = value.value_type() {
            if found != col.ty {
                return Err(LovefieldError::Type {
                    expected: format!("{:?}", col.ty),
                    found: format!("{:?}", found),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Created,
    AcquiringLocks,
    Executing,
    Committing,
    Finished,
    RollingBack,
    Failed,
}

/// A transaction-scoped, committed-plus-journal overlay view of one table,
/// satisfying `TableSnapshot` so `exec::execute` can read through it without
/// knowing about journals at all: reads inside a transaction see their own
/// writes.
struct OverlayView {
    schema: Arc<crate::schema::TableSchema>,
    committed: Vec<Row>,
}

impl TableSnapshot for OverlayView {
    fn schema(&self) -> &Arc<crate::schema::TableSchema> {
        &self.schema
    }
    fn scan(&self) -> Vec<Row> {
        self.committed.clone()
    }
    fn get(&self, row_id: RowId) -> Option<Row> {
        self.committed.iter().find(|r| r.id() == row_id).cloned()
    }
    fn row_count(&self) -> usize {
        self.committed.len()
    }
    fn index_lookup(&self, columns: &[usize], range: Option<&crate::key::KeyRange>) -> Vec<RowId> {
        self.committed
            .iter()
            .filter(|r| {
                let key = Key::encode(
                    columns,
                    &self
                        .schema
                        .columns
                        .iter()
                        .map(|c| r.get(&c.name).cloned().unwrap_or(crate::value::Value::Null))
                        .collect::<Vec<_>>(),
                );
                range.is_none_or(|rg| rg.matches(&key))
            })
            .map(|r| r.id())
            .collect()
    }
    fn primary_key_lookup(&self, key: &Key) -> Option<RowId> {
        self.index_lookup(
            &self.schema.primary_key.clone().unwrap_or_default(),
            Some(&crate::key::KeyRange::only(key.clone())),
        )
        .into_iter()
        .next()
    }
}

/// A single in-flight transaction: its journal, its declared table scope,
/// and the lock guards held for that scope.
pub struct Transaction<'db> {
    schema: Arc<Schema>,
    tables: &'db HashMap<String, RwLock<Table>>,
    cache: &'db Cache,
    store: &'db dyn BackingStore,
    scope: Vec<String>,
    journal: Journal,
    state: TxState,
    id: u64,
    hash_join_memory_threshold: usize,
    journal_batch_flush_size: usize,
    /// Captured once, on this transaction's first read, and reused for the
    /// rest of its lifetime: the "snapshot" half of snapshot isolation — a
    /// transaction's reads are stable against concurrent commits from other
    /// transactions. The journal overlay on top of it is always re-applied
    /// fresh, so the transaction still sees its own writes immediately.
    committed_snapshot: Option<HashMap<String, Vec<Row>>>,
}

static TX_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl<'db> Transaction<'db> {
    pub(crate) fn new(
        schema: Arc<Schema>,
        tables: &'db HashMap<String, RwLock<Table>>,
        cache: &'db Cache,
        store: &'db dyn BackingStore,
        mut scope: Vec<String>,
        hash_join_memory_threshold: usize,
        journal_batch_flush_size: usize,
    ) -> Result<Self> {
        // Lock ordering by table name, fixed across all transactions, is
        // what prevents deadlock between concurrently-opened transactions
        // whose scopes overlap.
        scope.sort();
        scope.dedup();
        for table in &scope {
            if !tables.contains_key(table) {
                return Err(LovefieldError::Tx(TxError::OutOfScope(table.clone())));
            }
        }
        Ok(Transaction {
            schema,
            tables,
            cache,
            store,
            scope,
            journal: Journal::new(),
            state: TxState::Created,
            id: TX_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            committed_snapshot: None,
            hash_join_memory_threshold,
            journal_batch_flush_size,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_in_scope(&self, table: &str) -> Result<()> {
        if self.scope.iter().any(|t| t == table) {
            Ok(())
        } else {
            Err(LovefieldError::Tx(TxError::OutOfScope(table.to_owned())))
        }
    }

    fn require_active(&self) -> Result<()> {
        match self.state {
            TxState::Created | TxState::AcquiringLocks | TxState::Executing => Ok(()),
            _ => Err(LovefieldError::Tx(TxError::AlreadyFinished)),
        }
    }

    /// The journal-overlaid view of `table`, against the frozen committed
    /// snapshot (captured on first access across the whole transaction).
    /// The committed half is served from the cache when it's already
    /// warm; a cold cache is filled from the table's own row store (which
    /// is always fully loaded, regardless of `eager_warm_up`) and left
    /// warm for the next reader.
    fn overlaid_rows(&mut self, table: &str) -> Vec<Row> {
        if self.committed_snapshot.is_none() {
            self.committed_snapshot = Some(HashMap::new());
        }
        if !self.committed_snapshot.as_ref().unwrap().contains_key(table) {
            let rows = if self.cache.row_count(table) > 0 {
                self.cache.scan(table)
            } else {
                let guard = self.tables[table].read();
                let rows: Vec<Row> = guard.scan().cloned().collect();
                drop(guard);
                if !rows.is_empty() {
                    self.cache.warm(table, rows.clone());
                }
                rows
            };
            self.committed_snapshot.as_mut().unwrap().insert(table.to_owned(), rows);
        }
        let base = self.committed_snapshot.as_ref().unwrap()[table].clone();
        self.journal.overlay_scan(table, base)
    }

    /// A read-only, journal-overlaid snapshot of every table in scope,
    /// suitable for `exec::execute`. The committed half is captured once,
    /// on this transaction's first call, and held fixed thereafter.
    #[tracing::instrument(skip_all)]
    pub fn snapshot(&mut self) -> Result<HashMap<String, Box<dyn TableSnapshot>>> {
        self.require_active()?;
        self.state = TxState::AcquiringLocks;
        let mut out: HashMap<String, Box<dyn TableSnapshot>> = HashMap::new();
        for table in self.scope.clone() {
            let schema = self.tables[&table].read().schema.clone();
            let committed = self.overlaid_rows(&table);
            out.insert(table, Box::new(OverlayView { schema, committed }));
        }
        self.state = TxState::Executing;
        Ok(out)
    }

    /// Executes a read-only query plan against this transaction's snapshot.
    pub fn query(&mut self, plan: &PhysicalPlan) -> Result<crate::relation::Relation> {
        let snapshot = self.snapshot()?;
        let refs: HashMap<String, &dyn TableSnapshot> = snapshot.iter().map(|(k, v)| (k.clone(), v.as_ref())).collect();
        crate::exec::execute(plan, &refs)
    }

    /// Rewrites and physically plans `logical` against this transaction's
    /// committed table state (cost estimates come from real indices, not
    /// the journal overlay, which is an acceptable approximation since
    /// planning only needs a heuristic, not perfect accuracy), then
    /// executes it through the overlay-aware `query`.
    pub fn query_logical(&mut self, logical: crate::plan::logical::LogicalPlan) -> Result<crate::relation::Relation> {
        self.require_active()?;
        let rewritten = crate::plan::rewrite::rewrite(logical);
        let guards: HashMap<String, parking_lot::RwLockReadGuard<'_, Table>> =
            self.scope.iter().map(|t| (t.clone(), self.tables[t].read())).collect();
        let table_refs: HashMap<String, &Table> = guards.iter().map(|(k, v)| (k.clone(), &**v)).collect();
        let physical = crate::plan::physical::build_physical(rewritten, &table_refs, self.hash_join_memory_threshold);
        drop(table_refs);
        drop(guards);
        self.query(&physical)
    }

    #[tracing::instrument(skip(self, rows))]
    pub fn insert(&mut self, table: &str, rows: Vec<Row>, allow_replace: bool) -> Result<()> {
        self.require_active()?;
        self.ensure_in_scope(table)?;
        self.state = TxState::AcquiringLocks;
        let schema = self
            .schema
            .table(table)
            .ok_or_else(|| LovefieldError::NotFound(format!("table `{table}`")))?;
        if allow_replace && schema.primary_key.is_none() {
            return Err(LovefieldError::Syntax(BuilderError::ReplaceWithoutPrimaryKey(table.to_owned())));
        }
        self.state = TxState::Executing;
        for mut row in rows {
            if row.id() == crate::schema::DUMMY_ID {
                let id = self.tables[table].read().allocate_row_id();
                row = Row::new(id, row.payload().clone());
            }
            validate_row(&schema, row.payload())?;
            if allow_replace {
                let pk_cols = schema.primary_key.clone().unwrap();
                let key = Key::encode(
                    &pk_cols,
                    &schema
                        .columns
                        .iter()
                        .map(|c| row.get(&c.name).cloned().unwrap_or(crate::value::Value::Null))
                        .collect::<Vec<_>>(),
                );
                let existing = self.overlaid_rows(table).into_iter().find(|r| {
                    let row_key = Key::encode(
                        &pk_cols,
                        &schema
                            .columns
                            .iter()
                            .map(|c| r.get(&c.name).cloned().unwrap_or(crate::value::Value::Null))
                            .collect::<Vec<_>>(),
                    );
                    row_key == key
                });
                if let Some(before) = existing {
                    self.journal.record_update(table, before, row);
                    continue;
                }
            }
            self.journal.record_insert(table, row);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, assignments, predicate))]
    pub fn update(&mut self, table: &str, assignments: &[Assignment], predicate: Option<&crate::plan::expr::Expr>) -> Result<usize> {
        self.require_active()?;
        self.ensure_in_scope(table)?;
        self.state = TxState::AcquiringLocks;
        let schema = self
            .schema
            .table(table)
            .ok_or_else(|| LovefieldError::NotFound(format!("table `{table}`")))?;
        let committed = self.overlaid_rows(table);
        self.state = TxState::Executing;
        let mut count = 0;
        for before in committed {
            let entry = crate::relation::RelationEntry::from_row(before.clone(), None, false);
            if predicate.is_none_or(|p| p.eval_bool(&entry)) {
                let mut payload = before.payload().clone();
                for a in assignments {
                    payload.insert(a.column.clone(), a.value.clone());
                }
                validate_row(&schema, &payload)?;
                self.journal.record_update(table, before.clone(), Row::new(before.id(), payload));
                count += 1;
            }
        }
        Ok(count)
    }

    #[tracing::instrument(skip(self, predicate))]
    pub fn delete(&mut self, table: &str, predicate: Option<&crate::plan::expr::Expr>) -> Result<usize> {
        self.require_active()?;
        self.ensure_in_scope(table)?;
        self.state = TxState::AcquiringLocks;
        let committed = self.overlaid_rows(table);
        self.state = TxState::Executing;
        let mut count = 0;
        for before in committed {
            let entry = crate::relation::RelationEntry::from_row(before.clone(), None, false);
            if predicate.is_none_or(|p| p.eval_bool(&entry)) {
                self.journal.record_delete(table, before);
                count += 1;
            }
        }
        Ok(count)
    }

    /// Five-phase commit: validate constraints, apply to indices, apply to
    /// cache, flush to the backing store, release locks. A constraint
    /// failure rolls back before anything is mutated; a store flush
    /// failure leaves committed state applied but reports `Store` so the
    /// caller knows persistence is degraded — a flush failure after
    /// in-memory commit is reported, not rolled back.
    #[tracing::instrument(skip(self))]
    pub async fn commit(mut self) -> Result<()> {
        self.require_active()?;
        self.state = TxState::Committing;

        if let Err(e) = self.validate_constraints() {
            self.rollback_internal();
            return Err(e);
        }

        let mut guards = HashMap::new();
        for table in &self.scope {
            guards.insert(table.clone(), self.tables[table].write());
        }

        for entry in self.journal.entries() {
            let guard = guards.get_mut(&entry.table).expect("table in scope has a write guard");
            match entry.op {
                JournalOp::Insert => {
                    let row = entry.after.clone().expect("insert journal entry always carries `after`");
                    guard.insert(row).map_err(LovefieldError::from)?;
                }
                JournalOp::Update => {
                    guard.delete(entry.row_id);
                    let row = entry.after.clone().expect("update journal entry always carries `after`");
                    guard.insert(row).map_err(LovefieldError::from)?;
                }
                JournalOp::Delete => {
                    guard.delete(entry.row_id);
                }
            }
        }

        for entry in self.journal.entries() {
            self.cache.apply(&entry.table, entry.row_id, entry.after.clone());
        }

        let mut batches: HashMap<String, Vec<WriteOp>> = HashMap::new();
        for entry in self.journal.entries() {
            let op = match entry.op {
                JournalOp::Insert | JournalOp::Update => WriteOp::Put(entry.after.clone().unwrap()),
                JournalOp::Delete => WriteOp::Tombstone(entry.row_id),
            };
            batches.entry(entry.table.clone()).or_default().push(op);
        }
        let write_batches: Vec<WriteBatch> = batches.into_iter().map(|(table, ops)| WriteBatch { table, ops }).collect();

        let mut flush_result = Ok(());
        for chunk in write_batches.chunks(self.journal_batch_flush_size.max(1)) {
            if let Err(e) = self.store.write(chunk.to_vec()).await {
                flush_result = Err(e);
                break;
            }
        }
        drop(guards);

        self.state = TxState::Finished;
        flush_result.map_err(LovefieldError::Store)
    }

    fn validate_constraints(&self) -> Result<()> {
        for entry in self.journal.entries() {
            if matches!(entry.op, JournalOp::Delete) {
                continue;
            }
            let row = entry.after.as_ref().unwrap();
            let schema = self.schema.table(&entry.table).expect("journal only references in-schema tables");
            for fk in &schema.foreign_keys {
                let local_values: Vec<_> = fk
                    .local_columns
                    .iter()
                    .map(|&i| row.get(&schema.columns[i].name).cloned().unwrap_or(crate::value::Value::Null))
                    .collect();
                if local_values.iter().all(|v| v.is_null()) {
                    continue;
                }
                let remote_guard = self.tables.get(&fk.remote_table).map(|t| t.read());
                let found = remote_guard.as_ref().is_some_and(|remote| {
                    remote.scan().any(|r| {
                        fk.remote_columns
                            .iter()
                            .zip(local_values.iter())
                            .all(|(&ci, lv)| r.get(&remote.schema.columns[ci].name) == Some(lv))
                    })
                });
                if !found {
                    return Err(LovefieldError::Schema(crate::error::SchemaError::ForeignKeyViolation {
                        local: entry.table.clone(),
                        remote_table: fk.remote_table.clone(),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Cancels the transaction; legal any time before commit begins —
    /// cancellation is only honored before the commit phase starts.
    pub fn cancel(mut self) {
        self.rollback_internal();
    }

    fn rollback_internal(&mut self) {
        self.state = TxState::RollingBack;
        self.journal = Journal::new();
        self.state = TxState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseOptions};
    use crate::error::ErrorKind;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::store::InMemoryStore;
    use crate::value::{Value, ValueType};

    fn users_schema() -> Schema {
        let mut schema = Schema::new("app", 1);
        schema.add_table(TableSchema {
            name: "users".into(),
            columns: vec![
                ColumnSchema { name: "id".into(), ty: ValueType::Integer, nullable: false, alias: None },
                ColumnSchema { name: "name".into(), ty: ValueType::String, nullable: false, alias: None },
            ],
            primary_key: Some(vec![0]),
            secondary_indices: vec![],
            foreign_keys: vec![],
        });
        schema
    }

    #[tokio::test]
    async fn insert_with_wrong_column_type_is_rejected() {
        let db = Database::open(users_schema(), Arc::new(InMemoryStore::new()), DatabaseOptions::default()).await.unwrap();
        let mut tx = db.transaction(["users"]).unwrap();
        let mut payload = IndexMap::new();
        payload.insert("id".to_string(), Value::Integer(1));
        payload.insert("name".to_string(), Value::Integer(7));
        let err = tx.insert("users", vec![Row::new(0, payload)], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[tokio::test]
    async fn insert_null_into_non_nullable_column_is_rejected() {
        let db = Database::open(users_schema(), Arc::new(InMemoryStore::new()), DatabaseOptions::default()).await.unwrap();
        let mut tx = db.transaction(["users"]).unwrap();
        let mut payload = IndexMap::new();
        payload.insert("id".to_string(), Value::Integer(1));
        payload.insert("name".to_string(), Value::Null);
        let err = tx.insert("users", vec![Row::new(0, payload)], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        assert!(matches!(err, LovefieldError::Schema(SchemaError::NotNullable(_))));
    }

    #[tokio::test]
    async fn update_with_wrong_column_type_is_rejected() {
        let db = Database::open(users_schema(), Arc::new(InMemoryStore::new()), DatabaseOptions::default()).await.unwrap();
        let mut tx = db.transaction(["users"]).unwrap();
        let mut payload = IndexMap::new();
        payload.insert("id".to_string(), Value::Integer(1));
        payload.insert("name".to_string(), Value::String("ada".into()));
        tx.insert("users", vec![Row::new(0, payload)], false).unwrap();

        let err = tx
            .update("users", &[Assignment { column: "name".into(), value: Value::Integer(9) }], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[tokio::test]
    async fn allow_replace_without_primary_key_is_rejected() {
        let mut schema = Schema::new("app", 1);
        schema.add_table(TableSchema {
            name: "events".into(),
            columns: vec![ColumnSchema { name: "id".into(), ty: ValueType::Integer, nullable: false, alias: None }],
            primary_key: None,
            secondary_indices: vec![],
            foreign_keys: vec![],
        });
        let db = Database::open(schema, Arc::new(InMemoryStore::new()), DatabaseOptions::default()).await.unwrap();
        let mut tx = db.transaction(["events"]).unwrap();
        let mut payload = IndexMap::new();
        payload.insert("id".to_string(), Value::Integer(1));
        let err = tx.insert("events", vec![Row::new(0, payload)], true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        assert!(matches!(err, LovefieldError::Syntax(BuilderError::ReplaceWithoutPrimaryKey(_))));
    }
}
