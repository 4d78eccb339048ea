//! In-memory table storage tying row storage to its indices: rows keyed by
//! row id, with an index map maintained in lock-step on every insert/delete.

use crate::index::btree::BTreeIndex;
use crate::index::hash::{HashIndex, RowIdIndex};
use crate::index::Index;
use crate::key::Key;
use crate::schema::{IndexKind, Row, RowId, TableSchema};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Either a `BTreeIndex` or a `HashIndex`, selected by `IndexSchema::kind`
/// (ships both shapes behind the same `Index` contract).
pub enum AnyIndex {
    BTree(BTreeIndex),
    Hash(HashIndex),
}

impl Index for AnyIndex {
    fn add(&mut self, key: Key, value: RowId) -> Result<(), crate::error::IndexError> {
        match self {
            AnyIndex::BTree(i) => i.add(key, value),
            AnyIndex::Hash(i) => i.add(key, value),
        }
    }
    fn set(&mut self, key: Key, value: RowId) {
        match self {
            AnyIndex::BTree(i) => i.set(key, value),
            AnyIndex::Hash(i) => i.set(key, value),
        }
    }
    fn get(&self, key: &Key) -> Vec<RowId> {
        match self {
            AnyIndex::BTree(i) => i.get(key),
            AnyIndex::Hash(i) => i.get(key),
        }
    }
    fn get_range(&self, range: Option<&crate::key::KeyRange>) -> Vec<RowId> {
        match self {
            AnyIndex::BTree(i) => i.get_range(range),
            AnyIndex::Hash(i) => i.get_range(range),
        }
    }
    fn remove(&mut self, key: &Key, value: Option<RowId>) {
        match self {
            AnyIndex::BTree(i) => i.remove(key, value),
            AnyIndex::Hash(i) => i.remove(key, value),
        }
    }
    fn cost(&self, range: Option<&crate::key::KeyRange>) -> usize {
        match self {
            AnyIndex::BTree(i) => i.cost(range),
            AnyIndex::Hash(i) => i.cost(range),
        }
    }
    fn contains_key(&self, key: &Key) -> bool {
        match self {
            AnyIndex::BTree(i) => i.contains_key(key),
            AnyIndex::Hash(i) => i.contains_key(key),
        }
    }
    fn is_unique(&self) -> bool {
        match self {
            AnyIndex::BTree(i) => i.is_unique(),
            AnyIndex::Hash(i) => i.is_unique(),
        }
    }
    fn is_ordered(&self) -> bool {
        match self {
            AnyIndex::BTree(i) => i.is_ordered(),
            AnyIndex::Hash(i) => i.is_ordered(),
        }
    }
}

pub struct Table {
    pub schema: Arc<TableSchema>,
    pub rows: IndexMap<RowId, Row>,
    /// Keyed by the index's column list, so the planner can look an index
    /// up by the columns a predicate touches.
    pub indexes: IndexMap<Vec<usize>, AnyIndex>,
    pub primary_key_index: Option<RowIdIndex>,
    next_row_id: AtomicU64,
}

impl Table {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        let mut indexes = IndexMap::new();
        let mut primary_key_index = None;
        for idx in schema.all_indices() {
            if idx.columns == schema.primary_key.clone().unwrap_or_default() && idx.unique {
                primary_key_index = Some(RowIdIndex::new(idx.columns.clone()));
                continue;
            }
            let any = match idx.kind {
                IndexKind::Ordered => AnyIndex::BTree(BTreeIndex::new(idx.columns.clone(), idx.unique)),
                IndexKind::Hash => AnyIndex::Hash(HashIndex::new(idx.columns.clone(), idx.unique)),
            };
            indexes.insert(idx.columns, any);
        }
        Table {
            schema,
            rows: IndexMap::new(),
            indexes,
            primary_key_index,
            next_row_id: AtomicU64::new(0),
        }
    }

    /// The monotonic high-water mark for this table's row ids: the
    /// persisted state layout's "row-id high-water mark per table".
    pub fn next_row_id(&self) -> RowId {
        self.next_row_id.load(Ordering::Relaxed)
    }

    pub fn allocate_row_id(&self) -> RowId {
        self.next_row_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn restore_row_id_high_water_mark(&self, mark: RowId) {
        self.next_row_id.store(mark, Ordering::Relaxed);
    }

    pub fn insert(&mut self, row: Row) -> Result<(), crate::error::IndexError> {
        if let Some(pk) = &mut self.primary_key_index {
            let cols = pk_columns(&self.schema);
            let key = Key::encode(&cols, &row_values_by_position(&self.schema, &row));
            pk.add(key, row.id())?;
        }
        for (cols, index) in self.indexes.iter_mut() {
            let key = Key::encode(cols, &row_values_by_position(&self.schema, &row));
            index.add(key, row.id())?;
        }
        self.rows.insert(row.id(), row);
        Ok(())
    }

    pub fn delete(&mut self, row_id: RowId) -> Option<Row> {
        let row = self.rows.shift_remove(&row_id)?;
        if let Some(pk) = &mut self.primary_key_index {
            let cols = pk_columns(&self.schema);
            let key = Key::encode(&cols, &row_values_by_position(&self.schema, &row));
            pk.remove(&key, Some(row_id));
        }
        for (cols, index) in self.indexes.iter_mut() {
            let key = Key::encode(cols, &row_values_by_position(&self.schema, &row));
            index.remove(&key, Some(row_id));
        }
        Some(row)
    }

    pub fn get(&self, row_id: RowId) -> Option<&Row> {
        self.rows.get(&row_id)
    }

    pub fn scan(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn index_for(&self, columns: &[usize]) -> Option<&AnyIndex> {
        self.indexes.get(columns)
    }
}

/// A read-only view the planner and executor can query without caring
/// whether it's backed by committed state alone or a transaction's
/// committed-plus-journal overlay; `Table` implements it directly for the
/// no-overlay (autocommit / warm-up) case, and the transaction runtime
/// layers an overlaying implementation on top for in-flight reads.
pub trait TableSnapshot {
    fn schema(&self) -> &Arc<TableSchema>;
    fn scan(&self) -> Vec<Row>;
    fn get(&self, row_id: RowId) -> Option<Row>;
    fn row_count(&self) -> usize;
    fn index_lookup(&self, columns: &[usize], range: Option<&crate::key::KeyRange>) -> Vec<RowId>;
    fn primary_key_lookup(&self, key: &Key) -> Option<RowId>;
}

impl TableSnapshot for Table {
    fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }
    fn scan(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }
    fn get(&self, row_id: RowId) -> Option<Row> {
        self.rows.get(&row_id).cloned()
    }
    fn row_count(&self) -> usize {
        Table::row_count(self)
    }
    fn index_lookup(&self, columns: &[usize], range: Option<&crate::key::KeyRange>) -> Vec<RowId> {
        self.index_for(columns).map(|i| i.get_range(range)).unwrap_or_default()
    }
    fn primary_key_lookup(&self, key: &Key) -> Option<RowId> {
        self.primary_key_index.as_ref().and_then(|pk| pk.get_single(key))
    }
}

fn pk_columns(schema: &TableSchema) -> Vec<usize> {
    schema.primary_key.clone().unwrap_or_default()
}

fn row_values_by_position(schema: &TableSchema, row: &Row) -> Vec<crate::value::Value> {
    schema
        .columns
        .iter()
        .map(|c| row.get(&c.name).cloned().unwrap_or(crate::value::Value::Null))
        .collect()
}
