//! Row & Schema: the typed table definitions and row payloads the planner
//! and index subsystem operate on.

use crate::value::{Value, ValueType};
use indexmap::IndexMap;
use std::sync::Arc;

/// Row id: a monotonic non-negative integer, unique within a table for the
/// row's lifetime. `DUMMY_ID` marks synthetic join output rows.
pub type RowId = u64;

/// Sentinel row id for synthetic rows produced by joins; never persisted.
pub const DUMMY_ID: RowId = u64::MAX;

/// An opaque row handle: `id` plus `payload`. The payload is only mutable
/// through the journal/builder paths; operator code treats it as read-only.
#[derive(Debug, Clone)]
pub struct Row {
    id: RowId,
    payload: Arc<IndexMap<String, Value>>,
}

impl Row {
    pub fn new(id: RowId, payload: IndexMap<String, Value>) -> Self {
        Row {
            id,
            payload: Arc::new(payload),
        }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn payload(&self) -> &IndexMap<String, Value> {
        &self.payload
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.payload.get(column)
    }

    /// A dummy row carrying no id-backed identity, used as the left/right
    /// wrapped payload of a combined (joined) entry.
    pub fn dummy(payload: IndexMap<String, Value>) -> Self {
        Row::new(DUMMY_ID, payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Ordered,
    Hash,
}

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<usize>,
    pub unique: bool,
    pub kind: IndexKind,
}

#[derive(Debug, Clone)]
pub struct ForeignKeySchema {
    pub local_columns: Vec<usize>,
    pub remote_table: String,
    pub remote_columns: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// `None` if the table has no primary key.
    pub primary_key: Option<Vec<usize>>,
    pub secondary_indices: Vec<IndexSchema>,
    pub foreign_keys: Vec<ForeignKeySchema>,
}

impl TableSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// All indices on this table, primary key first, matching the
    /// declaration-order tie-break used for physical access-path choice.
    pub fn all_indices(&self) -> Vec<IndexSchema> {
        let mut out = Vec::with_capacity(self.secondary_indices.len() + 1);
        if let Some(pk) = &self.primary_key {
            out.push(IndexSchema {
                name: format!("{}__pk", self.name),
                columns: pk.clone(),
                unique: true,
                kind: IndexKind::Ordered,
            });
        }
        out.extend(self.secondary_indices.iter().cloned());
        out
    }
}

/// The full, immutable-after-open schema: a schema is immutable after
/// database open.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub name: String,
    pub version: u32,
    tables: IndexMap<String, Arc<TableSchema>>,
}

impl Schema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Schema {
            name: name.into(),
            version,
            tables: IndexMap::new(),
        }
    }

    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), Arc::new(table));
    }

    pub fn table(&self, name: &str) -> Option<Arc<TableSchema>> {
        self.tables.get(name).cloned()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }
}
