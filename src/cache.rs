//! Process-wide, read-through row cache sitting in front of the backing
//! store: transactions read through it and commits apply into it. Row
//! storage and index membership live in `crate::table`; this is just the
//! shared, post-commit view.

use crate::schema::{Row, RowId};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// `(table, rowId) -> payload`, shared across transactions.
#[derive(Default)]
pub struct Cache {
    tables: RwLock<HashMap<String, IndexMap<RowId, Row>>>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    pub fn get(&self, table: &str, row_id: RowId) -> Option<Row> {
        self.tables.read().get(table).and_then(|t| t.get(&row_id)).cloned()
    }

    pub fn scan(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(|t| t.len()).unwrap_or(0)
    }

    /// Fills a miss from the backing store: on miss, the store adapter is
    /// asked for the row and the result is filled in.
    pub fn warm(&self, table: &str, rows: Vec<Row>) {
        let mut guard = self.tables.write();
        let entry = guard.entry(table.to_owned()).or_default();
        for row in rows {
            entry.insert(row.id(), row);
        }
    }

    /// Applies a single committed mutation to the cache; only ever called
    /// while the table's writer lock is held, during commit.
    pub fn apply(&self, table: &str, row_id: RowId, row: Option<Row>) {
        let mut guard = self.tables.write();
        let entry = guard.entry(table.to_owned()).or_default();
        match row {
            Some(r) => {
                entry.insert(row_id, r);
            }
            None => {
                entry.shift_remove(&row_id);
            }
        }
    }
}
