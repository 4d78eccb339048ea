//! Per-transaction write journal: an ordered record of what happened, not
//! of who asked for it — `(table, rowId, op, before?, after?)` — discarded
//! on rollback and replayed into committed state at commit.

use crate::schema::{Row, RowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub table: String,
    pub row_id: RowId,
    pub op: JournalOp,
    pub before: Option<Row>,
    pub after: Option<Row>,
}

/// An ordered list of pending mutations for one transaction.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Journal::default()
    }

    pub fn record_insert(&mut self, table: &str, row: Row) {
        self.entries.push(JournalEntry {
            table: table.to_owned(),
            row_id: row.id(),
            op: JournalOp::Insert,
            before: None,
            after: Some(row),
        });
    }

    pub fn record_update(&mut self, table: &str, before: Row, after: Row) {
        self.entries.push(JournalEntry {
            table: table.to_owned(),
            row_id: after.id(),
            op: JournalOp::Update,
            before: Some(before),
            after: Some(after),
        });
    }

    pub fn record_delete(&mut self, table: &str, before: Row) {
        self.entries.push(JournalEntry {
            table: table.to_owned(),
            row_id: before.id(),
            op: JournalOp::Delete,
            before: Some(before),
            after: None,
        });
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-your-writes overlay: the most recent journal entry for
    /// `(table, row_id)`, if any.
    pub fn overlay(&self, table: &str, row_id: RowId) -> Option<&JournalEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.table == table && e.row_id == row_id)
    }

    /// All rows visible for `table` after overlaying the journal onto a
    /// `committed` snapshot: `committed` rows not deleted, plus this
    /// transaction's own inserts/updates, preserving journal order for the
    /// transaction's own writes.
    pub fn overlay_scan(&self, table: &str, committed: Vec<Row>) -> Vec<Row> {
        let mut deleted = std::collections::HashSet::new();
        let mut written: indexmap::IndexMap<RowId, Row> = indexmap::IndexMap::new();
        for e in &self.entries {
            if e.table != table {
                continue;
            }
            match e.op {
                JournalOp::Delete => {
                    deleted.insert(e.row_id);
                    written.shift_remove(&e.row_id);
                }
                JournalOp::Insert | JournalOp::Update => {
                    deleted.remove(&e.row_id);
                    written.insert(e.row_id, e.after.clone().expect("insert/update always has after"));
                }
            }
        }
        let mut out: Vec<Row> = committed.into_iter().filter(|r| !deleted.contains(&r.id())).collect();
        for row in out.iter_mut() {
            if let Some(w) = written.get(&row.id()) {
                *row = w.clone();
            }
        }
        let existing: std::collections::HashSet<RowId> = out.iter().map(|r| r.id()).collect();
        for (id, row) in written {
            if !existing.contains(&id) {
                out.push(row);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn row(id: RowId, v: i64) -> Row {
        let mut m = IndexMap::new();
        m.insert("n".to_string(), crate::value::Value::Integer(v));
        Row::new(id, m)
    }

    #[test]
    fn overlay_scan_applies_inserts_updates_and_deletes() {
        let mut j = Journal::new();
        j.record_insert("t", row(1, 1));
        j.record_update("t", row(2, 2), row(2, 22));
        j.record_delete("t", row(3, 3));

        let committed = vec![row(2, 2), row(3, 3), row(4, 4)];
        let mut visible = j.overlay_scan("t", committed);
        visible.sort_by_key(|r| r.id());
        let ids: Vec<_> = visible.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        assert_eq!(visible[1].get("n"), Some(&crate::value::Value::Integer(22)));
    }
}
