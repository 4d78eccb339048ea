//! Relation & RelationEntry: the immutable tuple stream that flows between
//! physical operators, with prefix-aware attribute access for joins. Set
//! operators materialize fully and dedupe via a hash pass, keyed by entry
//! id rather than structural value equality.

use crate::schema::{Row, RowId, DUMMY_ID};
use crate::value::Value;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counter driving `RelationEntry` id allocation, so set
/// operations can dedupe by id across relations materialized independently.
static ENTRY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_entry_id() -> u64 {
    ENTRY_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A payload addressed either flatly (`(column)`) or, once prefix-applied,
/// by `(table, column)`. Aliases always write to a flat slot regardless of
/// prefix-applied state: alias assignment always writes to a flat slot and
/// reads consult aliases before prefixes.
#[derive(Debug, Clone)]
pub enum Payload {
    Flat(Arc<IndexMap<String, Value>>),
    Prefixed(Arc<IndexMap<String, Arc<IndexMap<String, Value>>>>),
}

/// One tuple in a relation: wraps a row plus a process-unique id used to
/// dedupe in set operations across relations of identical shape.
#[derive(Debug, Clone)]
pub struct RelationEntry {
    id: u64,
    row: Row,
    payload: Payload,
    prefix_applied: bool,
    aliases: Arc<IndexMap<String, Value>>,
}

impl RelationEntry {
    pub fn from_row(row: Row, table: Option<&str>, prefix_applied: bool) -> Self {
        let payload = if prefix_applied {
            let mut outer = IndexMap::new();
            outer.insert(table.unwrap_or_default().to_owned(), Arc::new(row.payload().clone()));
            Payload::Prefixed(Arc::new(outer))
        } else {
            Payload::Flat(Arc::new(row.payload().clone()))
        };
        RelationEntry {
            id: next_entry_id(),
            row,
            payload,
            prefix_applied,
            aliases: Arc::new(IndexMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn row_id(&self) -> RowId {
        self.row.id()
    }

    pub fn prefix_applied(&self) -> bool {
        self.prefix_applied
    }

    pub fn with_alias(mut self, alias: &str, value: Value) -> Self {
        Arc::make_mut(&mut self.aliases).insert(alias.to_owned(), value);
        self
    }

    /// Unqualified attribute access: `(column)`. Aliases short-circuit to a
    /// flat slot and are consulted before prefixes.
    pub fn get(&self, column: &str) -> Option<&Value> {
        if let Some(v) = self.aliases.get(column) {
            return Some(v);
        }
        match &self.payload {
            Payload::Flat(m) => m.get(column),
            Payload::Prefixed(tables) => tables.values().find_map(|cols| cols.get(column)),
        }
    }

    /// Qualified attribute access: `(table, column)`.
    pub fn get_qualified(&self, table: &str, column: &str) -> Option<&Value> {
        if let Some(v) = self.aliases.get(column) {
            return Some(v);
        }
        match &self.payload {
            Payload::Flat(m) => m.get(column),
            Payload::Prefixed(tables) => tables.get(table).and_then(|cols| cols.get(column)),
        }
    }

    /// Produces a prefix-applied entry carrying both sides of a join: when a
    /// side is already prefixed, its prefixes are copied verbatim; otherwise
    /// its payload is inserted under its single source table name. The
    /// synthetic row uses `DUMMY_ID`.
    pub fn combine_entries(left: &RelationEntry, left_table: &str, right: &RelationEntry, right_table: &str) -> Self {
        let mut merged: IndexMap<String, Arc<IndexMap<String, Value>>> = IndexMap::new();
        match &left.payload {
            Payload::Prefixed(tables) => merged.extend(tables.iter().map(|(k, v)| (k.clone(), v.clone()))),
            Payload::Flat(m) => {
                merged.insert(left_table.to_owned(), m.clone());
            }
        }
        match &right.payload {
            Payload::Prefixed(tables) => merged.extend(tables.iter().map(|(k, v)| (k.clone(), v.clone()))),
            Payload::Flat(m) => {
                merged.insert(right_table.to_owned(), m.clone());
            }
        }
        RelationEntry {
            id: next_entry_id(),
            row: Row::new(DUMMY_ID, IndexMap::new()),
            payload: Payload::Prefixed(Arc::new(merged)),
            prefix_applied: true,
            aliases: Arc::new(IndexMap::new()),
        }
    }
}

/// An ordered sequence of `RelationEntry` plus the set of source table
/// names from which its attributes originate. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Relation {
    entries: Vec<RelationEntry>,
    tables: BTreeSet<String>,
}

static EMPTY_RELATION: Lazy<Relation> = Lazy::new(|| Relation {
    entries: Vec::new(),
    tables: BTreeSet::new(),
});

impl Relation {
    pub fn new(entries: Vec<RelationEntry>, tables: BTreeSet<String>) -> Self {
        Relation { entries, tables }
    }

    /// Wraps each row into a fresh entry, prefix-applying iff `tables.len() > 1`.
    pub fn from_rows(rows: Vec<Row>, tables: BTreeSet<String>) -> Self {
        let prefix_applied = tables.len() > 1;
        let table_name = tables.iter().next().cloned();
        let entries = rows
            .into_iter()
            .map(|r| RelationEntry::from_row(r, table_name.as_deref(), prefix_applied))
            .collect();
        Relation { entries, tables }
    }

    /// The shared empty relation singleton.
    pub fn empty() -> Relation {
        EMPTY_RELATION.clone()
    }

    pub fn entries(&self) -> &[RelationEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RelationEntry> {
        self.entries
    }

    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Two relations are compatible for set operations iff their table
    /// sets are equal.
    pub fn is_compatible(&self, other: &Relation) -> bool {
        self.tables == other.tables
    }

    /// `union([r1..rn])`: requires pairwise compatibility with `r[0]`;
    /// entries deduped by id. Empty input returns the shared empty
    /// singleton.
    pub fn union(relations: &[Relation]) -> Relation {
        let Some(first) = relations.first() else {
            return Relation::empty();
        };
        debug_assert!(relations.iter().all(|r| r.is_compatible(first)));
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for rel in relations {
            for e in &rel.entries {
                if seen.insert(e.id) {
                    out.push(e.clone());
                }
            }
        }
        Relation::new(out, first.tables.clone())
    }

    /// `intersect([r1..rn])`: entries whose id is present in every input.
    /// Empty input returns the shared empty singleton.
    pub fn intersect(relations: &[Relation]) -> Relation {
        let Some(first) = relations.first() else {
            return Relation::empty();
        };
        debug_assert!(relations.iter().all(|r| r.is_compatible(first)));
        if relations.iter().any(|r| r.is_empty()) {
            return Relation::empty();
        }
        let mut id_sets: Vec<std::collections::HashSet<u64>> = relations
            .iter()
            .map(|r| r.entries.iter().map(|e| e.id).collect())
            .collect();
        let common: std::collections::HashSet<u64> = id_sets
            .pop()
            .unwrap()
            .into_iter()
            .filter(|id| id_sets.iter().all(|s| s.contains(id)))
            .collect();
        let out = first.entries.iter().filter(|e| common.contains(&e.id)).cloned().collect();
        Relation::new(out, first.tables.clone())
    }

    /// `except(a, b)`: entries of `a` whose id does not appear in `b`,
    /// mirroring the by-id dedup `union`/`intersect` use rather than
    /// structural value equality.
    pub fn except(a: &Relation, b: &Relation) -> Relation {
        let exclude: std::collections::HashSet<u64> = b.entries.iter().map(|e| e.id).collect();
        let out = a.entries.iter().filter(|e| !exclude.contains(&e.id)).cloned().collect();
        Relation::new(out, a.tables.clone())
    }
}
