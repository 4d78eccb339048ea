//! Backing-store adapter contract: deliberately narrow (`open`/`scan`/
//! `write`/`close`) so any async key-value store can sit underneath,
//! implemented in-memory here for tests and by a real engine in production.

use crate::schema::{Row, RowId};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Row),
    Tombstone(RowId),
}

#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub table: String,
    pub ops: Vec<WriteOp>,
}

/// Required backing-store adapter contract.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn open(&self) -> anyhow::Result<()>;

    /// Reads all rows of a table; used at startup to warm indices.
    async fn scan(&self, table: &str) -> anyhow::Result<Vec<Row>>;

    /// Atomic (best-effort) commit of a batch of journal writes.
    async fn write(&self, batches: Vec<WriteBatch>) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Reference in-memory adapter backing the default four-method contract.
#[derive(Default)]
pub struct InMemoryStore {
    tables: parking_lot::RwLock<std::collections::HashMap<String, indexmap::IndexMap<RowId, Row>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn open(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn scan(&self, table: &str) -> anyhow::Result<Vec<Row>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn write(&self, batches: Vec<WriteBatch>) -> anyhow::Result<()> {
        let mut guard = self.tables.write();
        for batch in batches {
            let entry = guard.entry(batch.table).or_default();
            for op in batch.ops {
                match op {
                    WriteOp::Put(row) => {
                        entry.insert(row.id(), row);
                    }
                    WriteOp::Tombstone(id) => {
                        entry.shift_remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn row(id: RowId) -> Row {
        Row::new(id, IndexMap::new())
    }

    #[tokio::test]
    async fn write_then_scan_round_trips() {
        let store = InMemoryStore::new();
        store.open().await.unwrap();
        store
            .write(vec![WriteBatch {
                table: "t".into(),
                ops: vec![WriteOp::Put(row(1)), WriteOp::Put(row(2))],
            }])
            .await
            .unwrap();
        let rows = store.scan("t").await.unwrap();
        assert_eq!(rows.len(), 2);

        store
            .write(vec![WriteBatch {
                table: "t".into(),
                ops: vec![WriteOp::Tombstone(1)],
            }])
            .await
            .unwrap();
        let rows = store.scan("t").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), 2);
    }
}
