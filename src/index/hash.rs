//! Hash single-map index and row-id hash index: constant-time `get`/`set`/
//! `remove`, switching its backing store between a single-`RowId` map for
//! unique indices and a `SmallVec`-bucketed map otherwise to avoid an
//! allocation in the common one-row case.

use super::Index;
use crate::error::IndexError;
use crate::key::{Key, KeyRange};
use crate::schema::RowId;
use indexmap::IndexMap;
use smallvec::SmallVec;

enum Buckets {
    Unique(IndexMap<Key, RowId>),
    NonUnique(IndexMap<Key, SmallVec<[RowId; 1]>>),
}

pub struct HashIndex {
    columns: Vec<usize>,
    buckets: Buckets,
}

impl HashIndex {
    pub fn new(columns: Vec<usize>, unique: bool) -> Self {
        HashIndex {
            columns,
            buckets: if unique {
                Buckets::Unique(IndexMap::new())
            } else {
                Buckets::NonUnique(IndexMap::new())
            },
        }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }
}

impl Index for HashIndex {
    #[tracing::instrument(skip_all)]
    fn add(&mut self, key: Key, value: RowId) -> Result<(), IndexError> {
        match &mut self.buckets {
            Buckets::Unique(m) => {
                if m.contains_key(&key) {
                    return Err(IndexError::UniqueViolation {
                        cols: self.columns.clone(),
                        value: key.0,
                    });
                }
                m.insert(key, value);
            }
            Buckets::NonUnique(m) => {
                m.entry(key).or_default().push(value);
            }
        }
        Ok(())
    }

    fn set(&mut self, key: Key, value: RowId) {
        match &mut self.buckets {
            Buckets::Unique(m) => {
                m.insert(key, value);
            }
            Buckets::NonUnique(m) => {
                m.insert(key, SmallVec::from_elem(value, 1));
            }
        }
    }

    fn get(&self, key: &Key) -> Vec<RowId> {
        match &self.buckets {
            Buckets::Unique(m) => m.get(key).copied().into_iter().collect(),
            Buckets::NonUnique(m) => m.get(key).map(|v| v.to_vec()).unwrap_or_default(),
        }
    }

    fn get_range(&self, range: Option<&KeyRange>) -> Vec<RowId> {
        // Hash indices don't preserve key order; this falls back to a
        // linear scan filtered by the range predicate for anything
        // non-trivial, since only ordered indices guarantee ascending order.
        match &self.buckets {
            Buckets::Unique(m) => m
                .iter()
                .filter(|(k, _)| range.is_none_or(|r| r.matches(k)))
                .map(|(_, v)| *v)
                .collect(),
            Buckets::NonUnique(m) => m
                .iter()
                .filter(|(k, _)| range.is_none_or(|r| r.matches(k)))
                .flat_map(|(_, v)| v.iter().copied())
                .collect(),
        }
    }

    fn remove(&mut self, key: &Key, value: Option<RowId>) {
        match &mut self.buckets {
            Buckets::Unique(m) => {
                m.shift_remove(key);
            }
            Buckets::NonUnique(m) => {
                if let Some(bucket) = m.get_mut(key) {
                    match value {
                        Some(v) => bucket.retain(|x| *x != v),
                        None => bucket.clear(),
                    }
                    if bucket.is_empty() {
                        m.shift_remove(key);
                    }
                }
            }
        }
    }

    fn cost(&self, range: Option<&KeyRange>) -> usize {
        match range {
            Some(r) if !r.is_unbounded() => self.get_range(Some(r)).len(),
            _ => match &self.buckets {
                Buckets::Unique(m) => m.len(),
                Buckets::NonUnique(m) => m.values().map(|v| v.len()).sum(),
            },
        }
    }

    fn contains_key(&self, key: &Key) -> bool {
        match &self.buckets {
            Buckets::Unique(m) => m.contains_key(key),
            Buckets::NonUnique(m) => m.get(key).is_some_and(|v| !v.is_empty()),
        }
    }

    fn is_unique(&self) -> bool {
        matches!(self.buckets, Buckets::Unique(_))
    }

    fn is_ordered(&self) -> bool {
        false
    }
}

/// `Key -> single RowId` index, the degenerate shape for primary/unique
/// indices, where single-row indices collapse the set to a single row id.
pub struct RowIdIndex {
    inner: HashIndex,
}

impl RowIdIndex {
    pub fn new(columns: Vec<usize>) -> Self {
        RowIdIndex {
            inner: HashIndex::new(columns, true),
        }
    }

    pub fn get_single(&self, key: &Key) -> Option<RowId> {
        self.inner.get(key).into_iter().next()
    }
}

impl Index for RowIdIndex {
    fn add(&mut self, key: Key, value: RowId) -> Result<(), IndexError> {
        self.inner.add(key, value)
    }
    fn set(&mut self, key: Key, value: RowId) {
        self.inner.set(key, value)
    }
    fn get(&self, key: &Key) -> Vec<RowId> {
        self.inner.get(key)
    }
    fn get_range(&self, range: Option<&KeyRange>) -> Vec<RowId> {
        self.inner.get_range(range)
    }
    fn remove(&mut self, key: &Key, value: Option<RowId>) {
        self.inner.remove(key, value)
    }
    fn cost(&self, range: Option<&KeyRange>) -> usize {
        self.inner.cost(range)
    }
    fn contains_key(&self, key: &Key) -> bool {
        self.inner.contains_key(key)
    }
    fn is_unique(&self) -> bool {
        true
    }
    fn is_ordered(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn k(i: i64) -> Key {
        Key::single(Value::Integer(i))
    }

    #[test]
    fn unique_hash_index_round_trip() {
        let mut idx = HashIndex::new(vec![0], true);
        idx.add(k(1), 100).unwrap();
        assert_eq!(idx.get(&k(1)), vec![100]);
        assert!(idx.add(k(1), 200).is_err());
        idx.set(k(1), 200);
        assert_eq!(idx.get(&k(1)), vec![200]);
        idx.remove(&k(1), None);
        assert!(idx.get(&k(1)).is_empty());
    }

    #[test]
    fn non_unique_hash_index_accumulates() {
        let mut idx = HashIndex::new(vec![0], false);
        idx.add(k(1), 1).unwrap();
        idx.add(k(1), 2).unwrap();
        assert_eq!(idx.get(&k(1)), vec![1, 2]);
        idx.remove(&k(1), Some(1));
        assert_eq!(idx.get(&k(1)), vec![2]);
    }
}
