//! Ordered multi-map index: logarithmic mutation/lookup, in-order range
//! scans, backed by `BTreeMap<Key, Vec<RowId>>` rather than a flat
//! `BTreeSet<(value, row_id)>` so that equal keys tie-break by insertion
//! order — a flat tuple can't express that once row ids stop being
//! monotonic with insertion order (e.g. after deletes and reinserts).

use super::Index;
use crate::error::IndexError;
use crate::key::{Bound as KBound, Key, KeyRange};
use crate::schema::RowId;
use std::collections::BTreeMap;
use std::ops::Bound as StdBound;

pub struct BTreeIndex {
    columns: Vec<usize>,
    unique: bool,
    map: BTreeMap<Key, Vec<RowId>>,
}

impl BTreeIndex {
    pub fn new(columns: Vec<usize>, unique: bool) -> Self {
        BTreeIndex {
            columns,
            unique,
            map: BTreeMap::new(),
        }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    fn std_bounds(range: Option<&KeyRange>) -> (StdBound<Key>, StdBound<Key>) {
        let Some(range) = range else {
            return (StdBound::Unbounded, StdBound::Unbounded);
        };
        let lower = match &range.lower {
            KBound::Unbounded => StdBound::Unbounded,
            KBound::Included(k) => StdBound::Included(k.clone()),
            KBound::Excluded(k) => StdBound::Excluded(k.clone()),
        };
        let upper = match &range.upper {
            KBound::Unbounded => StdBound::Unbounded,
            KBound::Included(k) => StdBound::Included(k.clone()),
            KBound::Excluded(k) => StdBound::Excluded(k.clone()),
        };
        (lower, upper)
    }
}

impl Index for BTreeIndex {
    #[tracing::instrument(skip_all)]
    fn add(&mut self, key: Key, value: RowId) -> Result<(), IndexError> {
        if self.unique && self.map.get(&key).is_some_and(|v| !v.is_empty()) {
            return Err(IndexError::UniqueViolation {
                cols: self.columns.clone(),
                value: key.0,
            });
        }
        self.map.entry(key).or_default().push(value);
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn set(&mut self, key: Key, value: RowId) {
        self.map.insert(key, vec![value]);
    }

    #[tracing::instrument(skip_all)]
    fn get(&self, key: &Key) -> Vec<RowId> {
        self.map.get(key).cloned().unwrap_or_default()
    }

    #[tracing::instrument(skip_all)]
    fn get_range(&self, range: Option<&KeyRange>) -> Vec<RowId> {
        let (lower, upper) = Self::std_bounds(range);
        self.map.range((lower, upper)).flat_map(|(_, v)| v.iter().copied()).collect()
    }

    #[tracing::instrument(skip_all)]
    fn remove(&mut self, key: &Key, value: Option<RowId>) {
        if let Some(bucket) = self.map.get_mut(key) {
            match value {
                Some(v) => bucket.retain(|x| *x != v),
                None => bucket.clear(),
            }
            if bucket.is_empty() {
                self.map.remove(key);
            }
        }
    }

    fn cost(&self, range: Option<&KeyRange>) -> usize {
        match range {
            None => self.map.values().map(|v| v.len()).sum(),
            Some(r) if r.is_unbounded() => self.map.values().map(|v| v.len()).sum(),
            Some(_) => self.get_range(range).len(),
        }
    }

    fn contains_key(&self, key: &Key) -> bool {
        self.map.get(key).is_some_and(|v| !v.is_empty())
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn is_ordered(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::HashMap;

    fn k(s: &str) -> Key {
        Key::single(Value::String(s.to_owned()))
    }

    /// Single-row string-keyed index over ten keys, where `by_rowid` maps
    /// row ids back to the logical values -5..4 so assertions read clearly.
    #[test]
    fn string_keyed_index_round_trip() {
        let mut idx = BTreeIndex::new(vec![0], true);
        let entries: Vec<(&str, i64)> = vec![
            ("key-5", -5),
            ("key-4", -4),
            ("key-3", -3),
            ("key-2", -2),
            ("key-1", -1),
            ("key0", 0),
            ("key1", 1),
            ("key2", 2),
            ("key3", 3),
            ("key4", 4),
        ];
        let mut by_rowid: HashMap<RowId, i64> = HashMap::new();
        for (i, (key, val)) in entries.iter().enumerate() {
            idx.add(k(key), i as RowId).unwrap();
            by_rowid.insert(i as RowId, *val);
        }
        let values = |ids: Vec<RowId>| ids.into_iter().map(|id| by_rowid[&id]).collect::<Vec<_>>();

        assert_eq!(values(idx.get_range(None)), vec![-1, -2, -3, -4, -5, 0, 1, 2, 3, 4]);
        assert_eq!(values(idx.get_range(Some(&KeyRange::only(k("key-3"))))), vec![-3]);
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::lower_bound(k("key0"), false)))),
            vec![0, 1, 2, 3, 4]
        );
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::lower_bound(k("key0"), true)))),
            vec![1, 2, 3, 4]
        );
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::upper_bound(k("key0"), false)))),
            vec![-1, -2, -3, -4, -5, 0]
        );
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::upper_bound(k("key0"), true)))),
            vec![-1, -2, -3, -4, -5]
        );

        let lo = k("key-1");
        let hi = k("key-5");
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::new(lo.clone(), false, hi.clone(), false)))),
            vec![-1, -2, -3, -4, -5]
        );
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::new(lo.clone(), true, hi.clone(), false)))),
            vec![-2, -3, -4, -5]
        );
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::new(lo.clone(), false, hi.clone(), true)))),
            vec![-1, -2, -3, -4]
        );
        assert_eq!(
            values(idx.get_range(Some(&KeyRange::new(lo, true, hi, true)))),
            vec![-2, -3, -4]
        );

        let row_for_key_minus1 = entries.iter().position(|(k, _)| *k == "key-1").unwrap() as RowId;
        idx.remove(&k("key-1"), Some(row_for_key_minus1));
        assert!(idx.get(&k("key-1")).is_empty());
        assert!(idx.get_range(Some(&KeyRange::only(k("key-1")))).is_empty());
        assert_eq!(idx.cost(Some(&KeyRange::only(k("key-1")))), 0);
    }

    #[test]
    fn unique_violation_on_duplicate_key() {
        let mut idx = BTreeIndex::new(vec![0], true);
        idx.add(k("a"), 0).unwrap();
        assert!(idx.add(k("a"), 1).is_err());
    }

    #[test]
    fn equal_keys_tie_break_by_insertion_order() {
        let mut idx = BTreeIndex::new(vec![0], false);
        idx.add(k("a"), 10).unwrap();
        idx.add(k("a"), 20).unwrap();
        idx.add(k("a"), 30).unwrap();
        assert_eq!(idx.get(&k("a")), vec![10, 20, 30]);
    }
}
