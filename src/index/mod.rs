//! Index subsystem: a common capability contract (`add`/`get`/`remove`/
//! `cost`) shared by every physical index shape.

pub mod btree;
pub mod hash;

use crate::error::IndexError;
use crate::key::{Key, KeyRange};
use crate::schema::RowId;

/// Every index, regardless of physical shape, exposes this contract.
pub trait Index {
    /// Inserts a new association; fails with a unique-constraint error if
    /// `key` already maps to a value on a unique index.
    fn add(&mut self, key: Key, value: RowId) -> Result<(), IndexError>;

    /// Replaces any existing association for `key`.
    fn set(&mut self, key: Key, value: RowId);

    /// Returns zero or more row ids; single-row indices return 0 or 1.
    fn get(&self, key: &Key) -> Vec<RowId>;

    /// Ascending key order; `None` (or `KeyRange::all()`) yields all rows.
    fn get_range(&self, range: Option<&KeyRange>) -> Vec<RowId>;

    /// Removes a specific mapping, or all mappings for `key` if `value` is
    /// `None`.
    fn remove(&mut self, key: &Key, value: Option<RowId>);

    /// A cheap cardinality estimate for `range`, consumed directly by the
    /// planner to choose between index lookup and full table scan.
    fn cost(&self, range: Option<&KeyRange>) -> usize;

    fn contains_key(&self, key: &Key) -> bool;

    fn is_unique(&self) -> bool;

    fn is_ordered(&self) -> bool;
}
