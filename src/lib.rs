//! An in-process relational query engine: schemas, typed rows, ordered and
//! hashed indices, a relational algebra with a cost-based planner, and
//! MVCC-style transactions over a pluggable async backing store.
//!
//! The public surface is the query builder in [`builder`] plus [`Database`]
//! and [`Transaction`]; everything else is exposed for composing custom
//! physical plans or backing stores.

pub mod builder;
pub mod cache;
pub mod db;
pub mod error;
pub mod exec;
pub mod index;
pub mod journal;
pub mod key;
pub mod plan;
pub mod relation;
pub mod schema;
pub mod store;
pub mod table;
pub mod tx;
pub mod value;

pub use db::{Database, DatabaseOptions};
pub use error::{ErrorKind, LovefieldError, Result};
pub use relation::{Relation, RelationEntry};
pub use schema::{ColumnSchema, ForeignKeySchema, IndexSchema, Row, RowId, Schema, TableSchema};
pub use store::{BackingStore, InMemoryStore};
pub use tx::Transaction;
pub use value::{Value, ValueType};
