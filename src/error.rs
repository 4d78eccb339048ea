//! Error kinds surfaced to callers, plus the per-subsystem detail enums
//! they're built from: one flat top-level enum wrapping layered subsystem
//! error types, each carrying only the fields its variant needs.

use crate::value::Value;
use thiserror::Error;

/// The coarse error kind a caller can match on without downcasting,
/// matching exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Syntax,
    Constraint,
    Type,
    Scope,
    Store,
    Cancelled,
    Unknown,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("index not found for columns {0:?}")]
    NotFound(Vec<usize>),
    #[error("unique constraint violation on columns {cols:?}: value {value:?} already present")]
    UniqueViolation { cols: Vec<usize>, value: Vec<Value> },
    #[error("column {0} not found in row")]
    ColumnNotFound(usize),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table `{0}` not found")]
    TableNotFound(String),
    #[error("table `{0}` already exists")]
    TableExists(String),
    #[error("column `{0}` not found on table `{1}`")]
    ColumnNotFound(String, String),
    #[error("column `{0}` is not nullable")]
    NotNullable(String),
    #[error("foreign key on `{local}` references missing row in `{remote_table}`")]
    ForeignKeyViolation { local: String, remote_table: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BuilderError {
    #[error("`{0}` clause is required but was not supplied")]
    MissingClause(&'static str),
    #[error("`{0}` clause was supplied more than once")]
    DoubledClause(&'static str),
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("allowReplace requires a primary key on table `{0}`")]
    ReplaceWithoutPrimaryKey(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction already finished")]
    AlreadyFinished,
    #[error("table `{0}` was not declared for this transaction's scope")]
    OutOfScope(String),
    #[error("transaction was cancelled before commit")]
    Cancelled,
}

/// Top-level error type returned across the public surface of the crate.
#[derive(Error, Debug)]
pub enum LovefieldError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Syntax(#[from] BuilderError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("value of type {found} does not match declared column type {expected}")]
    Type { expected: String, found: String },
    #[error("backing store failure: {0}")]
    Store(#[from] anyhow::Error),
    #[error("transaction cancelled")]
    Cancelled,
    #[error("invariant breach: {0}")]
    Unknown(String),
}

impl LovefieldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LovefieldError::NotFound(_) => ErrorKind::NotFound,
            LovefieldError::Syntax(BuilderError::ReplaceWithoutPrimaryKey(_)) => ErrorKind::Constraint,
            LovefieldError::Syntax(_) => ErrorKind::Syntax,
            LovefieldError::Index(IndexError::NotFound(_)) => ErrorKind::NotFound,
            LovefieldError::Index(_) => ErrorKind::Constraint,
            LovefieldError::Schema(SchemaError::TableNotFound(_) | SchemaError::ColumnNotFound(..)) => {
                ErrorKind::NotFound
            }
            LovefieldError::Schema(_) => ErrorKind::Constraint,
            LovefieldError::Tx(TxError::Cancelled) => ErrorKind::Cancelled,
            LovefieldError::Tx(_) => ErrorKind::Scope,
            LovefieldError::Type { .. } => ErrorKind::Type,
            LovefieldError::Store(_) => ErrorKind::Store,
            LovefieldError::Cancelled => ErrorKind::Cancelled,
            LovefieldError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, LovefieldError>;
