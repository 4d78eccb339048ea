//! Typed query builder DSL: a fluent Rust API instead of a parsed query
//! string, since callers build queries programmatically. Clauses are legal
//! exactly once; calling one twice or executing before its required clauses
//! are set raises `BuilderError` at the call site, not at `exec()` time.

use crate::error::{BuilderError, LovefieldError, Result};
use crate::plan::expr::Expr;
use crate::plan::logical::{Aggregation, Assignment, JoinType, LogicalPlan, OrderKey};
use crate::schema::Row;
use crate::tx::Transaction;

#[derive(Default, Debug)]
pub struct Select {
    table: Option<String>,
    columns: Option<(Vec<String>, Vec<Option<String>>)>,
    predicate: Option<Expr>,
    joins: Vec<(String, Expr)>,
    group_by: Option<Vec<String>>,
    aggregations: Vec<Aggregation>,
    order: Option<Vec<OrderKey>>,
    limit: Option<usize>,
    skip: Option<usize>,
}

/// Entry point: `select(["a", "b"])`. An empty column list means "all
/// columns", resolved against the table's schema when it executes.
pub fn select(columns: impl IntoIterator<Item = impl Into<String>>) -> Select {
    let cols: Vec<String> = columns.into_iter().map(Into::into).collect();
    Select {
        columns: Some((cols.clone(), cols.into_iter().map(|_| None).collect())),
        ..Default::default()
    }
}

impl Select {
    pub fn from(mut self, table: impl Into<String>) -> Result<Self> {
        if self.table.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("from")));
        }
        self.table = Some(table.into());
        Ok(self)
    }

    pub fn filter(mut self, predicate: Expr) -> Result<Self> {
        if self.predicate.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("where")));
        }
        self.predicate = Some(predicate);
        Ok(self)
    }

    pub fn inner_join(mut self, table: impl Into<String>, on: Expr) -> Self {
        self.joins.push((table.into(), on));
        self
    }

    pub fn group_by(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        if self.group_by.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("group_by")));
        }
        self.group_by = Some(columns.into_iter().map(Into::into).collect());
        Ok(self)
    }

    pub fn aggregate(mut self, agg: Aggregation) -> Self {
        self.aggregations.push(agg);
        self
    }

    pub fn order_by(mut self, keys: impl IntoIterator<Item = OrderKey>) -> Result<Self> {
        if self.order.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("order_by")));
        }
        self.order = Some(keys.into_iter().collect());
        Ok(self)
    }

    pub fn limit(mut self, n: usize) -> Result<Self> {
        if self.limit.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("limit")));
        }
        self.limit = Some(n);
        Ok(self)
    }

    pub fn skip(mut self, n: usize) -> Result<Self> {
        if self.skip.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("skip")));
        }
        self.skip = Some(n);
        Ok(self)
    }

    fn into_logical(self) -> Result<LogicalPlan> {
        let table = self.table.ok_or(LovefieldError::Syntax(BuilderError::MissingClause("from")))?;
        let mut plan = LogicalPlan::TableAccess { table: table.clone() };

        for (joined_table, on) in self.joins {
            plan = LogicalPlan::Join {
                join_type: JoinType::Inner,
                left: Box::new(plan),
                right: Box::new(LogicalPlan::TableAccess { table: joined_table }),
                predicate: on,
            };
        }

        if let Some(predicate) = self.predicate {
            plan = LogicalPlan::Select {
                input: Box::new(plan),
                predicate,
            };
        }

        if let Some(columns) = self.group_by {
            plan = LogicalPlan::GroupBy {
                input: Box::new(plan),
                columns,
            };
        }
        if !self.aggregations.is_empty() {
            plan = LogicalPlan::Aggregation {
                input: Box::new(plan),
                fns: self.aggregations,
            };
        }

        if let Some((columns, aliases)) = self.columns {
            if !columns.is_empty() {
                plan = LogicalPlan::Project { input: Box::new(plan), columns, aliases };
            }
        }

        if let Some(keys) = self.order {
            plan = LogicalPlan::OrderBy { input: Box::new(plan), keys };
        }
        if let Some(n) = self.skip {
            plan = LogicalPlan::Skip { input: Box::new(plan), n };
        }
        if let Some(n) = self.limit {
            plan = LogicalPlan::Limit { input: Box::new(plan), n };
        }
        Ok(plan)
    }

    /// Compiles and runs the query against an open transaction.
    pub fn exec(self, tx: &mut Transaction<'_>) -> Result<crate::relation::Relation> {
        let logical = self.into_logical()?;
        tx.query_logical(logical)
    }
}

pub struct Insert {
    table: Option<String>,
    rows: Option<Vec<Row>>,
    allow_replace: bool,
}

pub fn insert() -> Insert {
    Insert {
        table: None,
        rows: None,
        allow_replace: false,
    }
}

impl Insert {
    pub fn into_table(mut self, table: impl Into<String>) -> Result<Self> {
        if self.table.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("into")));
        }
        self.table = Some(table.into());
        Ok(self)
    }

    pub fn values(mut self, rows: impl IntoIterator<Item = Row>) -> Result<Self> {
        if self.rows.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("values")));
        }
        self.rows = Some(rows.into_iter().collect());
        Ok(self)
    }

    pub fn allow_replace(mut self) -> Self {
        self.allow_replace = true;
        self
    }

    pub fn exec(self, tx: &mut Transaction<'_>) -> Result<()> {
        let table = self.table.ok_or(LovefieldError::Syntax(BuilderError::MissingClause("into")))?;
        let rows = self.rows.ok_or(LovefieldError::Syntax(BuilderError::MissingClause("values")))?;
        if rows.is_empty() {
            return Err(LovefieldError::Syntax(BuilderError::MissingClause("values")));
        }
        tx.insert(&table, rows, self.allow_replace)
    }
}

pub struct Update {
    table: String,
    assignments: Vec<Assignment>,
    predicate: Option<Expr>,
}

pub fn update(table: impl Into<String>) -> Update {
    Update {
        table: table.into(),
        assignments: Vec::new(),
        predicate: None,
    }
}

impl Update {
    pub fn set(mut self, column: impl Into<String>, value: impl Into<crate::value::Value>) -> Self {
        self.assignments.push(Assignment {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn filter(mut self, predicate: Expr) -> Result<Self> {
        if self.predicate.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("where")));
        }
        self.predicate = Some(predicate);
        Ok(self)
    }

    pub fn exec(self, tx: &mut Transaction<'_>) -> Result<usize> {
        tx.update(&self.table, &self.assignments, self.predicate.as_ref())
    }
}

pub struct Delete {
    table: Option<String>,
    predicate: Option<Expr>,
}

pub fn delete() -> Delete {
    Delete { table: None, predicate: None }
}

impl Delete {
    pub fn from(mut self, table: impl Into<String>) -> Result<Self> {
        if self.table.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("from")));
        }
        self.table = Some(table.into());
        Ok(self)
    }

    pub fn filter(mut self, predicate: Expr) -> Result<Self> {
        if self.predicate.is_some() {
            return Err(LovefieldError::Syntax(BuilderError::DoubledClause("where")));
        }
        self.predicate = Some(predicate);
        Ok(self)
    }

    pub fn exec(self, tx: &mut Transaction<'_>) -> Result<usize> {
        let table = self.table.ok_or(LovefieldError::Syntax(BuilderError::MissingClause("from")))?;
        tx.delete(&table, self.predicate.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Calling a clause twice raises `BuilderError` at the call site, not
    /// at `exec()`.
    #[test]
    fn doubled_from_clause_errors_immediately() {
        let s = select(Vec::<&str>::new()).from("users").unwrap();
        let err = s.from("users").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn missing_from_clause_errors_at_compile_time() {
        let s = select(Vec::<&str>::new());
        let err = s.into_logical().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn doubled_limit_clause_errors_immediately() {
        let s = select(Vec::<&str>::new()).from("users").unwrap().limit(1).unwrap();
        let err = s.limit(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }
}
