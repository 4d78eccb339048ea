//! Logical plan nodes. The query builder constructs these directly;
//! rewrites (`plan::rewrite`) transform them before physical emission.

use crate::plan::expr::Expr;
use crate::schema::Row;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Distinct,
    StdDev,
    GeoMean,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    pub func: AggregateFn,
    pub column: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub column: String,
    pub dir: SortDir,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: String,
    pub value: crate::value::Value,
}

#[derive(Debug, Clone)]
pub enum LogicalPlan {
    TableAccess {
        table: String,
    },
    Select {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Project {
        input: Box<LogicalPlan>,
        columns: Vec<String>,
        aliases: Vec<Option<String>>,
    },
    Join {
        join_type: JoinType,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        predicate: Expr,
    },
    GroupBy {
        input: Box<LogicalPlan>,
        columns: Vec<String>,
    },
    Aggregation {
        input: Box<LogicalPlan>,
        fns: Vec<Aggregation>,
    },
    OrderBy {
        input: Box<LogicalPlan>,
        keys: Vec<OrderKey>,
    },
    Limit {
        input: Box<LogicalPlan>,
        n: usize,
    },
    Skip {
        input: Box<LogicalPlan>,
        n: usize,
    },
    Union {
        inputs: Vec<LogicalPlan>,
    },
    Intersect {
        inputs: Vec<LogicalPlan>,
    },
    Except {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    InsertValues {
        table: String,
        rows: Vec<Arc<Row>>,
        allow_replace: bool,
    },
    Update {
        table: String,
        assignments: Vec<Assignment>,
        predicate: Option<Expr>,
    },
    Delete {
        table: String,
        predicate: Option<Expr>,
    },
    /// Any operator with an empty input reducible to empty collapses to
    /// this.
    Empty {
        tables: Vec<String>,
    },
}

impl LogicalPlan {
    /// The set of source tables this plan reads from, used to detect when
    /// predicate pushdown may move a `Select` below a join: a predicate
    /// whose free columns all come from one side can move there.
    pub fn source_tables(&self) -> Vec<String> {
        match self {
            LogicalPlan::TableAccess { table } => vec![table.clone()],
            LogicalPlan::Select { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::GroupBy { input, .. }
            | LogicalPlan::Aggregation { input, .. }
            | LogicalPlan::OrderBy { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Skip { input, .. } => input.source_tables(),
            LogicalPlan::Join { left, right, .. } => {
                let mut t = left.source_tables();
                t.extend(right.source_tables());
                t
            }
            LogicalPlan::Union { inputs } | LogicalPlan::Intersect { inputs } => {
                inputs.first().map(|p| p.source_tables()).unwrap_or_default()
            }
            LogicalPlan::Except { left, .. } => left.source_tables(),
            LogicalPlan::InsertValues { table, .. } | LogicalPlan::Update { table, .. } | LogicalPlan::Delete { table, .. } => {
                vec![table.clone()]
            }
            LogicalPlan::Empty { tables } => tables.clone(),
        }
    }
}
