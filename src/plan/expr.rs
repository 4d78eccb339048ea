//! Predicate and projection expressions, evaluated against one
//! `RelationEntry` at a time.

use crate::relation::RelationEntry;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn apply(self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering::*;
        let ord = lhs.cmp(rhs);
        match self {
            CmpOp::Eq => ord == Equal,
            CmpOp::Ne => ord != Equal,
            CmpOp::Lt => ord == Less,
            CmpOp::Le => ord != Greater,
            CmpOp::Gt => ord == Greater,
            CmpOp::Ge => ord != Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn unqualified(column: impl Into<String>) -> Self {
        ColumnRef {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        ColumnRef {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

/// A predicate/projection expression tree, evaluated against one
/// `RelationEntry` at a time.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Logic(LogicOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn column(col: ColumnRef) -> Self {
        Expr::Column(col)
    }

    pub fn lit(v: impl Into<Value>) -> Self {
        Expr::Literal(v.into())
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Cmp(CmpOp::Eq, Box::new(self), Box::new(other))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::Logic(LogicOp::And, Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Logic(LogicOp::Or, Box::new(self), Box::new(other))
    }

    /// The free columns this expression reads, used by predicate pushdown
    /// to decide which side of a join a `Select` can move to.
    pub fn free_columns(&self) -> Vec<&ColumnRef> {
        match self {
            Expr::Column(c) => vec![c],
            Expr::Literal(_) => vec![],
            Expr::Cmp(_, l, r) | Expr::Logic(_, l, r) => {
                let mut v = l.free_columns();
                v.extend(r.free_columns());
                v
            }
            Expr::Not(e) => e.free_columns(),
        }
    }

    pub fn eval(&self, entry: &RelationEntry) -> Value {
        match self {
            Expr::Column(c) => match &c.table {
                Some(t) => entry.get_qualified(t, &c.column).cloned().unwrap_or(Value::Null),
                None => entry.get(&c.column).cloned().unwrap_or(Value::Null),
            },
            Expr::Literal(v) => v.clone(),
            Expr::Cmp(op, l, r) => Value::Boolean(op.apply(&l.eval(entry), &r.eval(entry))),
            Expr::Logic(op, l, r) => {
                let (Value::Boolean(lb), rb_expr) = (l.eval(entry), r) else {
                    return Value::Boolean(false);
                };
                match op {
                    LogicOp::And => Value::Boolean(lb && matches!(rb_expr.eval(entry), Value::Boolean(true))),
                    LogicOp::Or => Value::Boolean(lb || matches!(rb_expr.eval(entry), Value::Boolean(true))),
                }
            }
            Expr::Not(e) => Value::Boolean(!matches!(e.eval(entry), Value::Boolean(true))),
        }
    }

    pub fn eval_bool(&self, entry: &RelationEntry) -> bool {
        matches!(self.eval(entry), Value::Boolean(true))
    }

    /// True when this is `column op literal`, the shape index-scan
    /// substitution needs to recognize; returns the column and the
    /// `(op, literal)` pair.
    pub fn as_single_column_cmp(&self) -> Option<(&ColumnRef, CmpOp, &Value)> {
        if let Expr::Cmp(op, l, r) = self {
            if let (Expr::Column(c), Expr::Literal(v)) = (l.as_ref(), r.as_ref()) {
                return Some((c, *op, v));
            }
        }
        None
    }
}
