//! Physical plan: the tree `exec` walks. Built from a rewritten
//! `LogicalPlan` by `build_physical`, which performs the rules that need
//! live index state — join reordering by cardinality, primary-key lookup
//! substitution, and index-scan substitution — picking, for each candidate
//! access path, the minimum `Index::cost(range)` with ties broken by
//! (a) primary key > unique > non-unique, (b) declaration order.

use crate::index::Index;
use crate::key::{Key, KeyRange};
use crate::plan::expr::{CmpOp, ColumnRef, Expr};
use crate::plan::logical::{Aggregation, Assignment, JoinType, LogicalPlan, OrderKey};
use crate::schema::Row;
use crate::table::Table;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PhysicalPlan {
    FullTableScan {
        table: String,
    },
    IndexScan {
        table: String,
        columns: Vec<usize>,
        range: Option<KeyRange>,
    },
    PrimaryKeyLookup {
        table: String,
        key: Key,
    },
    Filter {
        input: Box<PhysicalPlan>,
        predicate: Expr,
    },
    Project {
        input: Box<PhysicalPlan>,
        columns: Vec<String>,
        aliases: Vec<Option<String>>,
    },
    NestedLoopJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        predicate: Expr,
    },
    HashJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        left_key: ColumnRef,
        right_key: ColumnRef,
        residual: Option<Expr>,
    },
    OrderBy {
        input: Box<PhysicalPlan>,
        keys: Vec<OrderKey>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        n: usize,
    },
    Skip {
        input: Box<PhysicalPlan>,
        n: usize,
    },
    GroupByAggregate {
        input: Box<PhysicalPlan>,
        columns: Vec<String>,
        fns: Vec<Aggregation>,
    },
    Union {
        inputs: Vec<PhysicalPlan>,
    },
    Intersect {
        inputs: Vec<PhysicalPlan>,
    },
    Except {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
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
    Empty,
}

/// Builds a physical plan from an already-rewritten logical plan, consulting
/// `tables` (by name) to cost candidate access paths. `hash_join_memory_threshold`
/// bounds which equi-joins get a `HashJoin`: the build side's estimated row
/// count must fit under it, or the join falls back to `NestedLoopJoin`.
pub fn build_physical(plan: LogicalPlan, tables: &HashMap<String, &Table>, hash_join_memory_threshold: usize) -> PhysicalPlan {
    match plan {
        LogicalPlan::TableAccess { table } => PhysicalPlan::FullTableScan { table },
        LogicalPlan::Select { input, predicate } => build_select(*input, predicate, tables, hash_join_memory_threshold),
        LogicalPlan::Project { input, columns, aliases } => PhysicalPlan::Project {
            input: Box::new(build_physical(*input, tables, hash_join_memory_threshold)),
            columns,
            aliases,
        },
        LogicalPlan::Join {
            join_type: JoinType::Inner,
            left,
            right,
            predicate,
        } => build_join(*left, *right, predicate, tables, hash_join_memory_threshold),
        LogicalPlan::GroupBy { input, columns } => PhysicalPlan::GroupByAggregate {
            input: Box::new(build_physical(*input, tables, hash_join_memory_threshold)),
            columns,
            fns: vec![],
        },
        LogicalPlan::Aggregation { input, fns } => match build_physical(*input, tables, hash_join_memory_threshold) {
            PhysicalPlan::GroupByAggregate { input, columns, .. } => PhysicalPlan::GroupByAggregate { input, columns, fns },
            other => PhysicalPlan::GroupByAggregate {
                input: Box::new(other),
                columns: vec![],
                fns,
            },
        },
        LogicalPlan::OrderBy { input, keys } => PhysicalPlan::OrderBy {
            input: Box::new(build_physical(*input, tables, hash_join_memory_threshold)),
            keys,
        },
        LogicalPlan::Limit { input, n } => PhysicalPlan::Limit {
            input: Box::new(build_physical(*input, tables, hash_join_memory_threshold)),
            n,
        },
        LogicalPlan::Skip { input, n } => PhysicalPlan::Skip {
            input: Box::new(build_physical(*input, tables, hash_join_memory_threshold)),
            n,
        },
        LogicalPlan::Union { inputs } => PhysicalPlan::Union {
            inputs: inputs.into_iter().map(|p| build_physical(p, tables, hash_join_memory_threshold)).collect(),
        },
        LogicalPlan::Intersect { inputs } => PhysicalPlan::Intersect {
            inputs: inputs.into_iter().map(|p| build_physical(p, tables, hash_join_memory_threshold)).collect(),
        },
        LogicalPlan::Except { left, right } => PhysicalPlan::Except {
            left: Box::new(build_physical(*left, tables, hash_join_memory_threshold)),
            right: Box::new(build_physical(*right, tables, hash_join_memory_threshold)),
        },
        LogicalPlan::InsertValues { table, rows, allow_replace } => PhysicalPlan::InsertValues { table, rows, allow_replace },
        LogicalPlan::Update { table, assignments, predicate } => PhysicalPlan::Update { table, assignments, predicate },
        LogicalPlan::Delete { table, predicate } => PhysicalPlan::Delete { table, predicate },
        LogicalPlan::Empty { .. } => PhysicalPlan::Empty,
    }
}

/// Rules 4 and 5: substitute `Select(TableAccess(t), col op lit)` with a
/// `PrimaryKeyLookup` (single-column PK, equality) or an `IndexScan`,
/// whichever access path costs less; a bare `Select` over anything else
/// just wraps a `Filter` around the child's own physical plan.
fn build_select(input: LogicalPlan, predicate: Expr, tables: &HashMap<String, &Table>, hash_join_memory_threshold: usize) -> PhysicalPlan {
    if let LogicalPlan::TableAccess { table: table_name } = &input {
        if let Some(table) = tables.get(table_name) {
            if let Some((col, op, lit)) = predicate.as_single_column_cmp() {
                if col.table.as_deref().is_none_or(|t| t == table_name) {
                    if let Some(col_idx) = table.schema.column_index(&col.column) {
                        let pk_is_this_column = table.schema.primary_key.as_deref() == Some(&[col_idx][..]);
                        if pk_is_this_column && op == CmpOp::Eq {
                            if let Some(pk) = &table.primary_key_index {
                                let key = Key::single(lit.clone());
                                let scan_cost = table.row_count();
                                if pk.cost(Some(&KeyRange::only(key.clone()))) <= scan_cost {
                                    return PhysicalPlan::PrimaryKeyLookup {
                                        table: table_name.clone(),
                                        key,
                                    };
                                }
                            }
                        }
                        if let Some(index) = table.index_for(&[col_idx]) {
                            let range = range_for_cmp(op, lit.clone());
                            let index_cost = index.cost(Some(&range));
                            let scan_cost = table.row_count();
                            if index_cost <= scan_cost {
                                return PhysicalPlan::Filter {
                                    input: Box::new(PhysicalPlan::IndexScan {
                                        table: table_name.clone(),
                                        columns: vec![col_idx],
                                        range: Some(range),
                                    }),
                                    predicate,
                                };
                            }
                        }
                    }
                }
            }
        }
    }
    PhysicalPlan::Filter {
        input: Box::new(build_physical(input, tables, hash_join_memory_threshold)),
        predicate,
    }
}

fn range_for_cmp(op: CmpOp, lit: crate::value::Value) -> KeyRange {
    let key = Key::single(lit);
    match op {
        CmpOp::Eq => KeyRange::only(key),
        CmpOp::Lt => KeyRange::upper_bound(key, true),
        CmpOp::Le => KeyRange::upper_bound(key, false),
        CmpOp::Gt => KeyRange::lower_bound(key, true),
        CmpOp::Ge => KeyRange::lower_bound(key, false),
        CmpOp::Ne => KeyRange::all(),
    }
}

/// Rule 3 (greedy left-deep reordering by estimated cardinality) plus the
/// hash-vs-nested-loop choice: an equality predicate on bare columns from
/// each side gets a `HashJoin` as long as the build side (the smaller,
/// already-reordered-to-the-left input) fits under `hash_join_memory_threshold`
/// rows; anything else falls back to the always-correct `NestedLoopJoin`.
fn build_join(
    left: LogicalPlan,
    right: LogicalPlan,
    predicate: Expr,
    tables: &HashMap<String, &Table>,
    hash_join_memory_threshold: usize,
) -> PhysicalPlan {
    let left_card = estimate_cardinality(&left, tables);
    let right_card = estimate_cardinality(&right, tables);
    let (left, right) = if right_card < left_card { (right, left) } else { (left, right) };
    let build_side_card = left_card.min(right_card);

    let left_tables: Vec<String> = left.source_tables();
    let right_tables: Vec<String> = right.source_tables();
    let left_phys = Box::new(build_physical(left, tables, hash_join_memory_threshold));
    let right_phys = Box::new(build_physical(right, tables, hash_join_memory_threshold));

    if build_side_card <= hash_join_memory_threshold {
        if let Some((lc, rc)) = equality_join_columns(&predicate, &left_tables, &right_tables) {
            return PhysicalPlan::HashJoin {
                left: left_phys,
                right: right_phys,
                left_key: lc,
                right_key: rc,
                residual: None,
            };
        }
    }
    PhysicalPlan::NestedLoopJoin {
        left: left_phys,
        right: right_phys,
        predicate,
    }
}

fn equality_join_columns(predicate: &Expr, left_tables: &[String], right_tables: &[String]) -> Option<(ColumnRef, ColumnRef)> {
    if let Expr::Cmp(CmpOp::Eq, l, r) = predicate {
        if let (Expr::Column(lc), Expr::Column(rc)) = (l.as_ref(), r.as_ref()) {
            let l_on_left = lc.table.as_deref().is_none_or(|t| left_tables.iter().any(|lt| lt == t));
            let r_on_right = rc.table.as_deref().is_none_or(|t| right_tables.iter().any(|rt| rt == t));
            if l_on_left && r_on_right {
                return Some((lc.clone(), rc.clone()));
            }
            let l_on_right = lc.table.as_deref().is_none_or(|t| right_tables.iter().any(|rt| rt == t));
            let r_on_left = rc.table.as_deref().is_none_or(|t| left_tables.iter().any(|lt| lt == t));
            if l_on_right && r_on_left {
                return Some((rc.clone(), lc.clone()));
            }
        }
    }
    None
}

fn estimate_cardinality(plan: &LogicalPlan, tables: &HashMap<String, &Table>) -> usize {
    plan.source_tables()
        .iter()
        .map(|t| tables.get(t).map(|t| t.row_count()).unwrap_or(usize::MAX))
        .sum()
}

impl PhysicalPlan {
    /// An indented tree dump, handy for tests and for debugging plan choice.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        match self {
            PhysicalPlan::FullTableScan { table } => out.push_str(&format!("{pad}FullTableScan({table})\n")),
            PhysicalPlan::IndexScan { table, columns, .. } => out.push_str(&format!("{pad}IndexScan({table}, cols={columns:?})\n")),
            PhysicalPlan::PrimaryKeyLookup { table, .. } => out.push_str(&format!("{pad}PrimaryKeyLookup({table})\n")),
            PhysicalPlan::Filter { input, .. } => {
                out.push_str(&format!("{pad}Filter\n"));
                input.explain_into(out, depth + 1);
            }
            PhysicalPlan::Project { input, columns, .. } => {
                out.push_str(&format!("{pad}Project({columns:?})\n"));
                input.explain_into(out, depth + 1);
            }
            PhysicalPlan::NestedLoopJoin { left, right, .. } => {
                out.push_str(&format!("{pad}NestedLoopJoin\n"));
                left.explain_into(out, depth + 1);
                right.explain_into(out, depth + 1);
            }
            PhysicalPlan::HashJoin { left, right, .. } => {
                out.push_str(&format!("{pad}HashJoin\n"));
                left.explain_into(out, depth + 1);
                right.explain_into(out, depth + 1);
            }
            PhysicalPlan::OrderBy { input, keys } => {
                out.push_str(&format!("{pad}OrderBy({} keys)\n", keys.len()));
                input.explain_into(out, depth + 1);
            }
            PhysicalPlan::Limit { input, n } => {
                out.push_str(&format!("{pad}Limit({n})\n"));
                input.explain_into(out, depth + 1);
            }
            PhysicalPlan::Skip { input, n } => {
                out.push_str(&format!("{pad}Skip({n})\n"));
                input.explain_into(out, depth + 1);
            }
            PhysicalPlan::GroupByAggregate { input, columns, fns } => {
                out.push_str(&format!("{pad}GroupByAggregate({columns:?}, {} fns)\n", fns.len()));
                input.explain_into(out, depth + 1);
            }
            PhysicalPlan::Union { inputs } => {
                out.push_str(&format!("{pad}Union\n"));
                for i in inputs {
                    i.explain_into(out, depth + 1);
                }
            }
            PhysicalPlan::Intersect { inputs } => {
                out.push_str(&format!("{pad}Intersect\n"));
                for i in inputs {
                    i.explain_into(out, depth + 1);
                }
            }
            PhysicalPlan::Except { left, right } => {
                out.push_str(&format!("{pad}Except\n"));
                left.explain_into(out, depth + 1);
                right.explain_into(out, depth + 1);
            }
            PhysicalPlan::InsertValues { table, rows, .. } => out.push_str(&format!("{pad}InsertValues({table}, {} rows)\n", rows.len())),
            PhysicalPlan::Update { table, .. } => out.push_str(&format!("{pad}Update({table})\n")),
            PhysicalPlan::Delete { table, .. } => out.push_str(&format!("{pad}Delete({table})\n")),
            PhysicalPlan::Empty => out.push_str(&format!("{pad}Empty\n")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::expr::{ColumnRef, Expr};
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::value::ValueType;

    fn schema(name: &str) -> Arc<TableSchema> {
        Arc::new(TableSchema {
            name: name.to_owned(),
            columns: vec![ColumnSchema {
                name: "id".into(),
                ty: ValueType::Integer,
                nullable: false,
                alias: None,
            }],
            primary_key: Some(vec![0]),
            secondary_indices: vec![],
            foreign_keys: vec![],
        })
    }

    #[test]
    fn select_on_primary_key_equality_becomes_lookup() {
        let table = Table::new(schema("users"));
        let mut tables = HashMap::new();
        tables.insert("users".to_string(), &table);

        let logical = LogicalPlan::Select {
            input: Box::new(LogicalPlan::TableAccess { table: "users".into() }),
            predicate: Expr::column(ColumnRef::unqualified("id")).eq(Expr::lit(7i64)),
        };
        let physical = build_physical(logical, &tables, 10_000);
        assert!(matches!(physical, PhysicalPlan::PrimaryKeyLookup { .. }));
    }

    #[test]
    fn select_on_non_indexed_column_stays_a_filtered_scan() {
        let table = Table::new(schema("users"));
        let mut tables = HashMap::new();
        tables.insert("users".to_string(), &table);

        let logical = LogicalPlan::Select {
            input: Box::new(LogicalPlan::TableAccess { table: "users".into() }),
            predicate: Expr::column(ColumnRef::unqualified("missing")).eq(Expr::lit(1i64)),
        };
        let physical = build_physical(logical, &tables, 10_000);
        match physical {
            PhysicalPlan::Filter { input, .. } => assert!(matches!(*input, PhysicalPlan::FullTableScan { .. })),
            _ => panic!("expected a Filter over a full table scan"),
        }
    }

    fn populated_table(name: &str, row_count: i64) -> Table {
        let mut table = Table::new(schema(name));
        for i in 0..row_count {
            let mut payload = indexmap::IndexMap::new();
            payload.insert("id".to_string(), crate::value::Value::Integer(i));
            table.insert(Row::new(i as u64, payload)).unwrap();
        }
        table
    }

    #[test]
    fn equi_join_under_threshold_becomes_hash_join() {
        let left = populated_table("l", 5);
        let right = populated_table("r", 5);
        let mut tables = HashMap::new();
        tables.insert("l".to_string(), &left);
        tables.insert("r".to_string(), &right);

        let logical = LogicalPlan::Join {
            join_type: JoinType::Inner,
            left: Box::new(LogicalPlan::TableAccess { table: "l".into() }),
            right: Box::new(LogicalPlan::TableAccess { table: "r".into() }),
            predicate: Expr::column(ColumnRef::qualified("l", "id")).eq(Expr::column(ColumnRef::qualified("r", "id"))),
        };
        let physical = build_physical(logical, &tables, 10_000);
        assert!(matches!(physical, PhysicalPlan::HashJoin { .. }));
    }

    #[test]
    fn equi_join_over_threshold_falls_back_to_nested_loop() {
        let left = populated_table("l", 5);
        let right = populated_table("r", 5);
        let mut tables = HashMap::new();
        tables.insert("l".to_string(), &left);
        tables.insert("r".to_string(), &right);

        let logical = LogicalPlan::Join {
            join_type: JoinType::Inner,
            left: Box::new(LogicalPlan::TableAccess { table: "l".into() }),
            right: Box::new(LogicalPlan::TableAccess { table: "r".into() }),
            predicate: Expr::column(ColumnRef::qualified("l", "id")).eq(Expr::column(ColumnRef::qualified("r", "id"))),
        };
        let physical = build_physical(logical, &tables, 0);
        assert!(matches!(physical, PhysicalPlan::NestedLoopJoin { .. }));
    }

    #[test]
    fn explain_renders_an_indented_tree() {
        let physical = PhysicalPlan::Filter {
            input: Box::new(PhysicalPlan::FullTableScan { table: "t".into() }),
            predicate: Expr::lit(true),
        };
        let text = physical.explain();
        assert!(text.starts_with("Filter\n"));
        assert!(text.contains("  FullTableScan(t)\n"));
    }
}
