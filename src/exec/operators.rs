//! Physical operator implementations: iterator-style adapters over
//! `RelationEntry` streams so prefix-aware attribute access survives joins.

use crate::error::LovefieldError;
use crate::key::Key;
use crate::plan::expr::{ColumnRef, Expr};
use crate::plan::logical::{AggregateFn, SortDir};
use crate::plan::physical::PhysicalPlan;
use crate::relation::{Relation, RelationEntry};
use crate::schema::{Row, RowId};
use crate::table::TableSnapshot;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};

/// Executes a read-only physical plan against a snapshot of the tables it
/// touches. Write nodes (`InsertValues`/`Update`/`Delete`) only exist so the
/// planner can carry them through `build_physical`; they're executed by the
/// transaction runtime, which has the mutable access and journal this
/// module deliberately doesn't.
pub fn execute(plan: &PhysicalPlan, tables: &HashMap<String, &dyn TableSnapshot>) -> Result<Relation, LovefieldError> {
    match plan {
        PhysicalPlan::FullTableScan { table } => {
            let snapshot = lookup(tables, table)?;
            Ok(Relation::from_rows(snapshot.scan(), BTreeSet::from([table.clone()])))
        }
        PhysicalPlan::IndexScan { table, columns, range } => {
            let snapshot = lookup(tables, table)?;
            let ids = snapshot.index_lookup(columns, range.as_ref());
            let rows = ids.into_iter().filter_map(|id| snapshot.get(id)).collect();
            Ok(Relation::from_rows(rows, BTreeSet::from([table.clone()])))
        }
        PhysicalPlan::PrimaryKeyLookup { table, key } => {
            let snapshot = lookup(tables, table)?;
            let rows: Vec<Row> = snapshot
                .primary_key_lookup(key)
                .and_then(|id| snapshot.get(id))
                .into_iter()
                .collect();
            Ok(Relation::from_rows(rows, BTreeSet::from([table.clone()])))
        }
        PhysicalPlan::Filter { input, predicate } => {
            let rel = execute(input, tables)?;
            let entries = rel.into_entries().into_iter().filter(|e| predicate.eval_bool(e)).collect();
            Ok(Relation::new(entries, BTreeSet::new()))
        }
        PhysicalPlan::Project { input, columns, aliases } => {
            let rel = execute(input, tables)?;
            let entries = rel
                .into_entries()
                .into_iter()
                .map(|e| project_entry(&e, columns, aliases))
                .collect();
            Ok(Relation::new(entries, BTreeSet::new()))
        }
        PhysicalPlan::NestedLoopJoin { left, right, predicate } => {
            let left_rel = execute(left, tables)?;
            let right_rel = execute(right, tables)?;
            let left_table = left_rel.tables().iter().next().cloned().unwrap_or_default();
            let right_table = right_rel.tables().iter().next().cloned().unwrap_or_default();
            let mut out = Vec::new();
            for l in left_rel.entries() {
                for r in right_rel.entries() {
                    let combined = RelationEntry::combine_entries(l, &left_table, r, &right_table);
                    if predicate.eval_bool(&combined) {
                        out.push(combined);
                    }
                }
            }
            let mut joined_tables = left_rel.tables().clone();
            joined_tables.extend(right_rel.tables().iter().cloned());
            Ok(Relation::new(out, joined_tables))
        }
        PhysicalPlan::HashJoin {
            left,
            right,
            left_key,
            right_key,
            residual,
        } => {
            let left_rel = execute(left, tables)?;
            let right_rel = execute(right, tables)?;
            let left_table = left_rel.tables().iter().next().cloned().unwrap_or_default();
            let right_table = right_rel.tables().iter().next().cloned().unwrap_or_default();

            let mut buckets: HashMap<Value, Vec<&RelationEntry>> = HashMap::new();
            for r in right_rel.entries() {
                buckets.entry(col_value(right_key, r)).or_default().push(r);
            }
            let mut out = Vec::new();
            for l in left_rel.entries() {
                let key = col_value(left_key, l);
                if let Some(matches) = buckets.get(&key) {
                    for r in matches {
                        let combined = RelationEntry::combine_entries(l, &left_table, r, &right_table);
                        if residual.as_ref().is_none_or(|p| p.eval_bool(&combined)) {
                            out.push(combined);
                        }
                    }
                }
            }
            let mut joined_tables = left_rel.tables().clone();
            joined_tables.extend(right_rel.tables().iter().cloned());
            Ok(Relation::new(out, joined_tables))
        }
        PhysicalPlan::OrderBy { input, keys } => {
            let rel = execute(input, tables)?;
            let tables_set = rel.tables().clone();
            let mut entries = rel.into_entries();
            entries.sort_by(|a, b| {
                for key in keys {
                    let va = a.get(&key.column).cloned().unwrap_or(Value::Null);
                    let vb = b.get(&key.column).cloned().unwrap_or(Value::Null);
                    let ord = match key.dir {
                        SortDir::Asc => va.cmp(&vb),
                        SortDir::Desc => vb.cmp(&va),
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            Ok(Relation::new(entries, tables_set))
        }
        PhysicalPlan::Skip { input, n } => {
            let rel = execute(input, tables)?;
            let tables_set = rel.tables().clone();
            let entries = rel.into_entries().into_iter().skip(*n).collect();
            Ok(Relation::new(entries, tables_set))
        }
        PhysicalPlan::Limit { input, n } => {
            let rel = execute(input, tables)?;
            let tables_set = rel.tables().clone();
            let entries = rel.into_entries().into_iter().take(*n).collect();
            Ok(Relation::new(entries, tables_set))
        }
        PhysicalPlan::GroupByAggregate { input, columns, fns } => {
            let rel = execute(input, tables)?;
            Ok(group_by_aggregate(rel, columns, fns))
        }
        PhysicalPlan::Union { inputs } => {
            let rels = inputs.iter().map(|p| execute(p, tables)).collect::<Result<Vec<_>, _>>()?;
            Ok(Relation::union(&rels))
        }
        PhysicalPlan::Intersect { inputs } => {
            let rels = inputs.iter().map(|p| execute(p, tables)).collect::<Result<Vec<_>, _>>()?;
            Ok(Relation::intersect(&rels))
        }
        PhysicalPlan::Except { left, right } => {
            let l = execute(left, tables)?;
            let r = execute(right, tables)?;
            Ok(Relation::except(&l, &r))
        }
        PhysicalPlan::Empty => Ok(Relation::empty()),
        PhysicalPlan::InsertValues { .. } | PhysicalPlan::Update { .. } | PhysicalPlan::Delete { .. } => Err(
            LovefieldError::Unknown("write plans must be executed through a transaction, not exec::execute".into()),
        ),
    }
}

fn lookup<'a>(tables: &'a HashMap<String, &'a dyn TableSnapshot>, name: &str) -> Result<&'a dyn TableSnapshot, LovefieldError> {
    tables
        .get(name)
        .copied()
        .ok_or_else(|| LovefieldError::NotFound(format!("table `{name}`")))
}

fn col_value(col: &ColumnRef, entry: &RelationEntry) -> Value {
    Expr::Column(col.clone()).eval(entry)
}

fn project_entry(entry: &RelationEntry, columns: &[String], aliases: &[Option<String>]) -> RelationEntry {
    let mut payload = IndexMap::new();
    for (col, alias) in columns.iter().zip(aliases.iter()) {
        let name = alias.clone().unwrap_or_else(|| col.clone());
        payload.insert(name, entry.get(col).cloned().unwrap_or(Value::Null));
    }
    RelationEntry::from_row(Row::new(entry.row_id(), payload), None, false)
}

fn group_by_aggregate(rel: Relation, columns: &[String], fns: &[crate::plan::logical::Aggregation]) -> Relation {
    let mut groups: IndexMap<Vec<Value>, Vec<RelationEntry>> = IndexMap::new();
    for entry in rel.into_entries() {
        let key: Vec<Value> = columns.iter().map(|c| entry.get(c).cloned().unwrap_or(Value::Null)).collect();
        groups.entry(key).or_default().push(entry);
    }
    if groups.is_empty() && columns.is_empty() {
        groups.insert(vec![], vec![]);
    }
    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut payload = IndexMap::new();
        for (col, val) in columns.iter().zip(key.into_iter()) {
            payload.insert(col.clone(), val);
        }
        let mut entry = RelationEntry::from_row(Row::new(RowId::MAX, payload), None, false);
        for agg in fns {
            let values: Vec<f64> = members.iter().filter_map(|m| m.get(&agg.column)).filter_map(as_f64).collect();
            let result = apply_aggregate(agg.func, &members, &agg.column, &values);
            entry = entry.with_alias(&agg.alias, result);
        }
        out.push(entry);
    }
    Relation::new(out, BTreeSet::new())
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Number(n) => Some(*n),
        _ => None,
    }
}

fn apply_aggregate(func: AggregateFn, members: &[RelationEntry], column: &str, values: &[f64]) -> Value {
    match func {
        AggregateFn::Count => Value::Integer(members.iter().filter(|m| m.get(column).is_some_and(|v| !v.is_null())).count() as i64),
        AggregateFn::Sum => Value::Number(values.iter().sum()),
        AggregateFn::Avg => {
            if values.is_empty() {
                Value::Null
            } else {
                Value::Number(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        AggregateFn::Min => values.iter().cloned().fold(None, min_fold).map(Value::Number).unwrap_or(Value::Null),
        AggregateFn::Max => values.iter().cloned().fold(None, max_fold).map(Value::Number).unwrap_or(Value::Null),
        AggregateFn::Distinct => {
            let distinct: BTreeSet<_> = members.iter().filter_map(|m| m.get(column)).map(|v| format!("{v:?}")).collect();
            Value::Integer(distinct.len() as i64)
        }
        AggregateFn::StdDev => {
            if values.is_empty() {
                Value::Null
            } else {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
                Value::Number(variance.sqrt())
            }
        }
        AggregateFn::GeoMean => {
            if values.is_empty() || values.iter().any(|v| *v <= 0.0) {
                Value::Null
            } else {
                let product_of_logs: f64 = values.iter().map(|v| v.ln()).sum::<f64>() / values.len() as f64;
                Value::Number(product_of_logs.exp())
            }
        }
    }
}

fn min_fold(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

fn max_fold(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::expr::ColumnRef;
    use crate::plan::logical::OrderKey;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::table::Table;
    use crate::value::ValueType;
    use std::sync::Arc;

    fn schema() -> Arc<TableSchema> {
        Arc::new(TableSchema {
            name: "t".into(),
            columns: vec![ColumnSchema {
                name: "n".into(),
                ty: ValueType::Integer,
                nullable: false,
                alias: None,
            }],
            primary_key: None,
            secondary_indices: vec![],
            foreign_keys: vec![],
        })
    }

    fn table_with(values: &[i64]) -> Table {
        let mut t = Table::new(schema());
        for &v in values {
            let id = t.allocate_row_id();
            let mut m = IndexMap::new();
            m.insert("n".to_string(), Value::Integer(v));
            t.insert(Row::new(id, m)).unwrap();
        }
        t
    }

    #[test]
    fn full_table_scan_then_order_by_desc() {
        let t = table_with(&[3, 1, 2]);
        let mut tables: HashMap<String, &dyn TableSnapshot> = HashMap::new();
        tables.insert("t".into(), &t);
        let plan = PhysicalPlan::OrderBy {
            input: Box::new(PhysicalPlan::FullTableScan { table: "t".into() }),
            keys: vec![OrderKey {
                column: "n".into(),
                dir: SortDir::Desc,
            }],
        };
        let rel = execute(&plan, &tables).unwrap();
        let values: Vec<_> = rel.entries().iter().map(|e| e.get("n").cloned().unwrap()).collect();
        assert_eq!(values, vec![Value::Integer(3), Value::Integer(2), Value::Integer(1)]);
    }

    #[test]
    fn filter_keeps_only_matching_entries() {
        let t = table_with(&[1, 2, 3]);
        let mut tables: HashMap<String, &dyn TableSnapshot> = HashMap::new();
        tables.insert("t".into(), &t);
        let plan = PhysicalPlan::Filter {
            input: Box::new(PhysicalPlan::FullTableScan { table: "t".into() }),
            predicate: Expr::column(ColumnRef::unqualified("n")).eq(Expr::lit(2i64)),
        };
        let rel = execute(&plan, &tables).unwrap();
        assert_eq!(rel.len(), 1);
    }

    #[test]
    fn group_by_aggregate_computes_sum_and_count() {
        let t = table_with(&[1, 2, 3, 4]);
        let mut tables: HashMap<String, &dyn TableSnapshot> = HashMap::new();
        tables.insert("t".into(), &t);
        let plan = PhysicalPlan::GroupByAggregate {
            input: Box::new(PhysicalPlan::FullTableScan { table: "t".into() }),
            columns: vec![],
            fns: vec![
                crate::plan::logical::Aggregation {
                    func: AggregateFn::Sum,
                    column: "n".into(),
                    alias: "total".into(),
                },
                crate::plan::logical::Aggregation {
                    func: AggregateFn::Count,
                    column: "n".into(),
                    alias: "cnt".into(),
                },
            ],
        };
        let rel = execute(&plan, &tables).unwrap();
        assert_eq!(rel.len(), 1);
        assert_eq!(rel.entries()[0].get("total"), Some(&Value::Number(10.0)));
        assert_eq!(rel.entries()[0].get("cnt"), Some(&Value::Integer(4)));
    }
}
