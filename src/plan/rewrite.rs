//! Logical-plan rewrites, applied in a fixed, idempotent order.
//! Index-aware access-path selection (rules 3-5) happens during physical
//! emission in `plan::physical`, since it needs live index cost estimates;
//! this module covers the purely syntactic rewrites (1, 2, 6).

use crate::plan::logical::LogicalPlan;

/// Runs rules 1, 2 and 6 to a fixpoint.
pub fn rewrite(plan: LogicalPlan) -> LogicalPlan {
    let mut current = plan;
    loop {
        let next = eliminate_empty(combine_project(combine_select(push_select(current.clone()))));
        if plans_equal_shape(&next, &current) {
            return next;
        }
        current = next;
    }
}

/// Rule 1: push `Select` below `Project`, and below a commutative join when
/// its free columns all come from one side.
fn push_select(plan: LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::Select { input, predicate } => match *input {
            LogicalPlan::Project { input: inner, columns, aliases } => LogicalPlan::Project {
                input: Box::new(push_select(LogicalPlan::Select {
                    input: inner,
                    predicate,
                })),
                columns,
                aliases,
            },
            LogicalPlan::Join {
                join_type,
                left,
                right,
                predicate: join_pred,
            } => {
                let left_tables = left.source_tables();
                let free: Vec<_> = predicate.free_columns().into_iter().map(|c| c.table.clone()).collect();
                let all_from_left = free.iter().all(|t| t.as_deref().is_none_or(|t| left_tables.iter().any(|lt| lt == t)));
                let right_tables = right.source_tables();
                let all_from_right = free.iter().all(|t| t.as_deref().is_none_or(|t| right_tables.iter().any(|rt| rt == t)));
                if all_from_left && !left_tables.is_empty() {
                    LogicalPlan::Join {
                        join_type,
                        left: Box::new(push_select(LogicalPlan::Select {
                            input: left,
                            predicate,
                        })),
                        right: Box::new(push_select(*right)),
                        predicate: join_pred,
                    }
                } else if all_from_right && !right_tables.is_empty() {
                    LogicalPlan::Join {
                        join_type,
                        left: Box::new(push_select(*left)),
                        right: Box::new(push_select(LogicalPlan::Select {
                            input: right,
                            predicate,
                        })),
                        predicate: join_pred,
                    }
                } else {
                    LogicalPlan::Select {
                        input: Box::new(LogicalPlan::Join {
                            join_type,
                            left: Box::new(push_select(*left)),
                            right: Box::new(push_select(*right)),
                            predicate: join_pred,
                        }),
                        predicate,
                    }
                }
            }
            other => LogicalPlan::Select {
                input: Box::new(push_select(other)),
                predicate,
            },
        },
        other => map_children(other, push_select),
    }
}

/// Rule 2a: combine stacked `Select` into a conjunction.
fn combine_select(plan: LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::Select { input, predicate } => match *input {
            LogicalPlan::Select {
                input: inner,
                predicate: inner_pred,
            } => combine_select(LogicalPlan::Select {
                input: inner,
                predicate: inner_pred.and(predicate),
            }),
            other => LogicalPlan::Select {
                input: Box::new(combine_select(other)),
                predicate,
            },
        },
        other => map_children(other, combine_select),
    }
}

/// Rule 2b: combine stacked `Project` by composition (outer columns select
/// from the inner projection's output names).
fn combine_project(plan: LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::Project { input, columns, aliases } => match *input {
            LogicalPlan::Project { input: inner, .. } => combine_project(LogicalPlan::Project {
                input: inner,
                columns,
                aliases,
            }),
            other => LogicalPlan::Project {
                input: Box::new(combine_project(other)),
                columns,
                aliases,
            },
        },
        other => map_children(other, combine_project),
    }
}

/// Rule 6: any operator with an empty input reducible to empty collapses
/// to the empty relation singleton.
fn eliminate_empty(plan: LogicalPlan) -> LogicalPlan {
    let plan = map_children(plan, eliminate_empty);
    match plan {
        LogicalPlan::Select { input, .. } if matches!(*input, LogicalPlan::Empty { .. }) => *input,
        LogicalPlan::Project { input, .. } if matches!(*input, LogicalPlan::Empty { .. }) => *input,
        LogicalPlan::OrderBy { input, .. } if matches!(*input, LogicalPlan::Empty { .. }) => *input,
        LogicalPlan::Limit { input, .. } if matches!(*input, LogicalPlan::Empty { .. }) => *input,
        LogicalPlan::Skip { input, .. } if matches!(*input, LogicalPlan::Empty { .. }) => *input,
        LogicalPlan::GroupBy { input, .. } if matches!(*input, LogicalPlan::Empty { .. }) => *input,
        LogicalPlan::Join { left, right, .. }
            if matches!(*left, LogicalPlan::Empty { .. }) || matches!(*right, LogicalPlan::Empty { .. }) =>
        {
            let mut tables = left.source_tables();
            tables.extend(right.source_tables());
            LogicalPlan::Empty { tables }
        }
        LogicalPlan::Union { inputs } if inputs.is_empty() => LogicalPlan::Empty { tables: vec![] },
        LogicalPlan::Intersect { inputs } if inputs.is_empty() || inputs.iter().any(|p| matches!(p, LogicalPlan::Empty { .. })) => {
            LogicalPlan::Empty {
                tables: inputs.first().map(|p| p.source_tables()).unwrap_or_default(),
            }
        }
        other => other,
    }
}

fn map_children(plan: LogicalPlan, f: impl Fn(LogicalPlan) -> LogicalPlan + Copy) -> LogicalPlan {
    match plan {
        LogicalPlan::Select { input, predicate } => LogicalPlan::Select {
            input: Box::new(f(*input)),
            predicate,
        },
        LogicalPlan::Project { input, columns, aliases } => LogicalPlan::Project {
            input: Box::new(f(*input)),
            columns,
            aliases,
        },
        LogicalPlan::Join {
            join_type,
            left,
            right,
            predicate,
        } => LogicalPlan::Join {
            join_type,
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            predicate,
        },
        LogicalPlan::GroupBy { input, columns } => LogicalPlan::GroupBy {
            input: Box::new(f(*input)),
            columns,
        },
        LogicalPlan::Aggregation { input, fns } => LogicalPlan::Aggregation {
            input: Box::new(f(*input)),
            fns,
        },
        LogicalPlan::OrderBy { input, keys } => LogicalPlan::OrderBy {
            input: Box::new(f(*input)),
            keys,
        },
        LogicalPlan::Limit { input, n } => LogicalPlan::Limit { input: Box::new(f(*input)), n },
        LogicalPlan::Skip { input, n } => LogicalPlan::Skip { input: Box::new(f(*input)), n },
        LogicalPlan::Union { inputs } => LogicalPlan::Union {
            inputs: inputs.into_iter().map(f).collect(),
        },
        LogicalPlan::Intersect { inputs } => LogicalPlan::Intersect {
            inputs: inputs.into_iter().map(f).collect(),
        },
        LogicalPlan::Except { left, right } => LogicalPlan::Except {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
        },
        other @ (LogicalPlan::TableAccess { .. }
        | LogicalPlan::InsertValues { .. }
        | LogicalPlan::Update { .. }
        | LogicalPlan::Delete { .. }
        | LogicalPlan::Empty { .. }) => other,
    }
}

/// Cheap structural-equality stand-in used only to detect the rewrite
/// fixpoint; compares the pretty-printed shape rather than deriving
/// `PartialEq` across `Expr`'s function-free tree (kept intentionally
/// coarse since false-negatives here just cost one extra harmless pass).
fn plans_equal_shape(a: &LogicalPlan, b: &LogicalPlan) -> bool {
    format!("{a:?}") == format!("{b:?}")
}
