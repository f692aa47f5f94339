//! Expression traversal helpers shared by the algebrizer and optimizer.

use ahash::AHashSet;

use crate::expr::{AggregateExpr, BinaryOp, SqlExpr, SqlValue};

/// Pre-order walk over an expression tree.
///
/// Embedded subquery plans are not descended into; the optimizer recurses
/// into those with a fresh scope of its own.
pub fn visit(expr: &SqlExpr, f: &mut impl FnMut(&SqlExpr)) {
    f(expr);
    match expr {
        SqlExpr::Literal(_)
        | SqlExpr::Column(_)
        | SqlExpr::Subquery(_)
        | SqlExpr::Exists(_) => {}
        SqlExpr::Unary { expr, .. } | SqlExpr::IsNull { expr, .. } => visit(expr, f),
        SqlExpr::Convert { expr, .. } => visit(expr, f),
        SqlExpr::Binary { left, right, .. } => {
            visit(left, f);
            visit(right, f);
        }
        SqlExpr::Between {
            expr, low, high, ..
        } => {
            visit(expr, f);
            visit(low, f);
            visit(high, f);
        }
        SqlExpr::ScalarFn { args, .. } | SqlExpr::Tuple(args) => {
            for arg in args {
                visit(arg, f);
            }
        }
        SqlExpr::Aggregate(agg) => {
            if let Some(arg) = &agg.arg {
                visit(arg, f);
            }
        }
    }
}

/// The `(select_id, table)` pairs referenced by column nodes.
pub fn referenced_tables(expr: &SqlExpr) -> AHashSet<(u32, String)> {
    let mut tables = AHashSet::new();
    visit(expr, &mut |node| {
        if let SqlExpr::Column(col) = node {
            tables.insert((col.select_id, col.table.clone()));
        }
    });
    tables
}

pub fn contains_aggregate(expr: &SqlExpr) -> bool {
    let mut found = false;
    visit(expr, &mut |node| {
        if matches!(node, SqlExpr::Aggregate(_)) {
            found = true;
        }
    });
    found
}

pub fn contains_subquery(expr: &SqlExpr) -> bool {
    let mut found = false;
    visit(expr, &mut |node| {
        if matches!(node, SqlExpr::Subquery(_) | SqlExpr::Exists(_)) {
            found = true;
        }
    });
    found
}

/// Every aggregate call inside the expression, in traversal order.
pub fn collect_aggregates(expr: &SqlExpr) -> Vec<AggregateExpr> {
    let mut aggregates = vec![];
    visit(expr, &mut |node| {
        if let SqlExpr::Aggregate(agg) = node {
            aggregates.push(agg.clone());
        }
    });
    aggregates
}

/// Replace aggregate calls with already-computed results.
pub fn substitute_aggregates(
    expr: &SqlExpr,
    lookup: &impl Fn(&AggregateExpr) -> Option<SqlValue>,
) -> SqlExpr {
    match expr {
        SqlExpr::Aggregate(agg) => match lookup(agg) {
            Some(value) => SqlExpr::Literal(value),
            None => expr.clone(),
        },
        SqlExpr::Literal(_)
        | SqlExpr::Column(_)
        | SqlExpr::Subquery(_)
        | SqlExpr::Exists(_) => expr.clone(),
        SqlExpr::Unary { op, expr } => SqlExpr::Unary {
            op: *op,
            expr: Box::new(substitute_aggregates(expr, lookup)),
        },
        SqlExpr::IsNull { expr, negated } => SqlExpr::IsNull {
            expr: Box::new(substitute_aggregates(expr, lookup)),
            negated: *negated,
        },
        SqlExpr::Convert { expr, to } => SqlExpr::Convert {
            expr: Box::new(substitute_aggregates(expr, lookup)),
            to: *to,
        },
        SqlExpr::Binary { left, op, right } => SqlExpr::Binary {
            left: Box::new(substitute_aggregates(left, lookup)),
            op: *op,
            right: Box::new(substitute_aggregates(right, lookup)),
        },
        SqlExpr::Between {
            expr,
            low,
            high,
            negated,
        } => SqlExpr::Between {
            expr: Box::new(substitute_aggregates(expr, lookup)),
            low: Box::new(substitute_aggregates(low, lookup)),
            high: Box::new(substitute_aggregates(high, lookup)),
            negated: *negated,
        },
        SqlExpr::ScalarFn { func, args } => SqlExpr::ScalarFn {
            func: *func,
            args: args
                .iter()
                .map(|a| substitute_aggregates(a, lookup))
                .collect(),
        },
        SqlExpr::Tuple(items) => SqlExpr::Tuple(
            items
                .iter()
                .map(|i| substitute_aggregates(i, lookup))
                .collect(),
        ),
    }
}

/// Split a predicate into its top-level AND conjuncts.
pub fn split_conjuncts(expr: &SqlExpr) -> Vec<SqlExpr> {
    match expr {
        SqlExpr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            let mut conjuncts = split_conjuncts(left);
            conjuncts.extend(split_conjuncts(right));
            conjuncts
        }
        other => vec![other.clone()],
    }
}

/// Re-join conjuncts with AND; `None` when the list is empty.
pub fn conjoin(conjuncts: Vec<SqlExpr>) -> Option<SqlExpr> {
    conjuncts.into_iter().reduce(|acc, next| SqlExpr::Binary {
        left: Box::new(acc),
        op: BinaryOp::And,
        right: Box::new(next),
    })
}
