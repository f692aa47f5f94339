//! Constant folding and trivial-filter elimination.
//!
//! Any expression that is row- and store-independent is evaluated once at
//! plan time and replaced by its literal result. A filter whose predicate
//! folds to a truthy literal disappears; one that folds to a non-truthy
//! literal (including NULL) replaces its subtree with an empty stage that
//! still declares the right columns.
//!
//! Folding never fails the rule: an expression whose evaluation errors
//! (overflow, bad conversion) is left in place so the error surfaces at
//! execution time, where the iterator contract handles it.

use std::sync::Arc;

use crate::error::DocsqlResult;
use crate::expr::SqlExpr;
use crate::optimizer::{OptimizationRule, map_stages};
use crate::plan::{
    EmptyStage, ExecutionCtx, EvalCtx, FilterStage, GroupByStage, JoinStage, OrderByStage,
    OrderTerm, PlanStage, ProjectStage, ProjectedColumn,
};

pub struct Simplify;

impl OptimizationRule for Simplify {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn apply(&self, plan: &Arc<PlanStage>) -> DocsqlResult<Arc<PlanStage>> {
        let ctx = EvalCtx::new(vec![], ExecutionCtx::detached());
        map_stages(plan, &|node| Ok(simplify_node(node, &ctx)))
    }
}

fn simplify_node(node: &Arc<PlanStage>, ctx: &EvalCtx) -> Arc<PlanStage> {
    match node.as_ref() {
        PlanStage::Filter(stage) => {
            let predicate = fold(&stage.predicate, ctx);
            if let SqlExpr::Literal(value) = &predicate {
                return if value.is_truthy() {
                    Arc::clone(&stage.child)
                } else {
                    Arc::new(PlanStage::Empty(EmptyStage::new(stage.columns())))
                };
            }
            if predicate == stage.predicate {
                Arc::clone(node)
            } else {
                Arc::new(PlanStage::Filter(FilterStage::new(
                    Arc::clone(&stage.child),
                    predicate,
                )))
            }
        }
        PlanStage::Project(stage) => {
            let projections = fold_projections(&stage.projections, ctx);
            if projections == stage.projections {
                Arc::clone(node)
            } else {
                Arc::new(PlanStage::Project(ProjectStage::new(
                    Arc::clone(&stage.child),
                    projections,
                )))
            }
        }
        PlanStage::GroupBy(stage) => {
            let keys: Vec<SqlExpr> = stage.keys.iter().map(|k| fold(k, ctx)).collect();
            let projections = fold_projections(&stage.projections, ctx);
            if keys == stage.keys && projections == stage.projections {
                Arc::clone(node)
            } else {
                Arc::new(PlanStage::GroupBy(GroupByStage::new(
                    Arc::clone(&stage.child),
                    keys,
                    projections,
                )))
            }
        }
        PlanStage::OrderBy(stage) => {
            let terms: Vec<OrderTerm> = stage
                .terms
                .iter()
                .map(|t| OrderTerm {
                    expr: fold(&t.expr, ctx),
                    ascending: t.ascending,
                })
                .collect();
            if terms == stage.terms {
                Arc::clone(node)
            } else {
                Arc::new(PlanStage::OrderBy(OrderByStage::new(
                    Arc::clone(&stage.child),
                    terms,
                )))
            }
        }
        PlanStage::Join(stage) => {
            let predicate = stage.predicate.as_ref().map(|p| fold(p, ctx));
            if predicate == stage.predicate {
                Arc::clone(node)
            } else {
                Arc::new(PlanStage::Join(JoinStage {
                    predicate,
                    ..stage.clone()
                }))
            }
        }
        _ => Arc::clone(node),
    }
}

fn fold_projections(projections: &[ProjectedColumn], ctx: &EvalCtx) -> Vec<ProjectedColumn> {
    projections
        .iter()
        .map(|p| ProjectedColumn {
            column: p.column.clone(),
            expr: fold(&p.expr, ctx),
            referenced_only: p.referenced_only,
        })
        .collect()
}

/// Fold constant subtrees, largest first.
fn fold(expr: &SqlExpr, ctx: &EvalCtx) -> SqlExpr {
    if matches!(expr, SqlExpr::Literal(_)) {
        return expr.clone();
    }
    if expr.is_constant() {
        if let Ok(value) = expr.evaluate(ctx) {
            return SqlExpr::Literal(value);
        }
        return expr.clone();
    }
    match expr {
        SqlExpr::Literal(_)
        | SqlExpr::Column(_)
        | SqlExpr::Subquery(_)
        | SqlExpr::Exists(_) => expr.clone(),
        SqlExpr::Unary { op, expr } => SqlExpr::Unary {
            op: *op,
            expr: Box::new(fold(expr, ctx)),
        },
        SqlExpr::IsNull { expr, negated } => SqlExpr::IsNull {
            expr: Box::new(fold(expr, ctx)),
            negated: *negated,
        },
        SqlExpr::Convert { expr, to } => SqlExpr::Convert {
            expr: Box::new(fold(expr, ctx)),
            to: *to,
        },
        SqlExpr::Binary { left, op, right } => SqlExpr::Binary {
            left: Box::new(fold(left, ctx)),
            op: *op,
            right: Box::new(fold(right, ctx)),
        },
        SqlExpr::Between {
            expr,
            low,
            high,
            negated,
        } => SqlExpr::Between {
            expr: Box::new(fold(expr, ctx)),
            low: Box::new(fold(low, ctx)),
            high: Box::new(fold(high, ctx)),
            negated: *negated,
        },
        SqlExpr::ScalarFn { func, args } => SqlExpr::ScalarFn {
            func: *func,
            args: args.iter().map(|a| fold(a, ctx)).collect(),
        },
        SqlExpr::Tuple(items) => {
            SqlExpr::Tuple(items.iter().map(|i| fold(i, ctx)).collect())
        }
        SqlExpr::Aggregate(agg) => {
            let mut agg = agg.clone();
            agg.arg = agg.arg.map(|a| Box::new(fold(&a, ctx)));
            SqlExpr::Aggregate(agg)
        }
    }
}
