//! Cross-join promotion.
//!
//! A filter sitting on a predicate-free cross or inner join is taken apart
//! into its AND conjuncts. Conjuncts that span both sides become the inner-join
//! predicate; conjuncts confined to one side move below the join as a filter
//! over that side (where the pushdown pass can reach the source); anything
//! else — subquery-bearing conjuncts included — stays where it was.

use std::sync::Arc;

use ahash::AHashSet;

use crate::error::DocsqlResult;
use crate::expr::SqlExpr;
use crate::expr::visitor::{conjoin, contains_subquery, referenced_tables, split_conjuncts};
use crate::optimizer::{OptimizationRule, map_stages};
use crate::plan::{Column, FilterStage, JoinKind, JoinStage, PlanStage};

pub struct PromoteJoins;

impl OptimizationRule for PromoteJoins {
    fn name(&self) -> &'static str {
        "promote-joins"
    }

    fn apply(&self, plan: &Arc<PlanStage>) -> DocsqlResult<Arc<PlanStage>> {
        map_stages(plan, &promote)
    }
}

fn promote(node: &Arc<PlanStage>) -> DocsqlResult<Arc<PlanStage>> {
    let PlanStage::Filter(filter) = node.as_ref() else {
        return Ok(Arc::clone(node));
    };
    let PlanStage::Join(join) = filter.child.as_ref() else {
        return Ok(Arc::clone(node));
    };
    if !matches!(join.kind, JoinKind::Cross | JoinKind::Inner) || join.predicate.is_some() {
        return Ok(Arc::clone(node));
    }

    let left_tables = table_set(&join.left.columns());
    let right_tables = table_set(&join.right.columns());

    let mut left_only = vec![];
    let mut right_only = vec![];
    let mut spanning = vec![];
    let mut kept = vec![];
    for conjunct in split_conjuncts(&filter.predicate) {
        // Correlated or cached subqueries stay above the join untouched.
        if contains_subquery(&conjunct) {
            kept.push(conjunct);
            continue;
        }
        let refs = referenced_tables(&conjunct);
        let in_left = refs.iter().any(|t| left_tables.contains(t));
        let in_right = refs.iter().any(|t| right_tables.contains(t));
        let in_scope = refs
            .iter()
            .all(|t| left_tables.contains(t) || right_tables.contains(t));
        match (in_scope, in_left, in_right) {
            (true, true, true) => spanning.push(conjunct),
            (true, true, false) => left_only.push(conjunct),
            (true, false, true) => right_only.push(conjunct),
            _ => kept.push(conjunct),
        }
    }

    if spanning.is_empty() && left_only.is_empty() && right_only.is_empty() {
        return Ok(Arc::clone(node));
    }

    let left = sink(&join.left, left_only)?;
    let right = sink(&join.right, right_only)?;
    let kind = if spanning.is_empty() {
        join.kind
    } else {
        JoinKind::Inner
    };
    let promoted = Arc::new(PlanStage::Join(JoinStage {
        left,
        right,
        kind,
        predicate: conjoin(spanning),
        ..join.clone()
    }));
    Ok(match conjoin(kept) {
        Some(predicate) => Arc::new(PlanStage::Filter(FilterStage::new(promoted, predicate))),
        None => promoted,
    })
}

/// Push one-sided conjuncts below the join, re-promoting in case the child
/// is itself a cross join.
fn sink(child: &Arc<PlanStage>, conjuncts: Vec<SqlExpr>) -> DocsqlResult<Arc<PlanStage>> {
    match conjoin(conjuncts) {
        Some(predicate) => promote(&Arc::new(PlanStage::Filter(FilterStage::new(
            Arc::clone(child),
            predicate,
        )))),
        None => Ok(Arc::clone(child)),
    }
}

fn table_set(columns: &[Column]) -> AHashSet<(u32, String)> {
    columns
        .iter()
        .map(|c| (c.select_id, c.table.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, ColumnRef, SqlType, SqlValue};
    use crate::plan::SourceStage;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::store::StoreType;

    fn table(name: &str, columns: &[&str]) -> TableSchema {
        TableSchema {
            name: name.into(),
            collection: name.into(),
            columns: columns
                .iter()
                .map(|c| ColumnSchema {
                    name: (*c).to_string(),
                    field_path: (*c).to_string(),
                    sql_type: SqlType::Int,
                    store_type: StoreType::Int,
                })
                .collect(),
        }
    }

    fn source(name: &str, alias: &str, columns: &[&str]) -> Arc<PlanStage> {
        Arc::new(PlanStage::Source(SourceStage::for_table(
            "test",
            alias,
            1,
            &table(name, columns),
        )))
    }

    fn col(alias: &str, name: &str) -> SqlExpr {
        SqlExpr::Column(ColumnRef {
            select_id: 1,
            table: alias.into(),
            name: name.into(),
            sql_type: SqlType::Int,
        })
    }

    fn binary(left: SqlExpr, op: BinaryOp, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn and(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        binary(left, BinaryOp::And, right)
    }

    fn cross(left: Arc<PlanStage>, right: Arc<PlanStage>) -> Arc<PlanStage> {
        Arc::new(PlanStage::Join(JoinStage::new(
            left,
            right,
            JoinKind::Cross,
            None,
        )))
    }

    #[test]
    fn test_spanning_conjunct_becomes_inner_predicate() {
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            cross(source("users", "u", &["id"]), source("orders", "o", &["user_id"])),
            binary(col("u", "id"), BinaryOp::Eq, col("o", "user_id")),
        )));
        let optimized = PromoteJoins.apply(&plan).unwrap();
        let PlanStage::Join(join) = optimized.as_ref() else {
            panic!("Expected Join at root, got: {}", optimized.describe());
        };
        assert_eq!(join.kind, JoinKind::Inner);
        assert!(join.predicate.is_some());
    }

    #[test]
    fn test_one_sided_conjunct_sinks_below_join() {
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            cross(
                source("users", "u", &["id", "age"]),
                source("orders", "o", &["user_id"]),
            ),
            and(
                binary(col("u", "id"), BinaryOp::Eq, col("o", "user_id")),
                binary(col("u", "age"), BinaryOp::Gt, SqlExpr::Literal(SqlValue::Int(30))),
            ),
        )));
        let optimized = PromoteJoins.apply(&plan).unwrap();
        let PlanStage::Join(join) = optimized.as_ref() else {
            panic!("Expected Join at root, got: {}", optimized.describe());
        };
        assert_eq!(join.kind, JoinKind::Inner);
        let PlanStage::Filter(left_filter) = join.left.as_ref() else {
            panic!("Expected Filter on left side, got: {}", join.left.describe());
        };
        assert!(matches!(
            left_filter.child.as_ref(),
            PlanStage::Source(_)
        ));
    }

    #[test]
    fn test_promotion_recurses_through_cross_chains() {
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            cross(
                cross(source("a", "a", &["x"]), source("b", "b", &["y"])),
                source("c", "c", &["z"]),
            ),
            and(
                binary(col("a", "x"), BinaryOp::Eq, col("b", "y")),
                binary(col("b", "y"), BinaryOp::Eq, col("c", "z")),
            ),
        )));
        let optimized = PromoteJoins.apply(&plan).unwrap();
        let PlanStage::Join(outer) = optimized.as_ref() else {
            panic!("Expected Join at root, got: {}", optimized.describe());
        };
        assert_eq!(outer.kind, JoinKind::Inner);
        let PlanStage::Join(inner) = outer.left.as_ref() else {
            panic!("Expected nested Join, got: {}", outer.left.describe());
        };
        assert_eq!(inner.kind, JoinKind::Inner);
        assert!(inner.predicate.is_some());
    }

    #[test]
    fn test_predicate_less_inner_join_gains_predicate() {
        // JOIN without ON algebrizes as Inner with no predicate; the WHERE
        // conjunct still becomes the join predicate.
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            Arc::new(PlanStage::Join(JoinStage::new(
                source("users", "u", &["id"]),
                source("orders", "o", &["user_id"]),
                JoinKind::Inner,
                None,
            ))),
            binary(col("u", "id"), BinaryOp::Eq, col("o", "user_id")),
        )));
        let optimized = PromoteJoins.apply(&plan).unwrap();
        let PlanStage::Join(join) = optimized.as_ref() else {
            panic!("Expected Join at root, got: {}", optimized.describe());
        };
        assert_eq!(join.kind, JoinKind::Inner);
        assert!(join.predicate.is_some());
    }

    #[test]
    fn test_out_of_scope_conjunct_stays_in_filter() {
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            cross(source("users", "u", &["id"]), source("orders", "o", &["user_id"])),
            and(
                binary(col("u", "id"), BinaryOp::Eq, col("o", "user_id")),
                binary(col("x", "other"), BinaryOp::Eq, col("u", "id")),
            ),
        )));
        let optimized = PromoteJoins.apply(&plan).unwrap();
        let PlanStage::Filter(filter) = optimized.as_ref() else {
            panic!("Expected retained Filter, got: {}", optimized.describe());
        };
        let PlanStage::Join(join) = filter.child.as_ref() else {
            panic!("Expected Join below Filter, got: {}", filter.child.describe());
        };
        assert_eq!(join.kind, JoinKind::Inner);
        assert!(join.predicate.is_some());
    }

    #[test]
    fn test_left_join_untouched() {
        let join = Arc::new(PlanStage::Join(JoinStage::new(
            source("users", "u", &["id"]),
            source("orders", "o", &["user_id"]),
            JoinKind::Left,
            Some(binary(col("u", "id"), BinaryOp::Eq, col("o", "user_id"))),
        )));
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            Arc::clone(&join),
            binary(col("u", "id"), BinaryOp::Gt, SqlExpr::Literal(SqlValue::Int(0))),
        )));
        let optimized = PromoteJoins.apply(&plan).unwrap();
        assert!(Arc::ptr_eq(&plan, &optimized));
    }
}
