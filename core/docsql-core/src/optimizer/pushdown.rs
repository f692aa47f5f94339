//! Native pushdown: move filters, limits and equality joins out of the
//! iterator tree and into source pipelines.
//!
//! Every rewrite here must be row-equivalent against the store's match
//! semantics, which differ from SQL around NULL: `$ne` and `$nin` accept
//! missing fields, so their translations carry an explicit null guard, and
//! an inner-join lookup is preceded by a null guard on the local key so a
//! missing key never pairs with a missing foreign key. Conjuncts that
//! cannot be translated exactly stay in the plan tree — partial pushdown of
//! an AND is fine, partial pushdown of an OR is not.

use std::sync::Arc;

use serde_json::json;

use crate::error::DocsqlResult;
use crate::expr::visitor::{conjoin, split_conjuncts};
use crate::expr::{BinaryOp, ColumnRef, SqlExpr, SqlValue};
use crate::optimizer::{OptimizationRule, map_stages};
use crate::plan::{
    FilterStage, JoinKind, JoinStage, JoinStrategy, LimitStage, PlanStage, SourceAppendStage,
    SourceStage,
};
use crate::schema::MappingRegistry;
use crate::store::{Document, PipelineStage};

pub struct Pushdown;

impl OptimizationRule for Pushdown {
    fn name(&self) -> &'static str {
        "pushdown"
    }

    fn apply(&self, plan: &Arc<PlanStage>) -> DocsqlResult<Arc<PlanStage>> {
        map_stages(plan, &|node| {
            Ok(match node.as_ref() {
                PlanStage::Filter(stage) => push_filter(node, stage),
                PlanStage::Limit(stage) => push_limit(node, stage),
                PlanStage::Join(stage) => push_join(node, stage),
                _ => Arc::clone(node),
            })
        })
    }
}

/// A scan reachable directly or through a correlation bracket. The bracket
/// only publishes rows the child emits, so annotating the scan below it is
/// row-equivalent.
fn scan_of(child: &Arc<PlanStage>) -> Option<(&SourceStage, Option<usize>)> {
    match child.as_ref() {
        PlanStage::Source(source) => Some((source, None)),
        PlanStage::SourceAppend(append) => match append.child.as_ref() {
            PlanStage::Source(source) => Some((source, Some(append.depth))),
            _ => None,
        },
        _ => None,
    }
}

fn rebracket(source: SourceStage, depth: Option<usize>) -> Arc<PlanStage> {
    let scan = Arc::new(PlanStage::Source(source));
    match depth {
        Some(depth) => Arc::new(PlanStage::SourceAppend(SourceAppendStage::new(scan, depth))),
        None => scan,
    }
}

fn push_filter(node: &Arc<PlanStage>, filter: &FilterStage) -> Arc<PlanStage> {
    let Some((source, depth)) = scan_of(&filter.child) else {
        return Arc::clone(node);
    };
    let mut pushed = source.clone();
    let mut kept = vec![];
    let mut moved = false;
    for conjunct in split_conjuncts(&filter.predicate) {
        match match_criteria(&conjunct, &source.mappings) {
            Some(criteria) => {
                pushed = pushed.with_stage(PipelineStage::Match(criteria));
                moved = true;
            }
            None => kept.push(conjunct),
        }
    }
    if !moved {
        return Arc::clone(node);
    }
    tracing::debug!(
        collection = %pushed.collection,
        kept = kept.len(),
        "filter pushed into source pipeline"
    );
    let child = rebracket(pushed, depth);
    match conjoin(kept) {
        Some(predicate) => Arc::new(PlanStage::Filter(FilterStage::new(child, predicate))),
        None => child,
    }
}

fn push_limit(node: &Arc<PlanStage>, limit: &LimitStage) -> Arc<PlanStage> {
    let Some((source, depth)) = scan_of(&limit.child) else {
        return Arc::clone(node);
    };
    let mut pushed = source.clone();
    if limit.skip > 0 {
        pushed = pushed.with_stage(PipelineStage::Skip(limit.skip));
    }
    if limit.limit < u64::MAX {
        pushed = pushed.with_stage(PipelineStage::Limit(limit.limit));
    }
    rebracket(pushed, depth)
}

/// Rewrite an equality join of two bare sources in the same database into a
/// `$lookup` + `$unwind` on the left source.
fn push_join(node: &Arc<PlanStage>, join: &JoinStage) -> Arc<PlanStage> {
    if join.strategy != JoinStrategy::NestedLoop
        || !matches!(join.kind, JoinKind::Inner | JoinKind::Left)
    {
        return Arc::clone(node);
    }
    let (PlanStage::Source(left), PlanStage::Source(right)) =
        (join.left.as_ref(), join.right.as_ref())
    else {
        return Arc::clone(node);
    };
    // The foreign side must be an unannotated scan; the lookup stage has no
    // slot for a foreign pipeline.
    if left.db != right.db || !right.pipeline.is_empty() {
        return Arc::clone(node);
    }
    let Some((local_col, foreign_col)) = equi_join_columns(join, left, right) else {
        return Arc::clone(node);
    };
    let Some(local_field) = left
        .mappings
        .field_path(&local_col.table, &local_col.name)
        .map(str::to_string)
    else {
        return Arc::clone(node);
    };
    let Some(foreign_field) = right
        .mappings
        .field_path(&foreign_col.table, &foreign_col.name)
        .map(str::to_string)
    else {
        return Arc::clone(node);
    };

    let mut merged = left.clone();
    if join.kind == JoinKind::Inner {
        // A missing local key would pair with missing foreign keys in the
        // store; SQL equality never matches NULL.
        merged = merged.with_stage(PipelineStage::Match(
            json!({ local_field.clone(): { "$ne": null } }),
        ));
    }
    merged = merged
        .with_stage(PipelineStage::Lookup {
            from: right.collection.clone(),
            local_field,
            foreign_field,
            as_field: right.alias.clone(),
        })
        .with_stage(PipelineStage::Unwind {
            path: right.alias.clone(),
            preserve_null_and_empty: join.kind == JoinKind::Left,
        });
    merged.columns.extend(right.columns.iter().cloned());
    merged
        .mappings
        .merge(&right.mappings.clone_with_prefix(&right.alias));
    tracing::debug!(
        left = %merged.collection,
        right = %right.collection,
        kind = ?join.kind,
        "join pushed down as lookup"
    );
    Arc::new(PlanStage::Source(merged))
}

/// Extract the join's column pair when the predicate is a single bare
/// column equality with one side from each input.
fn equi_join_columns<'a>(
    join: &'a JoinStage,
    left: &SourceStage,
    right: &SourceStage,
) -> Option<(&'a ColumnRef, &'a ColumnRef)> {
    let Some(SqlExpr::Binary {
        left: lhs,
        op: BinaryOp::Eq,
        right: rhs,
    }) = &join.predicate
    else {
        return None;
    };
    let (SqlExpr::Column(a), SqlExpr::Column(b)) = (lhs.as_ref(), rhs.as_ref()) else {
        return None;
    };
    let owns = |source: &SourceStage, col: &ColumnRef| {
        source
            .columns
            .iter()
            .any(|c| c.select_id == col.select_id && c.table == col.table && c.name == col.name)
    };
    if owns(left, a) && owns(right, b) {
        Some((a, b))
    } else if owns(left, b) && owns(right, a) {
        Some((b, a))
    } else {
        None
    }
}

/// Translate one predicate into `$match` criteria, or `None` when no exact
/// translation exists.
fn match_criteria(expr: &SqlExpr, mappings: &MappingRegistry) -> Option<Document> {
    match expr {
        SqlExpr::Binary { left, op, right } => match op {
            BinaryOp::And => {
                let l = match_criteria(left, mappings)?;
                let r = match_criteria(right, mappings)?;
                Some(json!({ "$and": [l, r] }))
            }
            BinaryOp::Or => {
                let l = match_criteria(left, mappings)?;
                let r = match_criteria(right, mappings)?;
                Some(json!({ "$or": [l, r] }))
            }
            BinaryOp::In | BinaryOp::NotIn => {
                let field = field_of(left, mappings)?;
                let SqlExpr::Tuple(items) = right.as_ref() else {
                    return None;
                };
                let values = items
                    .iter()
                    .map(literal_of)
                    .collect::<Option<Vec<_>>>()?;
                if *op == BinaryOp::In {
                    Some(json!({ field: { "$in": values } }))
                } else {
                    // NOT IN drops NULL subjects; $nin alone would keep them.
                    Some(json!({ "$and": [
                        { field.clone(): { "$nin": values } },
                        { field: { "$ne": null } },
                    ] }))
                }
            }
            _ if op.is_comparison() => {
                if let (Some(field), Some(value)) = (field_of(left, mappings), literal_of(right)) {
                    comparison_criteria(field, *op, value)
                } else if let (Some(field), Some(value)) =
                    (field_of(right, mappings), literal_of(left))
                {
                    comparison_criteria(field, flip(*op), value)
                } else {
                    None
                }
            }
            _ => None,
        },
        SqlExpr::IsNull { expr, negated } => {
            let field = field_of(expr, mappings)?;
            if *negated {
                Some(json!({ field: { "$ne": null } }))
            } else {
                Some(json!({ field: { "$eq": null } }))
            }
        }
        _ => None,
    }
}

fn comparison_criteria(field: String, op: BinaryOp, value: Document) -> Option<Document> {
    let rendered = match op {
        BinaryOp::Eq => json!({ field: { "$eq": value } }),
        // a != v drops NULL subjects; $ne alone would keep them.
        BinaryOp::Neq => json!({ "$and": [
            { field.clone(): { "$ne": value } },
            { field: { "$ne": null } },
        ] }),
        BinaryOp::Lt => json!({ field: { "$lt": value } }),
        BinaryOp::Lte => json!({ field: { "$lte": value } }),
        BinaryOp::Gt => json!({ field: { "$gt": value } }),
        BinaryOp::Gte => json!({ field: { "$gte": value } }),
        _ => return None,
    };
    Some(rendered)
}

fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Lte => BinaryOp::Gte,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Gte => BinaryOp::Lte,
        other => other,
    }
}

fn field_of(expr: &SqlExpr, mappings: &MappingRegistry) -> Option<String> {
    let SqlExpr::Column(col) = expr else {
        return None;
    };
    mappings.field_path(&col.table, &col.name).map(str::to_string)
}

/// A literal the store can compare natively. Temporal and object-id wire
/// forms are nested documents the match stage cannot order, and NULL never
/// translates — SQL comparison with NULL is NULL, not a match.
fn literal_of(expr: &SqlExpr) -> Option<Document> {
    let SqlExpr::Literal(value) = expr else {
        return None;
    };
    match value {
        SqlValue::Int(_) | SqlValue::Float(_) | SqlValue::Varchar(_) | SqlValue::Boolean(_) => {
            Some(value.to_document())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SqlType;
    use crate::plan::{ExecutionCtx, Row, drain};
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::store::StoreType;
    use crate::store::memory::MemoryStore;

    fn users_table() -> TableSchema {
        TableSchema {
            name: "users".into(),
            collection: "users".into(),
            columns: vec![
                column("id", "_id"),
                column("age", "age"),
                ColumnSchema {
                    name: "name".into(),
                    field_path: "name".into(),
                    sql_type: SqlType::Varchar,
                    store_type: StoreType::String,
                },
            ],
        }
    }

    fn orders_table() -> TableSchema {
        TableSchema {
            name: "orders".into(),
            collection: "orders".into(),
            columns: vec![column("id", "_id"), column("user_id", "user_id")],
        }
    }

    fn column(name: &str, path: &str) -> ColumnSchema {
        ColumnSchema {
            name: name.into(),
            field_path: path.into(),
            sql_type: SqlType::Int,
            store_type: StoreType::Int,
        }
    }

    fn seeded_ctx() -> ExecutionCtx {
        let store = MemoryStore::new();
        store.seed(
            "test",
            "users",
            vec![
                json!({ "_id": 1, "age": 34, "name": "alice" }),
                json!({ "_id": 2, "age": 19, "name": "bob" }),
                json!({ "_id": 3, "age": 45, "name": "carol" }),
                json!({ "_id": 4, "name": "dave" }),
            ],
        );
        store.seed(
            "test",
            "orders",
            vec![
                json!({ "_id": 10, "user_id": 1 }),
                json!({ "_id": 11, "user_id": 1 }),
                json!({ "_id": 12, "user_id": 3 }),
            ],
        );
        ExecutionCtx::new(Arc::new(store))
    }

    fn users_source() -> Arc<PlanStage> {
        Arc::new(PlanStage::Source(SourceStage::for_table(
            "test",
            "u",
            1,
            &users_table(),
        )))
    }

    fn col(alias: &str, name: &str, sql_type: SqlType) -> SqlExpr {
        SqlExpr::Column(ColumnRef {
            select_id: 1,
            table: alias.into(),
            name: name.into(),
            sql_type,
        })
    }

    fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            left: Box::new(left),
            op: BinaryOp::Eq,
            right: Box::new(right),
        }
    }

    fn run(plan: &Arc<PlanStage>, ctx: &ExecutionCtx) -> Vec<Row> {
        drain(plan.open(ctx).unwrap()).unwrap()
    }

    #[test]
    fn test_filter_becomes_match_stage() {
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            users_source(),
            eq(col("u", "age", SqlType::Int), SqlExpr::Literal(SqlValue::Int(34))),
        )));
        let optimized = Pushdown.apply(&plan).unwrap();
        let PlanStage::Source(source) = optimized.as_ref() else {
            panic!("Expected Source, got: {}", optimized.describe());
        };
        assert_eq!(
            source.pipeline,
            vec![PipelineStage::Match(json!({ "age": { "$eq": 34 } }))]
        );
        let ctx = seeded_ctx();
        assert_eq!(run(&optimized, &ctx), run(&plan, &ctx));
    }

    #[test]
    fn test_filter_then_limit_folds_into_pipeline() {
        let plan = Arc::new(PlanStage::Limit(LimitStage::new(
            Arc::new(PlanStage::Filter(FilterStage::new(
                users_source(),
                SqlExpr::Binary {
                    left: Box::new(col("u", "age", SqlType::Int)),
                    op: BinaryOp::Gt,
                    right: Box::new(SqlExpr::Literal(SqlValue::Int(20))),
                },
            ))),
            0,
            1,
        )));
        let optimized = Pushdown.apply(&plan).unwrap();
        let PlanStage::Source(source) = optimized.as_ref() else {
            panic!("Expected Source, got: {}", optimized.describe());
        };
        assert_eq!(
            source.pipeline,
            vec![
                PipelineStage::Match(json!({ "age": { "$gt": 20 } })),
                PipelineStage::Limit(1),
            ]
        );
        let ctx = seeded_ctx();
        assert_eq!(run(&optimized, &ctx), run(&plan, &ctx));
    }

    #[test]
    fn test_untranslatable_conjunct_stays_in_tree() {
        let translatable = eq(
            col("u", "age", SqlType::Int),
            SqlExpr::Literal(SqlValue::Int(34)),
        );
        let opaque = eq(
            SqlExpr::ScalarFn {
                func: crate::expr::ScalarFunction::Length,
                args: vec![col("u", "name", SqlType::Varchar)],
            },
            SqlExpr::Literal(SqlValue::Int(5)),
        );
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            users_source(),
            SqlExpr::Binary {
                left: Box::new(translatable),
                op: BinaryOp::And,
                right: Box::new(opaque.clone()),
            },
        )));
        let optimized = Pushdown.apply(&plan).unwrap();
        let PlanStage::Filter(filter) = optimized.as_ref() else {
            panic!("Expected Filter, got: {}", optimized.describe());
        };
        assert_eq!(filter.predicate, opaque);
        let PlanStage::Source(source) = filter.child.as_ref() else {
            panic!("Expected Source child, got: {}", filter.child.describe());
        };
        assert_eq!(source.pipeline.len(), 1);
        let ctx = seeded_ctx();
        assert_eq!(run(&optimized, &ctx), run(&plan, &ctx));
    }

    #[test]
    fn test_filter_reaches_scan_through_correlation_bracket() {
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            Arc::new(PlanStage::SourceAppend(SourceAppendStage::new(
                users_source(),
                0,
            ))),
            eq(
                col("u", "age", SqlType::Int),
                SqlExpr::Literal(SqlValue::Int(34)),
            ),
        )));
        let optimized = Pushdown.apply(&plan).unwrap();
        let PlanStage::SourceAppend(append) = optimized.as_ref() else {
            panic!("Expected SourceAppend, got: {}", optimized.describe());
        };
        let PlanStage::Source(source) = append.child.as_ref() else {
            panic!("Expected Source below bracket, got: {}", append.child.describe());
        };
        assert_eq!(
            source.pipeline,
            vec![PipelineStage::Match(json!({ "age": { "$eq": 34 } }))]
        );
        let ctx = seeded_ctx();
        assert_eq!(run(&optimized, &ctx), run(&plan, &ctx));
    }

    #[test]
    fn test_neq_translation_excludes_missing_fields() {
        let plan = Arc::new(PlanStage::Filter(FilterStage::new(
            users_source(),
            SqlExpr::Binary {
                left: Box::new(col("u", "age", SqlType::Int)),
                op: BinaryOp::Neq,
                right: Box::new(SqlExpr::Literal(SqlValue::Int(34))),
            },
        )));
        let optimized = Pushdown.apply(&plan).unwrap();
        let ctx = seeded_ctx();
        let rows = run(&optimized, &ctx);
        // dave has no age field: NULL != 34 is NULL, so he is dropped.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows, run(&plan, &ctx));
    }

    #[test]
    fn test_inner_join_becomes_lookup_unwind() {
        let join = join_plan(JoinKind::Inner);
        let optimized = Pushdown.apply(&join).unwrap();
        let PlanStage::Source(source) = optimized.as_ref() else {
            panic!("Expected Source, got: {}", optimized.describe());
        };
        let names: Vec<&str> = source.pipeline.iter().map(PipelineStage::name).collect();
        assert_eq!(names, vec!["$match", "$lookup", "$unwind"]);
        assert_eq!(source.columns.len(), 5);
        let ctx = seeded_ctx();
        let optimized_rows = run(&optimized, &ctx);
        let tree_rows = run(&join, &ctx);
        assert_eq!(optimized_rows.len(), 3);
        assert_eq!(optimized_rows, tree_rows);
    }

    #[test]
    fn test_left_join_lookup_preserves_unmatched() {
        let join = join_plan(JoinKind::Left);
        let optimized = Pushdown.apply(&join).unwrap();
        let PlanStage::Source(source) = optimized.as_ref() else {
            panic!("Expected Source, got: {}", optimized.describe());
        };
        let Some(PipelineStage::Unwind {
            preserve_null_and_empty,
            ..
        }) = source.pipeline.last()
        else {
            panic!("Expected trailing unwind, got: {:?}", source.pipeline);
        };
        assert!(preserve_null_and_empty);
        let ctx = seeded_ctx();
        let rows = run(&optimized, &ctx);
        // 2 for alice, 1 for carol, bob and dave padded.
        assert_eq!(rows.len(), 5);
        assert_eq!(rows, run(&join, &ctx));
    }

    #[test]
    fn test_annotated_right_side_blocks_join_pushdown() {
        let right = Arc::new(PlanStage::Source(
            SourceStage::for_table("test", "o", 1, &orders_table())
                .with_stage(PipelineStage::Limit(1)),
        ));
        let plan = Arc::new(PlanStage::Join(JoinStage::new(
            users_source(),
            right,
            JoinKind::Inner,
            Some(eq(
                col("u", "id", SqlType::Int),
                col("o", "user_id", SqlType::Int),
            )),
        )));
        let optimized = Pushdown.apply(&plan).unwrap();
        assert!(Arc::ptr_eq(&plan, &optimized));
    }

    fn join_plan(kind: JoinKind) -> Arc<PlanStage> {
        Arc::new(PlanStage::Join(JoinStage::new(
            users_source(),
            Arc::new(PlanStage::Source(SourceStage::for_table(
                "test",
                "o",
                1,
                &orders_table(),
            ))),
            kind,
            Some(eq(
                col("u", "id", SqlType::Int),
                col("o", "user_id", SqlType::Int),
            )),
        )))
    }
}
