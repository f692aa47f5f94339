//! GroupBy: buffer, partition by key equality, aggregate per partition.
//!
//! Partitions are keyed by the deterministic byte encoding of the evaluated
//! key expressions, so `2` and `2.0` land in the same group the way they
//! compare equal. Partition emission order is first-seen input order. With
//! no key expressions the whole input is one partition — which exists even
//! for empty input, so a bare aggregate always yields exactly one row.

use std::sync::Arc;

use ahash::AHashMap;

use crate::error::DocsqlResult;
use crate::expr::visitor::{collect_aggregates, substitute_aggregates};
use crate::expr::{AggregateExpr, SqlExpr, SqlValue};
use crate::plan::context::{EvalCtx, ExecutionCtx};
use crate::plan::project::ProjectedColumn;
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage, drain};

#[derive(Debug, Clone)]
pub struct GroupByStage {
    pub child: Arc<PlanStage>,
    pub keys: Vec<SqlExpr>,
    pub projections: Vec<ProjectedColumn>,
}

impl GroupByStage {
    pub fn new(
        child: Arc<PlanStage>,
        keys: Vec<SqlExpr>,
        projections: Vec<ProjectedColumn>,
    ) -> Self {
        Self {
            child,
            keys,
            projections,
        }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        let rows = drain(self.child.open(ctx)?)?;

        // Partition preserving first-seen order.
        let mut order: Vec<Vec<u8>> = vec![];
        let mut partitions: AHashMap<Vec<u8>, Vec<Row>> = AHashMap::new();
        for row in rows {
            let eval = EvalCtx::single(row.clone(), ctx.clone());
            let mut key = vec![];
            for key_expr in &self.keys {
                key_expr.evaluate(&eval)?.encode_key(&mut key);
            }
            match partitions.get_mut(&key) {
                Some(bucket) => bucket.push(row),
                None => {
                    order.push(key.clone());
                    partitions.insert(key, vec![row]);
                }
            }
        }
        if self.keys.is_empty() && order.is_empty() {
            order.push(vec![]);
            partitions.insert(vec![], vec![]);
        }

        let mut out = Vec::with_capacity(order.len());
        for key in order {
            let bucket = partitions.remove(&key).unwrap_or_default();
            out.push(self.emit_partition(&bucket, ctx)?);
        }
        Ok(Box::new(GroupedIter {
            rows: out.into_iter(),
        }))
    }

    fn emit_partition(&self, rows: &[Row], ctx: &ExecutionCtx) -> DocsqlResult<Row> {
        // Compute every aggregate the projections mention over this
        // partition, then substitute the results and evaluate the remaining
        // expression against a representative row.
        let mut aggregates: Vec<AggregateExpr> = vec![];
        for projection in &self.projections {
            for agg in collect_aggregates(&projection.expr) {
                if !aggregates.contains(&agg) {
                    aggregates.push(agg);
                }
            }
        }
        let mut results: Vec<SqlValue> = Vec::with_capacity(aggregates.len());
        for agg in &aggregates {
            let mut acc = agg.func.accumulator(agg.distinct);
            for row in rows {
                let eval = EvalCtx::single(row.clone(), ctx.clone());
                let input = match &agg.arg {
                    Some(arg) => Some(arg.evaluate(&eval)?),
                    None => None,
                };
                acc.accumulate(input)?;
            }
            results.push(acc.finish());
        }

        let representative = rows.first().cloned().unwrap_or_else(Row::empty);
        let eval = EvalCtx::single(representative, ctx.clone());
        let mut values = Vec::with_capacity(self.projections.len());
        for projection in &self.projections {
            if projection.referenced_only {
                continue;
            }
            let substituted = substitute_aggregates(&projection.expr, &|candidate| {
                aggregates
                    .iter()
                    .position(|a| a == candidate)
                    .map(|i| results[i].clone())
            });
            values.push(projection.column.value(substituted.evaluate(&eval)?));
        }
        Ok(Row::new(values))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.projections
            .iter()
            .filter(|p| !p.referenced_only)
            .map(|p| p.column.clone())
            .collect()
    }
}

struct GroupedIter {
    rows: std::vec::IntoIter<Row>,
}

impl Iter for GroupedIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) -> DocsqlResult<()> {
        Ok(())
    }
}
