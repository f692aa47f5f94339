//! Project: evaluate output expressions per row.
//!
//! A projection marked `referenced_only` exists so a stage below (OrderBy on
//! a non-selected column, HAVING on a bare aggregate) can reference it; it
//! is dropped from this stage's declared columns and emitted rows.

use std::sync::Arc;

use crate::error::DocsqlResult;
use crate::expr::SqlExpr;
use crate::plan::context::{EvalCtx, ExecutionCtx};
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub column: Column,
    pub expr: SqlExpr,
    pub referenced_only: bool,
}

impl ProjectedColumn {
    pub fn new(column: Column, expr: SqlExpr) -> Self {
        Self {
            column,
            expr,
            referenced_only: false,
        }
    }

    pub fn referenced_only(column: Column, expr: SqlExpr) -> Self {
        Self {
            column,
            expr,
            referenced_only: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectStage {
    pub child: Arc<PlanStage>,
    pub projections: Vec<ProjectedColumn>,
}

impl ProjectStage {
    pub fn new(child: Arc<PlanStage>, projections: Vec<ProjectedColumn>) -> Self {
        Self { child, projections }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(ProjectIter {
            child: self.child.open(ctx)?,
            projections: self.projections.clone(),
            ctx: ctx.clone(),
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.projections
            .iter()
            .filter(|p| !p.referenced_only)
            .map(|p| p.column.clone())
            .collect()
    }
}

struct ProjectIter {
    child: Box<dyn Iter>,
    projections: Vec<ProjectedColumn>,
    ctx: ExecutionCtx,
    done: bool,
}

impl Iter for ProjectIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let row = match self.child.next() {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        let eval = EvalCtx::single(row, self.ctx.clone());
        let mut values = Vec::with_capacity(self.projections.len());
        for projection in &self.projections {
            if projection.referenced_only {
                continue;
            }
            match projection.expr.evaluate(&eval) {
                Ok(value) => values.push(projection.column.value(value)),
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
        Ok(Some(Row::new(values)))
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.child.close()
    }
}
