//! Filter: per-row predicate evaluation.

use std::sync::Arc;

use crate::error::DocsqlResult;
use crate::expr::SqlExpr;
use crate::plan::context::{EvalCtx, ExecutionCtx};
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage};

#[derive(Debug, Clone)]
pub struct FilterStage {
    pub child: Arc<PlanStage>,
    pub predicate: SqlExpr,
}

impl FilterStage {
    pub fn new(child: Arc<PlanStage>, predicate: SqlExpr) -> Self {
        Self { child, predicate }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(FilterIter {
            child: self.child.open(ctx)?,
            predicate: self.predicate.clone(),
            ctx: ctx.clone(),
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child.columns()
    }
}

struct FilterIter {
    child: Box<dyn Iter>,
    predicate: SqlExpr,
    ctx: ExecutionCtx,
    done: bool,
}

impl Iter for FilterIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        loop {
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
            let eval = EvalCtx::single(row.clone(), self.ctx.clone());
            match self.predicate.matches(&eval) {
                Ok(true) => return Ok(Some(row)),
                Ok(false) => continue,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.child.close()
    }
}
