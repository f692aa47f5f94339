//! Limit: skip `skip` rows, then cap emission at `limit`.

use std::sync::Arc;

use crate::error::DocsqlResult;
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage};

#[derive(Debug, Clone)]
pub struct LimitStage {
    pub child: Arc<PlanStage>,
    pub skip: u64,
    pub limit: u64,
}

impl LimitStage {
    pub fn new(child: Arc<PlanStage>, skip: u64, limit: u64) -> Self {
        Self { child, skip, limit }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(LimitIter {
            child: self.child.open(ctx)?,
            to_skip: self.skip,
            remaining: self.limit,
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child.columns()
    }
}

struct LimitIter {
    child: Box<dyn Iter>,
    to_skip: u64,
    remaining: u64,
    done: bool,
}

impl Iter for LimitIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done || self.remaining == 0 {
            self.done = true;
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
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            self.remaining -= 1;
            return Ok(Some(row));
        }
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.child.close()
    }
}
