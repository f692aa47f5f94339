//! Correlated-row stack bracketing.
//!
//! `SourceAppendStage` publishes each row it passes through onto the shared
//! correlated-row stack at a fixed nesting depth, so subquery expressions
//! evaluated above it can see the enclosing row. `SourceRemoveStage` pops
//! that depth when its subtree exhausts or closes, so sibling subtrees never
//! observe stale bindings.

use std::sync::Arc;

use crate::error::DocsqlResult;
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage};

#[derive(Debug, Clone)]
pub struct SourceAppendStage {
    pub child: Arc<PlanStage>,
    pub depth: usize,
}

impl SourceAppendStage {
    pub fn new(child: Arc<PlanStage>, depth: usize) -> Self {
        Self { child, depth }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(AppendIter {
            child: self.child.open(ctx)?,
            depth: self.depth,
            ctx: ctx.clone(),
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child.columns()
    }
}

struct AppendIter {
    child: Box<dyn Iter>,
    depth: usize,
    ctx: ExecutionCtx,
    done: bool,
}

impl Iter for AppendIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        match self.child.next() {
            Ok(Some(row)) => {
                self.ctx.push_src_row(self.depth, row.clone());
                Ok(Some(row))
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.child.close()
    }
}

#[derive(Debug, Clone)]
pub struct SourceRemoveStage {
    pub child: Arc<PlanStage>,
    pub depth: usize,
}

impl SourceRemoveStage {
    pub fn new(child: Arc<PlanStage>, depth: usize) -> Self {
        Self { child, depth }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(RemoveIter {
            child: self.child.open(ctx)?,
            depth: self.depth,
            ctx: ctx.clone(),
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child.columns()
    }
}

struct RemoveIter {
    child: Box<dyn Iter>,
    depth: usize,
    ctx: ExecutionCtx,
    done: bool,
}

impl Iter for RemoveIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        match self.child.next() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.done = true;
                self.ctx.pop_src_rows(self.depth);
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                self.ctx.pop_src_rows(self.depth);
                Err(e)
            }
        }
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.ctx.pop_src_rows(self.depth);
        self.child.close()
    }
}
