//! Empty: zero rows with a declared column list.
//!
//! The optimizer collapses a statically-false filter branch to this stage;
//! the declared columns keep the parent's positional alignment intact.

use crate::error::DocsqlResult;
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::Iter;

#[derive(Debug, Clone)]
pub struct EmptyStage {
    pub columns: Vec<Column>,
}

impl EmptyStage {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn open(&self, _ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(EmptyIter))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.columns.clone()
    }
}

struct EmptyIter;

impl Iter for EmptyIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        Ok(None)
    }

    fn close(&mut self) -> DocsqlResult<()> {
        Ok(())
    }
}
