//! Dual: exactly one empty row.
//!
//! Backs expressions with no FROM clause (`SELECT 1 + 1`).

use crate::error::DocsqlResult;
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::Iter;

#[derive(Debug, Clone, Default)]
pub struct DualStage;

impl DualStage {
    pub fn new() -> Self {
        Self
    }

    pub fn open(&self, _ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(DualIter { emitted: false }))
    }

    pub fn columns(&self) -> Vec<Column> {
        vec![]
    }
}

struct DualIter {
    emitted: bool,
}

impl Iter for DualIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.emitted {
            Ok(None)
        } else {
            self.emitted = true;
            Ok(Some(Row::empty()))
        }
    }

    fn close(&mut self) -> DocsqlResult<()> {
        Ok(())
    }
}
