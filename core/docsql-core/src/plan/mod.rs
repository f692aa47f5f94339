//! Plan stages and the iterator runtime.
//!
//! A plan is an immutable tree of [`PlanStage`] variants; children are held
//! in `Arc` so optimizer passes that change nothing return the identical
//! node (observable through `Arc::ptr_eq`). Execution is demand-driven:
//! `open` produces a live [`Iter`], and a `next` call at the root pulls
//! recursively. The join stage is the one place that spawns tasks.
//!
//! Iterator contract: pull with `next` until `Ok(None)`, then call `close`
//! exactly once — including when abandoning early or after an error. After
//! a `next` returns `Err`, the iterator is terminal and further `next`
//! calls report exhaustion. `close` cascades to children on every path.

pub mod cache;
pub mod context;
pub mod dual;
pub mod empty;
pub mod filter;
pub mod group_by;
pub mod join;
pub mod limit;
pub mod order_by;
pub mod project;
pub mod row;
pub mod schema_tables;
pub mod source;
pub mod source_stack;
pub mod subquery;

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{DocsqlError, DocsqlResult};

pub use cache::CacheStage;
pub use context::{EvalCtx, ExecutionCtx};
pub use dual::DualStage;
pub use empty::EmptyStage;
pub use filter::FilterStage;
pub use group_by::GroupByStage;
pub use join::{JoinKind, JoinStage, JoinStrategy};
pub use limit::LimitStage;
pub use order_by::{OrderByStage, OrderTerm};
pub use project::{ProjectStage, ProjectedColumn};
pub use row::{Column, Row, Value};
pub use schema_tables::{SchemaTableKind, SchemaTablesStage};
pub use source::SourceStage;
pub use source_stack::{SourceAppendStage, SourceRemoveStage};
pub use subquery::{SubqueryStage, SubquerySourceStage};

/// Live cursor over one plan stage's rows.
pub trait Iter: Send {
    fn next(&mut self) -> DocsqlResult<Option<Row>>;
    fn close(&mut self) -> DocsqlResult<()>;
}

/// One step of the query algebra.
#[derive(Debug, Clone)]
pub enum PlanStage {
    Dual(DualStage),
    Empty(EmptyStage),
    Source(SourceStage),
    Filter(FilterStage),
    Project(ProjectStage),
    GroupBy(GroupByStage),
    OrderBy(OrderByStage),
    Limit(LimitStage),
    Join(JoinStage),
    Subquery(SubqueryStage),
    SubquerySource(SubquerySourceStage),
    SourceAppend(SourceAppendStage),
    SourceRemove(SourceRemoveStage),
    Cache(CacheStage),
    SchemaTables(SchemaTablesStage),
}

impl PlanStage {
    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        match self {
            PlanStage::Dual(s) => s.open(ctx),
            PlanStage::Empty(s) => s.open(ctx),
            PlanStage::Source(s) => s.open(ctx),
            PlanStage::Filter(s) => s.open(ctx),
            PlanStage::Project(s) => s.open(ctx),
            PlanStage::GroupBy(s) => s.open(ctx),
            PlanStage::OrderBy(s) => s.open(ctx),
            PlanStage::Limit(s) => s.open(ctx),
            PlanStage::Join(s) => s.open(ctx),
            PlanStage::Subquery(s) => s.open(ctx),
            PlanStage::SubquerySource(s) => s.open(ctx),
            PlanStage::SourceAppend(s) => s.open(ctx),
            PlanStage::SourceRemove(s) => s.open(ctx),
            PlanStage::Cache(s) => s.open(ctx),
            PlanStage::SchemaTables(s) => s.open(ctx),
        }
    }

    /// Declared output columns; rows are positionally aligned with this list.
    pub fn columns(&self) -> Vec<Column> {
        match self {
            PlanStage::Dual(s) => s.columns(),
            PlanStage::Empty(s) => s.columns(),
            PlanStage::Source(s) => s.columns(),
            PlanStage::Filter(s) => s.columns(),
            PlanStage::Project(s) => s.columns(),
            PlanStage::GroupBy(s) => s.columns(),
            PlanStage::OrderBy(s) => s.columns(),
            PlanStage::Limit(s) => s.columns(),
            PlanStage::Join(s) => s.columns(),
            PlanStage::Subquery(s) => s.columns(),
            PlanStage::SubquerySource(s) => s.columns(),
            PlanStage::SourceAppend(s) => s.columns(),
            PlanStage::SourceRemove(s) => s.columns(),
            PlanStage::Cache(s) => s.columns(),
            PlanStage::SchemaTables(s) => s.columns(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanStage::Dual(_) => "Dual",
            PlanStage::Empty(_) => "Empty",
            PlanStage::Source(_) => "Source",
            PlanStage::Filter(_) => "Filter",
            PlanStage::Project(_) => "Project",
            PlanStage::GroupBy(_) => "GroupBy",
            PlanStage::OrderBy(_) => "OrderBy",
            PlanStage::Limit(_) => "Limit",
            PlanStage::Join(_) => "Join",
            PlanStage::Subquery(_) => "Subquery",
            PlanStage::SubquerySource(_) => "SubquerySource",
            PlanStage::SourceAppend(_) => "SourceAppend",
            PlanStage::SourceRemove(_) => "SourceRemove",
            PlanStage::Cache(_) => "Cache",
            PlanStage::SchemaTables(_) => "SchemaTables",
        }
    }

    pub fn children(&self) -> Vec<&Arc<PlanStage>> {
        match self {
            PlanStage::Dual(_) | PlanStage::Empty(_) | PlanStage::Source(_)
            | PlanStage::SchemaTables(_) => vec![],
            PlanStage::Filter(s) => vec![&s.child],
            PlanStage::Project(s) => vec![&s.child],
            PlanStage::GroupBy(s) => vec![&s.child],
            PlanStage::OrderBy(s) => vec![&s.child],
            PlanStage::Limit(s) => vec![&s.child],
            PlanStage::Join(s) => vec![&s.left, &s.right],
            PlanStage::Subquery(s) => vec![&s.child],
            PlanStage::SubquerySource(s) => vec![&s.child],
            PlanStage::SourceAppend(s) => vec![&s.child],
            PlanStage::SourceRemove(s) => vec![&s.child],
            PlanStage::Cache(s) => vec![&s.child],
        }
    }

    /// Rebuild the node with replacement children, preserving everything
    /// else. The replacement list must match `children()` in length.
    pub fn with_children(&self, mut children: Vec<Arc<PlanStage>>) -> DocsqlResult<PlanStage> {
        let expected = self.children().len();
        if children.len() != expected {
            return Err(DocsqlError::Internal(format!(
                "{} takes {expected} children, got {}",
                self.name(),
                children.len()
            )));
        }
        let mut take = || children.remove(0);
        Ok(match self {
            PlanStage::Dual(_) | PlanStage::Empty(_) | PlanStage::Source(_)
            | PlanStage::SchemaTables(_) => self.clone(),
            PlanStage::Filter(s) => PlanStage::Filter(FilterStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::Project(s) => PlanStage::Project(ProjectStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::GroupBy(s) => PlanStage::GroupBy(GroupByStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::OrderBy(s) => PlanStage::OrderBy(OrderByStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::Limit(s) => PlanStage::Limit(LimitStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::Join(s) => PlanStage::Join(JoinStage {
                left: take(),
                right: take(),
                ..s.clone()
            }),
            PlanStage::Subquery(s) => PlanStage::Subquery(SubqueryStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::SubquerySource(s) => PlanStage::SubquerySource(SubquerySourceStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::SourceAppend(s) => PlanStage::SourceAppend(SourceAppendStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::SourceRemove(s) => PlanStage::SourceRemove(SourceRemoveStage {
                child: take(),
                ..s.clone()
            }),
            PlanStage::Cache(s) => PlanStage::Cache(CacheStage {
                child: take(),
                ..s.clone()
            }),
        })
    }

    /// Indented tree rendering for logs and explain output.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(self.name());
        let detail = match self {
            PlanStage::Source(s) => Some(s.detail()),
            PlanStage::Filter(s) => Some(format!("{:?}", s.predicate)),
            PlanStage::Limit(s) => Some(format!("skip={} limit={}", s.skip, s.limit)),
            PlanStage::Join(s) => Some(format!("{:?} {:?}", s.kind, s.strategy)),
            PlanStage::Cache(s) => Some(format!("id={}", s.id)),
            PlanStage::SourceAppend(s) => Some(format!("depth={}", s.depth)),
            PlanStage::SourceRemove(s) => Some(format!("depth={}", s.depth)),
            PlanStage::Subquery(s) => Some(format!("alias={}", s.alias)),
            PlanStage::SubquerySource(s) => Some(format!("alias={}", s.alias)),
            PlanStage::SchemaTables(s) => Some(format!("{:?}", s.kind)),
            _ => None,
        };
        if let Some(detail) = detail {
            // Ignore the unfallible fmt error.
            let _ = write!(out, " [{detail}]");
        }
        out.push('\n');
        for child in self.children() {
            child.describe_into(out, depth + 1);
        }
    }
}

/// Drain an iterator to completion, closing it on every path.
pub fn drain(mut iter: Box<dyn Iter>) -> DocsqlResult<Vec<Row>> {
    let mut rows = vec![];
    loop {
        match iter.next() {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break,
            Err(e) => {
                iter.close()?;
                return Err(e);
            }
        }
    }
    iter.close()?;
    Ok(rows)
}
