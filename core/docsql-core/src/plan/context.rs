//! Execution and evaluation contexts.
//!
//! An [`ExecutionCtx`] is created once per query and cloned freely; clones
//! share the store session, the correlated-row stack and the subquery result
//! cache through an `Arc`. An [`EvalCtx`] is the per-row view handed to
//! expression evaluation: the rows currently in flight plus the shared
//! execution state for correlated lookups and subquery execution.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::{DocsqlError, DocsqlResult};
use crate::plan::row::{Row, Value};
use crate::store::{DocumentCursor, PipelineStage, StoreSession};

#[derive(Default)]
struct CtxState {
    /// Correlated-row stack: one slot per subquery nesting depth.
    src_rows: Vec<Row>,
    /// Materialized results of non-correlated subqueries, keyed by plan id.
    cache: AHashMap<u64, Arc<Vec<Row>>>,
}

/// Shared per-query execution state.
#[derive(Clone)]
pub struct ExecutionCtx {
    session: Arc<dyn StoreSession>,
    state: Arc<Mutex<CtxState>>,
}

impl ExecutionCtx {
    pub fn new(session: Arc<dyn StoreSession>) -> Self {
        Self {
            session,
            state: Arc::new(Mutex::new(CtxState::default())),
        }
    }

    /// A context with no live store behind it.
    ///
    /// Used for constant folding, where only store-independent expressions
    /// are ever evaluated; any stage that does reach the store fails.
    pub fn detached() -> Self {
        Self::new(Arc::new(NoopSession))
    }

    pub fn session(&self) -> &Arc<dyn StoreSession> {
        &self.session
    }

    /// Install `row` as the correlated row at `depth`, discarding any
    /// deeper entries left over from a previous sibling subtree.
    pub fn push_src_row(&self, depth: usize, row: Row) {
        let mut state = self.state.lock();
        state.src_rows.truncate(depth);
        state.src_rows.push(row);
    }

    /// Drop the correlated rows at `depth` and deeper.
    pub fn pop_src_rows(&self, depth: usize) {
        self.state.lock().src_rows.truncate(depth);
    }

    /// Snapshot of the correlated-row stack, outermost first.
    pub fn src_rows(&self) -> Vec<Row> {
        self.state.lock().src_rows.clone()
    }

    pub fn cached(&self, id: u64) -> Option<Arc<Vec<Row>>> {
        self.state.lock().cache.get(&id).cloned()
    }

    pub fn store_cache(&self, id: u64, rows: Vec<Row>) -> Arc<Vec<Row>> {
        let rows = Arc::new(rows);
        self.state.lock().cache.insert(id, Arc::clone(&rows));
        rows
    }
}

impl std::fmt::Debug for ExecutionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExecutionCtx")
            .field("src_rows", &state.src_rows.len())
            .field("cached_plans", &state.cache.len())
            .finish()
    }
}

struct NoopSession;

impl StoreSession for NoopSession {
    fn aggregate(
        &self,
        db: &str,
        collection: &str,
        _pipeline: &[PipelineStage],
    ) -> DocsqlResult<Box<dyn DocumentCursor>> {
        Err(DocsqlError::Internal(format!(
            "no store session available for {db}.{collection}"
        )))
    }
}

/// Per-row view for expression evaluation.
#[derive(Debug, Clone)]
pub struct EvalCtx {
    /// Rows in scope, innermost last. Column resolution scans back to front
    /// so the nearest binding wins.
    pub rows: Vec<Row>,
    pub exec: ExecutionCtx,
}

impl EvalCtx {
    pub fn new(rows: Vec<Row>, exec: ExecutionCtx) -> Self {
        Self { rows, exec }
    }

    pub fn single(row: Row, exec: ExecutionCtx) -> Self {
        Self::new(vec![row], exec)
    }

    /// Resolve a column, searching the in-scope rows first and falling back
    /// to the shared correlated-row stack.
    pub fn lookup(&self, select_id: u32, table: &str, name: &str) -> Option<Value> {
        for row in self.rows.iter().rev() {
            if let Some(value) = row.get(select_id, table, name) {
                return Some(value.clone());
            }
        }
        for row in self.exec.src_rows().iter().rev() {
            if let Some(value) = row.get(select_id, table, name) {
                return Some(value.clone());
            }
        }
        None
    }
}
