//! Cache: materialize a non-correlated subquery once per query, replay on
//! every subsequent open.

use std::sync::Arc;

use crate::error::DocsqlResult;
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage, drain};

#[derive(Debug, Clone)]
pub struct CacheStage {
    pub child: Arc<PlanStage>,
    /// Subquery id; the per-query cache key.
    pub id: u64,
}

impl CacheStage {
    pub fn new(child: Arc<PlanStage>, id: u64) -> Self {
        Self { child, id }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        let rows = match ctx.cached(self.id) {
            Some(rows) => rows,
            None => {
                tracing::debug!(id = self.id, "materializing subquery cache entry");
                let rows = drain(self.child.open(ctx)?)?;
                ctx.store_cache(self.id, rows)
            }
        };
        Ok(Box::new(ReplayIter { rows, at: 0 }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child.columns()
    }
}

struct ReplayIter {
    rows: Arc<Vec<Row>>,
    at: usize,
}

impl Iter for ReplayIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        let row = self.rows.get(self.at).cloned();
        if row.is_some() {
            self.at += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> DocsqlResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{SqlType, SqlValue};
    use crate::plan::source::SourceStage;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::store::StoreType;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_second_open_replays_materialized_rows() {
        let store = Arc::new(MemoryStore::new());
        store.seed("test", "nums", vec![json!({ "n": 1 }), json!({ "n": 2 })]);
        let ctx = ExecutionCtx::new(store.clone());

        let table = TableSchema {
            name: "nums".into(),
            collection: "nums".into(),
            columns: vec![ColumnSchema {
                name: "n".into(),
                field_path: "n".into(),
                sql_type: SqlType::Int,
                store_type: StoreType::Int,
            }],
        };
        let stage = CacheStage::new(
            Arc::new(PlanStage::Source(SourceStage::for_table(
                "test", "t", 1, &table,
            ))),
            42,
        );

        let first = drain(stage.open(&ctx).unwrap()).unwrap();
        assert_eq!(first.len(), 2);

        // Mutating the store after materialization does not change replays.
        store.seed("test", "nums", vec![json!({ "n": 99 })]);
        let second = drain(stage.open(&ctx).unwrap()).unwrap();
        assert_eq!(second, first);
        assert_eq!(
            second[1].get(1, "t", "n").unwrap().data,
            SqlValue::Int(2)
        );
    }
}
