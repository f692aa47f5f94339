//! OrderBy: buffer, stable multi-key sort, replay.

use std::cmp::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::DocsqlResult;
use crate::expr::{SqlExpr, SqlValue};
use crate::plan::context::{EvalCtx, ExecutionCtx};
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage, drain};

/// Sort keys stay inline for the usual one-or-two-term clause.
type SortKey = SmallVec<[SqlValue; 4]>;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub expr: SqlExpr,
    pub ascending: bool,
}

#[derive(Debug, Clone)]
pub struct OrderByStage {
    pub child: Arc<PlanStage>,
    pub terms: Vec<OrderTerm>,
}

impl OrderByStage {
    pub fn new(child: Arc<PlanStage>, terms: Vec<OrderTerm>) -> Self {
        Self { child, terms }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        let rows = drain(self.child.open(ctx)?)?;
        // Evaluate every sort key once up front, then sort stably.
        let mut keyed: Vec<(SortKey, Row)> = Vec::with_capacity(rows.len());
        for row in rows {
            let eval = EvalCtx::single(row.clone(), ctx.clone());
            let keys = self
                .terms
                .iter()
                .map(|term| term.expr.evaluate(&eval))
                .collect::<DocsqlResult<SortKey>>()?;
            keyed.push((keys, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (term, (ka, kb)) in self.terms.iter().zip(a.iter().zip(b)) {
                let ord = ka.compare(kb);
                let ord = if term.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(Box::new(OrderedIter {
            rows: keyed.into_iter().map(|(_, row)| row).collect::<Vec<_>>().into_iter(),
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child.columns()
    }
}

struct OrderedIter {
    rows: std::vec::IntoIter<Row>,
}

impl Iter for OrderedIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) -> DocsqlResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ColumnRef, SqlType};
    use crate::plan::source::SourceStage;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::store::StoreType;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn ctx() -> ExecutionCtx {
        let store = MemoryStore::new();
        store.seed(
            "test",
            "people",
            vec![
                json!({ "name": "bob", "age": 19 }),
                json!({ "name": "alice", "age": 34 }),
                json!({ "name": "carol", "age": 19 }),
                json!({ "name": "dave" }),
            ],
        );
        ExecutionCtx::new(Arc::new(store))
    }

    fn source() -> Arc<PlanStage> {
        let table = TableSchema {
            name: "people".into(),
            collection: "people".into(),
            columns: vec![
                ColumnSchema {
                    name: "name".into(),
                    field_path: "name".into(),
                    sql_type: SqlType::Varchar,
                    store_type: StoreType::String,
                },
                ColumnSchema {
                    name: "age".into(),
                    field_path: "age".into(),
                    sql_type: SqlType::Int,
                    store_type: StoreType::Int,
                },
            ],
        };
        Arc::new(PlanStage::Source(SourceStage::for_table(
            "test", "p", 1, &table,
        )))
    }

    fn col(name: &str, sql_type: SqlType) -> SqlExpr {
        SqlExpr::Column(ColumnRef {
            select_id: 1,
            table: "p".into(),
            name: name.into(),
            sql_type,
        })
    }

    fn names(stage: OrderByStage) -> Vec<String> {
        drain(stage.open(&ctx()).unwrap())
            .unwrap()
            .into_iter()
            .map(|row| match row.get(1, "p", "name").unwrap().data {
                SqlValue::Varchar(ref s) => s.clone(),
                ref other => panic!("Expected varchar, got: {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_multi_key_sort_with_nulls_first() {
        // age ASC (nulls first), then name DESC as a tie-break.
        let stage = OrderByStage::new(
            source(),
            vec![
                OrderTerm {
                    expr: col("age", SqlType::Int),
                    ascending: true,
                },
                OrderTerm {
                    expr: col("name", SqlType::Varchar),
                    ascending: false,
                },
            ],
        );
        assert_eq!(names(stage), vec!["dave", "carol", "bob", "alice"]);
    }

    #[test]
    fn test_descending() {
        let stage = OrderByStage::new(
            source(),
            vec![OrderTerm {
                expr: col("name", SqlType::Varchar),
                ascending: false,
            }],
        );
        assert_eq!(names(stage), vec!["dave", "carol", "bob", "alice"]);
    }
}
