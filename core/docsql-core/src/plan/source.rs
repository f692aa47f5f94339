//! Source scan: the leaf stage driving a native pipeline cursor.
//!
//! Each source owns its mapping registry and its accumulated pipeline. The
//! pushdown pass grows the pipeline (and, for a pushed-down join, the column
//! list and registry) instead of keeping work in-process.

use std::sync::Arc;

use serde_json::json;

use crate::error::DocsqlResult;
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::Iter;
use crate::schema::{MappingRegistry, TableSchema};
use crate::store::{DocumentCursor, PipelineStage, field_value};
use crate::expr::SqlValue;

#[derive(Debug, Clone)]
pub struct SourceStage {
    pub db: String,
    pub collection: String,
    pub alias: String,
    pub select_id: u32,
    pub columns: Vec<Column>,
    pub mappings: MappingRegistry,
    pub pipeline: Vec<PipelineStage>,
}

impl SourceStage {
    /// Build a source for one aliased table out of the schema.
    pub fn for_table(db: &str, alias: &str, select_id: u32, table: &TableSchema) -> Self {
        let columns = table
            .columns
            .iter()
            .map(|c| {
                let mut column = Column::new(select_id, alias, &c.name, c.sql_type);
                column.store_type = c.store_type;
                column
            })
            .collect();
        Self {
            db: db.to_string(),
            collection: table.collection.clone(),
            alias: alias.to_string(),
            select_id,
            columns,
            mappings: MappingRegistry::for_table(alias, table),
            pipeline: vec![],
        }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        tracing::debug!(
            db = %self.db,
            collection = %self.collection,
            stages = self.pipeline.len(),
            "opening source cursor"
        );
        let cursor = ctx
            .session()
            .aggregate(&self.db, &self.collection, &self.pipeline)?;
        Ok(Box::new(SourceIter {
            cursor,
            columns: self.columns.clone(),
            mappings: self.mappings.clone(),
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.columns.clone()
    }

    /// Append one pipeline stage, folding into a trailing stage of the same
    /// kind where the combination is equivalent.
    pub fn with_stage(&self, stage: PipelineStage) -> SourceStage {
        let mut cloned = self.clone();
        match (cloned.pipeline.last_mut(), &stage) {
            (Some(PipelineStage::Match(existing)), PipelineStage::Match(new)) => {
                *existing = json!({ "$and": [existing.clone(), new] });
            }
            (Some(PipelineStage::Skip(existing)), PipelineStage::Skip(new)) => {
                *existing = existing.saturating_add(*new);
            }
            (Some(PipelineStage::Limit(existing)), PipelineStage::Limit(new)) => {
                *existing = (*existing).min(*new);
            }
            _ => cloned.pipeline.push(stage),
        }
        cloned
    }

    pub(crate) fn detail(&self) -> String {
        let stages: Vec<&str> = self.pipeline.iter().map(PipelineStage::name).collect();
        format!("{}.{} as {} {:?}", self.db, self.collection, self.alias, stages)
    }
}

struct SourceIter {
    cursor: Box<dyn DocumentCursor>,
    columns: Vec<Column>,
    mappings: MappingRegistry,
    done: bool,
}

impl Iter for SourceIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let doc = match self.cursor.next() {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        let values = self
            .columns
            .iter()
            .map(|column| {
                let field = self
                    .mappings
                    .field_path(&column.table, &column.name)
                    .and_then(|path| field_value(&doc, path));
                column.value(SqlValue::from_document(field, column.sql_type))
            })
            .collect();
        Ok(Some(Row::new(values)))
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.cursor.close()
    }
}

// Sources are compared structurally by the optimizer tests.
impl PartialEq for SourceStage {
    fn eq(&self, other: &Self) -> bool {
        self.db == other.db
            && self.collection == other.collection
            && self.alias == other.alias
            && self.select_id == other.select_id
            && self.columns == other.columns
            && self.mappings == other.mappings
            && self.pipeline == other.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SqlType;
    use crate::plan::drain;
    use crate::schema::ColumnSchema;
    use crate::store::StoreType;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn users_table() -> TableSchema {
        TableSchema {
            name: "users".into(),
            collection: "users".into(),
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    field_path: "_id".into(),
                    sql_type: SqlType::Int,
                    store_type: StoreType::Int,
                },
                ColumnSchema {
                    name: "city".into(),
                    field_path: "address.city".into(),
                    sql_type: SqlType::Varchar,
                    store_type: StoreType::String,
                },
            ],
        }
    }

    fn ctx() -> ExecutionCtx {
        let store = MemoryStore::new();
        store.seed(
            "test",
            "users",
            vec![
                json!({ "_id": 1, "address": { "city": "Oslo" } }),
                json!({ "_id": 2 }),
            ],
        );
        ExecutionCtx::new(Arc::new(store))
    }

    #[test]
    fn test_scan_maps_fields_to_columns() {
        let stage = SourceStage::for_table("test", "u", 1, &users_table());
        let rows = drain(stage.open(&ctx()).unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(1, "u", "id").unwrap().data, SqlValue::Int(1));
        assert_eq!(
            rows[0].get(1, "u", "city").unwrap().data,
            SqlValue::Varchar("Oslo".into())
        );
        // Missing nested field surfaces as NULL.
        assert_eq!(rows[1].get(1, "u", "city").unwrap().data, SqlValue::Null);
    }

    #[test]
    fn test_with_stage_folds_same_kind() {
        let stage = SourceStage::for_table("test", "u", 1, &users_table());
        let annotated = stage
            .with_stage(PipelineStage::Match(json!({ "a": 1 })))
            .with_stage(PipelineStage::Match(json!({ "b": 2 })))
            .with_stage(PipelineStage::Skip(2))
            .with_stage(PipelineStage::Skip(3))
            .with_stage(PipelineStage::Limit(10))
            .with_stage(PipelineStage::Limit(4));
        assert_eq!(annotated.pipeline.len(), 3);
        assert_eq!(
            annotated.pipeline[0],
            PipelineStage::Match(json!({ "$and": [{ "a": 1 }, { "b": 2 }] }))
        );
        assert_eq!(annotated.pipeline[1], PipelineStage::Skip(5));
        assert_eq!(annotated.pipeline[2], PipelineStage::Limit(4));
        // Original untouched.
        assert!(stage.pipeline.is_empty());
    }
}
