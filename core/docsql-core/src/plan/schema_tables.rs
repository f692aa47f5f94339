//! Virtual information-schema sources.
//!
//! Rows are synthesized from the logical schema, filtered through the
//! authorization provider. A database or collection the provider does not
//! explicitly allow is omitted — never an error.

use std::sync::Arc;

use crate::auth::SharedAuth;
use crate::error::DocsqlResult;
use crate::expr::{SqlType, SqlValue};
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::Iter;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTableKind {
    Schemata,
    Tables,
    Columns,
}

impl SchemaTableKind {
    /// Virtual table name as addressed in `information_schema`.
    pub fn from_table_name(name: &str) -> Option<SchemaTableKind> {
        match name.to_ascii_lowercase().as_str() {
            "schemata" => Some(SchemaTableKind::Schemata),
            "tables" => Some(SchemaTableKind::Tables),
            "columns" => Some(SchemaTableKind::Columns),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaTablesStage {
    pub kind: SchemaTableKind,
    pub schema: Arc<Schema>,
    pub auth: SharedAuth,
    pub select_id: u32,
    pub alias: String,
}

impl SchemaTablesStage {
    pub fn new(
        kind: SchemaTableKind,
        schema: Arc<Schema>,
        auth: SharedAuth,
        select_id: u32,
        alias: &str,
    ) -> Self {
        Self {
            kind,
            schema,
            auth,
            select_id,
            alias: alias.to_string(),
        }
    }

    pub fn open(&self, _ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        let columns = self.columns();
        let mut rows = vec![];
        for db in &self.schema.databases {
            if !self.auth.is_database_allowed(&db.name) {
                continue;
            }
            match self.kind {
                SchemaTableKind::Schemata => {
                    rows.push(make_row(&columns, vec![SqlValue::Varchar(db.name.clone())]));
                }
                SchemaTableKind::Tables => {
                    for table in &db.tables {
                        if !self.auth.is_collection_allowed(&db.name, &table.collection) {
                            continue;
                        }
                        rows.push(make_row(
                            &columns,
                            vec![
                                SqlValue::Varchar(db.name.clone()),
                                SqlValue::Varchar(table.name.clone()),
                                SqlValue::Varchar("BASE TABLE".to_string()),
                            ],
                        ));
                    }
                }
                SchemaTableKind::Columns => {
                    for table in &db.tables {
                        if !self.auth.is_collection_allowed(&db.name, &table.collection) {
                            continue;
                        }
                        for (i, column) in table.columns.iter().enumerate() {
                            rows.push(make_row(
                                &columns,
                                vec![
                                    SqlValue::Varchar(db.name.clone()),
                                    SqlValue::Varchar(table.name.clone()),
                                    SqlValue::Varchar(column.name.clone()),
                                    SqlValue::Varchar(column.sql_type.to_string()),
                                    SqlValue::Int(i as i64 + 1),
                                ],
                            ));
                        }
                    }
                }
            }
        }
        Ok(Box::new(SchemaRowsIter {
            rows: rows.into_iter(),
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        let specs: &[(&str, SqlType)] = match self.kind {
            SchemaTableKind::Schemata => &[("schema_name", SqlType::Varchar)],
            SchemaTableKind::Tables => &[
                ("table_schema", SqlType::Varchar),
                ("table_name", SqlType::Varchar),
                ("table_type", SqlType::Varchar),
            ],
            SchemaTableKind::Columns => &[
                ("table_schema", SqlType::Varchar),
                ("table_name", SqlType::Varchar),
                ("column_name", SqlType::Varchar),
                ("data_type", SqlType::Varchar),
                ("ordinal_position", SqlType::Int),
            ],
        };
        specs
            .iter()
            .map(|(name, sql_type)| Column::new(self.select_id, &self.alias, name, *sql_type))
            .collect()
    }
}

fn make_row(columns: &[Column], values: Vec<SqlValue>) -> Row {
    Row::new(
        columns
            .iter()
            .zip(values)
            .map(|(column, value)| column.value(value))
            .collect(),
    )
}

struct SchemaRowsIter {
    rows: std::vec::IntoIter<Row>,
}

impl Iter for SchemaRowsIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) -> DocsqlResult<()> {
        Ok(())
    }
}
