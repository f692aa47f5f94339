#![allow(dead_code)]

//! Shared fixture: a two-table schema over a seeded in-memory store, and
//! helpers that run a SQL string through the whole engine.

use std::sync::Arc;

use docsql_core::algebrizer::Algebrizer;
use docsql_core::auth::AllowAll;
use docsql_core::optimizer::Optimizer;
use docsql_core::plan::{ExecutionCtx, PlanStage, Row, drain};
use docsql_core::schema::Schema;
use docsql_core::store::memory::MemoryStore;
use docsql_core::{DocsqlError, DocsqlResult, SqlValue};
use serde_json::json;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub fn schema() -> Arc<Schema> {
    let raw = r#"{
        "databases": [{
            "name": "app",
            "tables": [
                {
                    "name": "users",
                    "collection": "users",
                    "columns": [
                        { "name": "id", "field_path": "_id",
                          "sql_type": "int", "store_type": "int" },
                        { "name": "name", "field_path": "name",
                          "sql_type": "varchar", "store_type": "string" },
                        { "name": "age", "field_path": "age",
                          "sql_type": "int", "store_type": "int" },
                        { "name": "city", "field_path": "city",
                          "sql_type": "varchar", "store_type": "string" }
                    ]
                },
                {
                    "name": "orders",
                    "collection": "orders",
                    "columns": [
                        { "name": "id", "field_path": "_id",
                          "sql_type": "int", "store_type": "int" },
                        { "name": "user_id", "field_path": "user_id",
                          "sql_type": "int", "store_type": "int" },
                        { "name": "total", "field_path": "total",
                          "sql_type": "float", "store_type": "double" },
                        { "name": "item", "field_path": "item",
                          "sql_type": "varchar", "store_type": "string" }
                    ]
                }
            ]
        }]
    }"#;
    Arc::new(Schema::from_json(raw).expect("fixture schema parses"))
}

pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.seed(
        "app",
        "users",
        vec![
            json!({ "_id": 1, "name": "alice", "age": 34, "city": "Oslo" }),
            json!({ "_id": 2, "name": "bob", "age": 19, "city": "Paris" }),
            json!({ "_id": 3, "name": "carol", "age": 45, "city": "Oslo" }),
            // dave has no age field: NULL through the SQL layer
            json!({ "_id": 4, "name": "dave", "city": "Paris" }),
        ],
    );
    store.seed(
        "app",
        "orders",
        vec![
            json!({ "_id": 10, "user_id": 1, "total": 9.5, "item": "book" }),
            json!({ "_id": 11, "user_id": 1, "total": 3.0, "item": "pen" }),
            json!({ "_id": 12, "user_id": 3, "total": 7.25, "item": "mug" }),
            // order for a user that does not exist
            json!({ "_id": 13, "user_id": 5, "total": 1.0, "item": "ghost" }),
        ],
    );
    Arc::new(store)
}

pub fn plan_for(sql: &str, optimize: bool) -> DocsqlResult<Arc<PlanStage>> {
    docsql_core::logging::init_test();
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| DocsqlError::Unsupported(e.to_string()))?;
    let plan = Algebrizer::new(schema(), Arc::new(AllowAll), "app").algebrize(&statements[0])?;
    Ok(if optimize {
        Optimizer::new().optimize(plan)
    } else {
        plan
    })
}

fn run_with(sql: &str, optimize: bool) -> DocsqlResult<Vec<Row>> {
    let plan = plan_for(sql, optimize)?;
    let ctx = ExecutionCtx::new(seeded_store());
    drain(plan.open(&ctx)?)
}

/// Algebrize, optimize, execute.
pub fn run(sql: &str) -> DocsqlResult<Vec<Row>> {
    run_with(sql, true)
}

/// Algebrize and execute the raw tree, skipping the optimizer.
pub fn run_unoptimized(sql: &str) -> DocsqlResult<Vec<Row>> {
    run_with(sql, false)
}

pub fn cell(row: &Row, idx: usize) -> &SqlValue {
    &row.values[idx].data
}

pub fn varchar(s: &str) -> SqlValue {
    SqlValue::Varchar(s.to_string())
}

/// Project one column of every row.
pub fn column_values(rows: &[Row], idx: usize) -> Vec<SqlValue> {
    rows.iter().map(|r| cell(r, idx).clone()).collect()
}
