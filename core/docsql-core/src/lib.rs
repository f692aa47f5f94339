//! # docsql — SQL query evaluation over a schemaless document store
//!
//! docsql takes a parsed SQL statement, binds it against a logical schema
//! that maps tables and columns onto document collections and field paths,
//! and evaluates it as a demand-driven iterator tree. An optimizer rewrites
//! the tree so that filters, limits and equality joins run inside the
//! store's native aggregation pipeline instead of in-process.
//!
//! The engine owns no connections and no parser: statements arrive as
//! [`sqlparser`] ASTs and documents flow through a caller-supplied
//! [`store::StoreSession`].
//!
//! ## Pipeline
//!
//! ```text
//! Statement AST ── algebrizer ──► PlanStage tree ── optimizer ──► PlanStage tree
//!                                                                      │ open
//!                                                                      ▼
//!                                                    Iter (rows, pulled on demand)
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use docsql_core::algebrizer::Algebrizer;
//! use docsql_core::auth::AllowAll;
//! use docsql_core::optimizer::Optimizer;
//! use docsql_core::plan::{ExecutionCtx, drain};
//! use docsql_core::schema::Schema;
//! use docsql_core::store::memory::MemoryStore;
//! use serde_json::json;
//!
//! # fn main() -> docsql_core::DocsqlResult<()> {
//! let schema = Arc::new(Schema::from_json(
//!     r#"{ "databases": [{ "name": "app", "tables": [{
//!         "name": "users", "collection": "users",
//!         "columns": [
//!           { "name": "id", "field_path": "_id",
//!             "sql_type": "int", "store_type": "int" },
//!           { "name": "name", "field_path": "name",
//!             "sql_type": "varchar", "store_type": "string" }
//!         ] }] }] }"#,
//! )?);
//!
//! let store = Arc::new(MemoryStore::new());
//! store.seed(
//!     "app",
//!     "users",
//!     vec![json!({ "_id": 1, "name": "alice" }), json!({ "_id": 2, "name": "bob" })],
//! );
//!
//! let statements = sqlparser::parser::Parser::parse_sql(
//!     &sqlparser::dialect::GenericDialect {},
//!     "SELECT name FROM users WHERE id = 2",
//! )
//! .expect("valid SQL");
//!
//! let plan = Algebrizer::new(schema, Arc::new(AllowAll), "app").algebrize(&statements[0])?;
//! let plan = Optimizer::new().optimize(plan);
//!
//! let rows = drain(plan.open(&ExecutionCtx::new(store))?)?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`schema`] — logical schema and the column ↔ field-path registry
//! - [`expr`] — typed expression tree, reconciliation, evaluation
//! - [`plan`] — plan stages and the iterator runtime
//! - [`algebrizer`] — statement + schema → plan tree
//! - [`optimizer`] — row-equivalent rewrites, including native pushdown
//! - [`store`] — the backing-store boundary and the in-memory session
//! - [`auth`] — authorization collaborator for schema visibility

pub mod algebrizer;
pub mod auth;
pub mod error;
pub mod expr;
pub mod logging;
pub mod optimizer;
pub mod plan;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use algebrizer::Algebrizer;
pub use error::{DocsqlError, DocsqlResult};
pub use expr::{SqlExpr, SqlType, SqlValue};
pub use optimizer::Optimizer;
pub use plan::{ExecutionCtx, PlanStage, Row};
pub use schema::Schema;
