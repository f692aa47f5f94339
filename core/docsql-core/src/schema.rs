//! Logical schema: the database → table → column mapping that binds SQL
//! identifiers to backing-store collections and field paths.
//!
//! Loading and validating this from configuration is the host's job; the
//! types derive serde so the loader can read them straight from JSON.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{DocsqlError, DocsqlResult};
use crate::expr::SqlType;
use crate::store::StoreType;

/// Top-level logical schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub databases: Vec<DatabaseSchema>,
}

/// One SQL-visible database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub name: String,
    pub tables: Vec<TableSchema>,
}

/// One SQL table mapped onto a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub collection: String,
    pub columns: Vec<ColumnSchema>,
}

/// One SQL column mapped onto a document field path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Dotted path into the document, e.g. `address.city`.
    pub field_path: String,
    pub sql_type: SqlType,
    pub store_type: StoreType,
}

impl Schema {
    pub fn database(&self, name: &str) -> Option<&DatabaseSchema> {
        self.databases.iter().find(|db| db.name == name)
    }

    /// Resolve a table, failing with the schema-resolution taxonomy.
    pub fn must_table(&self, db: &str, table: &str) -> DocsqlResult<&TableSchema> {
        let database = self
            .database(db)
            .ok_or_else(|| DocsqlError::UnknownDatabase(db.to_string()))?;
        database.table(table).ok_or_else(|| DocsqlError::UnknownTable {
            db: db.to_string(),
            table: table.to_string(),
        })
    }

    /// Parse a schema from its JSON configuration form.
    pub fn from_json(raw: &str) -> DocsqlResult<Schema> {
        serde_json::from_str(raw).map_err(|e| DocsqlError::Schema(e.to_string()))
    }
}

impl DatabaseSchema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Bidirectional map from `(table alias, SQL column)` to document field path.
///
/// Each data-source stage owns exactly one registry built from the schema at
/// algebrization time. A downstream rewrite that needs to graft a foreign
/// source under a nested prefix (the lookup pushdown) deep-clones with
/// [`MappingRegistry::clone_with_prefix`] and merges; the original registry
/// is never mutated after the fact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingRegistry {
    columns: AHashMap<(String, String), String>,
    fields: AHashMap<(String, String), String>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry for one aliased table.
    pub fn for_table(alias: &str, table: &TableSchema) -> Self {
        let mut registry = Self::new();
        for column in &table.columns {
            registry.register(alias, &column.name, &column.field_path);
        }
        registry
    }

    pub fn register(&mut self, alias: &str, column: &str, field_path: &str) {
        self.columns.insert(
            (alias.to_string(), column.to_string()),
            field_path.to_string(),
        );
        self.fields.insert(
            (alias.to_string(), field_path.to_string()),
            column.to_string(),
        );
    }

    pub fn field_path(&self, alias: &str, column: &str) -> Option<&str> {
        self.columns
            .get(&(alias.to_string(), column.to_string()))
            .map(String::as_str)
    }

    pub fn column_name(&self, alias: &str, field_path: &str) -> Option<&str> {
        self.fields
            .get(&(alias.to_string(), field_path.to_string()))
            .map(String::as_str)
    }

    /// Deep clone with every field path re-rooted under `prefix.`.
    pub fn clone_with_prefix(&self, prefix: &str) -> Self {
        let mut cloned = Self::new();
        for ((alias, column), path) in &self.columns {
            cloned.register(alias, column, &format!("{prefix}.{path}"));
        }
        cloned
    }

    /// Absorb another registry's entries.
    pub fn merge(&mut self, other: &MappingRegistry) {
        for ((alias, column), path) in &other.columns {
            self.register(alias, column, path);
        }
    }
}
