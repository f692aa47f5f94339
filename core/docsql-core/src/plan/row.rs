//! Rows, values and column identity.
//!
//! A `Column` identity is the triple `(select_id, table, name)`; the
//! select id disambiguates same-named columns across nested subquery
//! scopes. Every stage's rows are positionally aligned with its declared
//! `columns()` list — stages must preserve that alignment on every `next`.

use crate::expr::{SqlType, SqlValue};
use crate::store::StoreType;

/// Declared output column of a plan stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub select_id: u32,
    pub table: String,
    pub name: String,
    pub sql_type: SqlType,
    pub store_type: StoreType,
}

impl Column {
    pub fn new(select_id: u32, table: &str, name: &str, sql_type: SqlType) -> Self {
        Self {
            select_id,
            table: table.to_string(),
            name: name.to_string(),
            sql_type,
            store_type: StoreType::Any,
        }
    }

    /// Identity equality on the `(select_id, table, name)` triple.
    pub fn same_identity(&self, select_id: u32, table: &str, name: &str) -> bool {
        self.select_id == select_id && self.table == table && self.name == name
    }

    /// A materialized value carrying this column's identity.
    pub fn value(&self, data: SqlValue) -> Value {
        Value {
            select_id: self.select_id,
            table: self.table.clone(),
            name: self.name.clone(),
            data,
        }
    }

    /// The null padding value used for unmatched outer-join rows.
    pub fn null_value(&self) -> Value {
        self.value(SqlValue::Null)
    }

    /// Same column under a different identity (subquery relabeling).
    pub fn relabeled(&self, select_id: u32, table: &str) -> Column {
        Column {
            select_id,
            table: table.to_string(),
            name: self.name.clone(),
            sql_type: self.sql_type,
            store_type: self.store_type,
        }
    }
}

/// One materialized cell: column identity plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub select_id: u32,
    pub table: String,
    pub name: String,
    pub data: SqlValue,
}

/// One materialized row, positionally aligned with the producing stage's
/// column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self { values: vec![] }
    }

    pub fn get(&self, select_id: u32, table: &str, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|v| v.select_id == select_id && v.table == table && v.name == name)
    }

    /// Concatenate two rows (join output: left values then right values).
    pub fn concat(left: &Row, right: &Row) -> Row {
        let mut values = Vec::with_capacity(left.values.len() + right.values.len());
        values.extend_from_slice(&left.values);
        values.extend_from_slice(&right.values);
        Row { values }
    }
}
