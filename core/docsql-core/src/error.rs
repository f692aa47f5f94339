//! Error types for the docsql query engine.
//!
//! All public APIs return `DocsqlResult<T>` — no panics in library code.

use thiserror::Error;

/// Unified error type for all docsql operations.
#[derive(Debug, Error)]
pub enum DocsqlError {
    /// Requested database is not present in the logical schema
    #[error("unknown database '{0}'")]
    UnknownDatabase(String),

    /// Requested table is not present in the logical schema
    #[error("unknown table '{table}' in database '{db}'")]
    UnknownTable { db: String, table: String },

    /// Column reference did not resolve against any table in scope
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// Unqualified column reference resolves against more than one table
    #[error("column reference '{0}' is ambiguous")]
    AmbiguousColumn(String),

    /// Schema definition or resolution error
    #[error("schema error: {0}")]
    Schema(String),

    /// Two expression types cannot be reconciled for comparison
    #[error("cannot compare {left} with {right}")]
    IncomparableTypes { left: String, right: String },

    /// A value could not be converted to the requested SQL type
    #[error("cannot convert {value} to {target}")]
    TypeConversion { value: String, target: String },

    /// Runtime expression evaluation error
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Backing store fault, surfaced verbatim
    #[error("store error: {0}")]
    Store(String),

    /// Failure coordinating a join's branch tasks
    #[error("join error: {0}")]
    Join(String),

    /// SQL feature the engine does not implement
    #[error("not supported: {0}")]
    Unsupported(String),

    /// Invariant violation — a bug in the engine, not in the query
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type DocsqlResult<T> = Result<T, DocsqlError>;
