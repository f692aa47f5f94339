//! Backing-store boundary: documents, native pipeline stages, and the
//! session/cursor traits the engine drives.
//!
//! The engine never opens connections. It receives an already-open
//! [`StoreSession`] through the execution context and issues aggregation
//! pipelines against named collections. Each pipeline is an ordered list of
//! stage documents (`$match`, `$skip`, `$limit`, `$lookup`, `$unwind`) — the
//! optimizer's pushdown pass grows this list so the store computes
//! server-side what the plan tree would otherwise compute in-process.

pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DocsqlResult;

/// One document from the backing store.
pub type Document = serde_json::Value;

/// Type of a field as declared by the backing store side of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    String,
    Int,
    Double,
    Bool,
    Date,
    ObjectId,
    Array,
    Object,
    Any,
}

/// One native aggregation stage.
///
/// Stages are immutable descriptions; [`PipelineStage::to_document`] renders
/// the wire form sent to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    /// `$match` — filter by criteria document
    Match(Document),
    /// `$skip` — drop the first n documents
    Skip(u64),
    /// `$limit` — cap emission at n documents
    Limit(u64),
    /// `$lookup` — left outer equality join against a foreign collection,
    /// materializing matches into an array field
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// `$unwind` — expand an array field to one document per element
    Unwind {
        path: String,
        preserve_null_and_empty: bool,
    },
}

impl PipelineStage {
    /// Stage name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Match(_) => "$match",
            PipelineStage::Skip(_) => "$skip",
            PipelineStage::Limit(_) => "$limit",
            PipelineStage::Lookup { .. } => "$lookup",
            PipelineStage::Unwind { .. } => "$unwind",
        }
    }

    /// Render the wire-format stage document.
    pub fn to_document(&self) -> Document {
        match self {
            PipelineStage::Match(criteria) => json!({ "$match": criteria }),
            PipelineStage::Skip(n) => json!({ "$skip": n }),
            PipelineStage::Limit(n) => json!({ "$limit": n }),
            PipelineStage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => json!({
                "$lookup": {
                    "from": from,
                    "localField": local_field,
                    "foreignField": foreign_field,
                    "as": as_field,
                }
            }),
            PipelineStage::Unwind {
                path,
                preserve_null_and_empty,
            } => json!({
                "$unwind": {
                    "path": format!("${path}"),
                    "preserveNullAndEmptyArrays": preserve_null_and_empty,
                }
            }),
        }
    }
}

/// Live cursor over pipeline results.
///
/// Callers pull with `next` until `Ok(None)`, then call `close` exactly once.
/// `close` must also be called when abandoning the cursor early.
pub trait DocumentCursor: Send {
    fn next(&mut self) -> DocsqlResult<Option<Document>>;

    fn close(&mut self) -> DocsqlResult<()> {
        Ok(())
    }
}

/// An already-open session against the backing store.
pub trait StoreSession: Send + Sync {
    /// Execute an aggregation pipeline against one named collection.
    fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: &[PipelineStage],
    ) -> DocsqlResult<Box<dyn DocumentCursor>>;
}

/// Resolve a dotted field path inside a document.
///
/// Missing segments and non-object intermediates yield `None`; the SQL layer
/// maps that to NULL.
pub fn field_value<'a>(doc: &'a Document, path: &str) -> Option<&'a Document> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
