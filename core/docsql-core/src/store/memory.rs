//! In-memory store session interpreting the native pipeline language.
//!
//! Backs every execution test and serves as the oracle for pushdown
//! equivalence: an optimized tree annotated with pipeline stages and the
//! unoptimized tree must produce the same rows against the same seeded
//! collections.

use std::cmp::Ordering;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{DocsqlError, DocsqlResult};
use crate::store::{Document, DocumentCursor, PipelineStage, StoreSession, field_value};

/// In-memory collections keyed by `(database, collection)`.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<AHashMap<(String, String), Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one collection, replacing any previous contents.
    pub fn seed(&self, db: &str, collection: &str, docs: Vec<Document>) {
        self.collections
            .lock()
            .insert((db.to_string(), collection.to_string()), docs);
    }

    fn documents(&self, db: &str, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .get(&(db.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

impl StoreSession for MemoryStore {
    fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: &[PipelineStage],
    ) -> DocsqlResult<Box<dyn DocumentCursor>> {
        let mut docs = self.documents(db, collection);
        for stage in pipeline {
            docs = apply_stage(self, db, docs, stage)?;
        }
        Ok(Box::new(VecCursor {
            docs: docs.into_iter(),
        }))
    }
}

struct VecCursor {
    docs: std::vec::IntoIter<Document>,
}

impl DocumentCursor for VecCursor {
    fn next(&mut self) -> DocsqlResult<Option<Document>> {
        Ok(self.docs.next())
    }
}

fn apply_stage(
    store: &MemoryStore,
    db: &str,
    docs: Vec<Document>,
    stage: &PipelineStage,
) -> DocsqlResult<Vec<Document>> {
    match stage {
        PipelineStage::Match(criteria) => Ok(docs
            .into_iter()
            .filter(|doc| matches_criteria(criteria, doc))
            .collect()),
        PipelineStage::Skip(n) => Ok(docs.into_iter().skip(*n as usize).collect()),
        PipelineStage::Limit(n) => Ok(docs.into_iter().take(*n as usize).collect()),
        PipelineStage::Lookup {
            from,
            local_field,
            foreign_field,
            as_field,
        } => {
            let foreign = store.documents(db, from);
            let mut out = Vec::with_capacity(docs.len());
            for mut doc in docs {
                let local_val = field_value(&doc, local_field).cloned().unwrap_or(Value::Null);
                let matches: Vec<Document> = foreign
                    .iter()
                    .filter(|f| {
                        let fv = field_value(f, foreign_field).cloned().unwrap_or(Value::Null);
                        json_compare(&fv, &local_val) == Some(Ordering::Equal)
                    })
                    .cloned()
                    .collect();
                let obj = doc.as_object_mut().ok_or_else(|| {
                    DocsqlError::Store("$lookup requires object documents".to_string())
                })?;
                obj.insert(as_field.clone(), Value::Array(matches));
                out.push(doc);
            }
            Ok(out)
        }
        PipelineStage::Unwind {
            path,
            preserve_null_and_empty,
        } => {
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                let elements = match field_value(&doc, path) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => vec![],
                    Some(other) => vec![other.clone()],
                };
                if elements.is_empty() {
                    if *preserve_null_and_empty {
                        let mut kept = doc.clone();
                        set_field(&mut kept, path, Value::Null)?;
                        out.push(kept);
                    }
                    continue;
                }
                for element in elements {
                    let mut unwound = doc.clone();
                    set_field(&mut unwound, path, element)?;
                    out.push(unwound);
                }
            }
            Ok(out)
        }
    }
}

fn set_field(doc: &mut Document, path: &str, value: Value) -> DocsqlResult<()> {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let obj = current.as_object_mut().ok_or_else(|| {
            DocsqlError::Store(format!("cannot set field '{path}' on a non-object"))
        })?;
        if i == segments.len() - 1 {
            obj.insert((*segment).to_string(), value);
            return Ok(());
        }
        current = obj
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    Ok(())
}

/// Evaluate a `$match` criteria document against one document.
pub fn matches_criteria(criteria: &Document, doc: &Document) -> bool {
    let Some(fields) = criteria.as_object() else {
        return false;
    };
    fields.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|cs| cs.iter().all(|c| matches_criteria(c, doc))),
        "$or" => condition
            .as_array()
            .is_some_and(|cs| cs.iter().any(|c| matches_criteria(c, doc))),
        _ => {
            let actual = field_value(doc, key).cloned().unwrap_or(Value::Null);
            matches_condition(&actual, condition)
        }
    })
}

fn matches_condition(actual: &Value, condition: &Value) -> bool {
    let Some(ops) = condition.as_object() else {
        // Bare value means equality
        return json_compare(actual, condition) == Some(Ordering::Equal);
    };
    if ops.keys().next().is_none_or(|k| !k.starts_with('$')) {
        return json_compare(actual, condition) == Some(Ordering::Equal);
    }
    ops.iter().all(|(op, operand)| {
        let cmp = json_compare(actual, operand);
        match op.as_str() {
            "$eq" => cmp == Some(Ordering::Equal),
            "$ne" => cmp != Some(Ordering::Equal),
            "$gt" => cmp == Some(Ordering::Greater),
            "$gte" => matches!(cmp, Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => cmp == Some(Ordering::Less),
            "$lte" => matches!(cmp, Some(Ordering::Less | Ordering::Equal)),
            "$in" => operand.as_array().is_some_and(|items| {
                items
                    .iter()
                    .any(|item| json_compare(actual, item) == Some(Ordering::Equal))
            }),
            "$nin" => operand.as_array().is_some_and(|items| {
                !items
                    .iter()
                    .any(|item| json_compare(actual, item) == Some(Ordering::Equal))
            }),
            _ => false,
        }
    })
}

/// Compare two JSON values the way the store's match stage does.
///
/// Numbers compare numerically regardless of integer/float representation;
/// mismatched types are incomparable (`None`), which never satisfies a
/// comparison operator.
pub fn json_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(mut cursor: Box<dyn DocumentCursor>) -> Vec<Document> {
        let mut out = vec![];
        while let Some(doc) = cursor.next().unwrap() {
            out.push(doc);
        }
        cursor.close().unwrap();
        out
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "test",
            "users",
            vec![
                json!({ "_id": 1, "name": "alice", "age": 34 }),
                json!({ "_id": 2, "name": "bob", "age": 19 }),
                json!({ "_id": 3, "name": "carol", "age": 45 }),
            ],
        );
        store
    }

    #[test]
    fn test_match_skip_limit() {
        let store = seeded();
        let pipeline = vec![
            PipelineStage::Match(json!({ "age": { "$gt": 20 } })),
            PipelineStage::Skip(1),
            PipelineStage::Limit(5),
        ];
        let docs = drain(store.aggregate("test", "users", &pipeline).unwrap());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], json!("carol"));
    }

    #[test]
    fn test_match_and_or() {
        let store = seeded();
        let criteria = json!({ "$or": [ { "age": { "$lt": 20 } }, { "name": "carol" } ] });
        let docs = drain(
            store
                .aggregate("test", "users", &[PipelineStage::Match(criteria)])
                .unwrap(),
        );
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_lookup_unwind_preserving() {
        let store = seeded();
        store.seed(
            "test",
            "orders",
            vec![
                json!({ "_id": 10, "user_id": 1, "total": 9.5 }),
                json!({ "_id": 11, "user_id": 1, "total": 3.0 }),
                json!({ "_id": 12, "user_id": 3, "total": 7.25 }),
            ],
        );
        let pipeline = vec![
            PipelineStage::Lookup {
                from: "orders".into(),
                local_field: "_id".into(),
                foreign_field: "user_id".into(),
                as_field: "o".into(),
            },
            PipelineStage::Unwind {
                path: "o".into(),
                preserve_null_and_empty: true,
            },
        ];
        let docs = drain(store.aggregate("test", "users", &pipeline).unwrap());
        // alice twice, bob preserved with null, carol once
        assert_eq!(docs.len(), 4);
        let bob = docs.iter().find(|d| d["name"] == json!("bob")).unwrap();
        assert_eq!(bob["o"], Value::Null);
    }

    #[test]
    fn test_unwind_dropping_unmatched() {
        let store = seeded();
        store.seed("test", "orders", vec![json!({ "user_id": 2 })]);
        let pipeline = vec![
            PipelineStage::Lookup {
                from: "orders".into(),
                local_field: "_id".into(),
                foreign_field: "user_id".into(),
                as_field: "o".into(),
            },
            PipelineStage::Unwind {
                path: "o".into(),
                preserve_null_and_empty: false,
            },
        ];
        let docs = drain(store.aggregate("test", "users", &pipeline).unwrap());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], json!("bob"));
    }

    #[test]
    fn test_numeric_cross_representation_equality() {
        assert_eq!(
            json_compare(&json!(2), &json!(2.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(json_compare(&json!("a"), &json!(1)), None);
    }
}
