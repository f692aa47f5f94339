//! SQL value and type representation.
//!
//! `SqlValue` is one materialized cell; `SqlType` is the static tag used for
//! planning decisions before any row is seen. Comparison, truthiness and the
//! numeric coercion used by mixed-type comparison all live here.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as Json};

use crate::store::Document;

/// Static SQL type tag.
///
/// The discriminant order doubles as the coercion precedence used by type
/// reconciliation: when two comparable types differ, the lower-precedence
/// operand is converted toward the higher-precedence one. ObjectId sits at
/// the bottom on purpose — it is never a conversion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Null,
    ObjectId,
    Boolean,
    Varchar,
    Date,
    Timestamp,
    Int,
    Float,
    Tuple,
}

impl SqlType {
    /// Coercion precedence (higher wins as the conversion target).
    pub fn precedence(self) -> u8 {
        match self {
            SqlType::Null => 0,
            SqlType::ObjectId => 1,
            SqlType::Boolean => 2,
            SqlType::Varchar => 3,
            SqlType::Date => 4,
            SqlType::Timestamp => 5,
            SqlType::Int => 6,
            SqlType::Float => 7,
            SqlType::Tuple => 8,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, SqlType::Int | SqlType::Float | SqlType::Boolean)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, SqlType::Date | SqlType::Timestamp)
    }

    /// "Similar" types compare directly without a conversion node.
    pub fn is_similar_to(self, other: SqlType) -> bool {
        if self == other {
            return true;
        }
        (self.is_numeric() && other.is_numeric()) || (self.is_temporal() && other.is_temporal())
    }

    /// Whether reconciliation can bridge the two types at all.
    pub fn is_comparable_to(self, other: SqlType) -> bool {
        if self.is_similar_to(other) || self == SqlType::Null || other == SqlType::Null {
            return true;
        }
        match (self, other) {
            (SqlType::Varchar, t) | (t, SqlType::Varchar) => {
                t.is_numeric() || t.is_temporal() || t == SqlType::ObjectId
            }
            _ => false,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Null => "null",
            SqlType::ObjectId => "objectid",
            SqlType::Boolean => "boolean",
            SqlType::Varchar => "varchar",
            SqlType::Date => "date",
            SqlType::Timestamp => "timestamp",
            SqlType::Int => "int",
            SqlType::Float => "float",
            SqlType::Tuple => "tuple",
        };
        f.write_str(name)
    }
}

/// One materialized SQL value.
///
/// Temporal values carry milliseconds since the Unix epoch; `Date` is the
/// midnight-truncated form. ObjectId carries the store's hex identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    Varchar(String),
    ObjectId(String),
    Date(i64),
    Timestamp(i64),
    Tuple(Vec<SqlValue>),
}

impl SqlValue {
    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlValue::Null => SqlType::Null,
            SqlValue::Boolean(_) => SqlType::Boolean,
            SqlValue::Int(_) => SqlType::Int,
            SqlValue::Float(_) => SqlType::Float,
            SqlValue::Varchar(_) => SqlType::Varchar,
            SqlValue::ObjectId(_) => SqlType::ObjectId,
            SqlValue::Date(_) => SqlType::Date,
            SqlValue::Timestamp(_) => SqlType::Timestamp,
            SqlValue::Tuple(_) => SqlType::Tuple,
        }
    }

    /// SQL truthiness.
    ///
    /// Booleans pass through; numbers are truthy iff nonzero; strings are
    /// truthy iff they parse as a nonzero float (unparseable strings are
    /// false, not an error). Every other type — including temporal and
    /// object-id values — is false. The temporal/object-id rule is a known
    /// gap inherited from the system this reimplements; it is preserved
    /// rather than redesigned.
    pub fn is_truthy(&self) -> bool {
        match self {
            SqlValue::Boolean(b) => *b,
            SqlValue::Int(n) => *n != 0,
            SqlValue::Float(f) => *f != 0.0,
            SqlValue::Varchar(s) => s.trim().parse::<f64>().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    /// Numeric coercion used by arithmetic and mixed-type comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(n) => Some(*n as f64),
            SqlValue::Float(f) => Some(*f),
            SqlValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            SqlValue::Date(ms) | SqlValue::Timestamp(ms) => Some(*ms as f64),
            SqlValue::Varchar(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Total ordering over values.
    ///
    /// Values of similar types compare naturally (numerics through `f64`,
    /// temporals on their epoch offset). Null sorts first. Values whose
    /// types cannot be reconciled fall back to type-precedence rank so that
    /// OrderBy stays total and deterministic; the algebrizer rejects such
    /// comparisons wherever it can see them.
    pub fn compare(&self, other: &SqlValue) -> Ordering {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
            (SqlValue::Null, _) => Ordering::Less,
            (_, SqlValue::Null) => Ordering::Greater,
            (SqlValue::Varchar(a), SqlValue::Varchar(b)) => a.cmp(b),
            (SqlValue::ObjectId(a), SqlValue::ObjectId(b)) => a.cmp(b),
            (SqlValue::Boolean(a), SqlValue::Boolean(b)) => a.cmp(b),
            (SqlValue::Tuple(a), SqlValue::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => self
                    .sql_type()
                    .precedence()
                    .cmp(&other.sql_type().precedence()),
            },
        }
    }

    /// Append a deterministic byte encoding for hash-partitioning keys.
    ///
    /// Numeric values encode through `f64` so `2` and `2.0` land in the same
    /// group partition, matching comparison semantics.
    pub fn encode_key(&self, key: &mut Vec<u8>) {
        match self {
            SqlValue::Null => key.push(0),
            SqlValue::Boolean(b) => {
                key.push(1);
                key.push(*b as u8);
            }
            SqlValue::Int(_) | SqlValue::Float(_) => {
                key.push(2);
                let f = self.as_f64().unwrap_or(0.0);
                key.extend_from_slice(&f.to_le_bytes());
            }
            SqlValue::Varchar(s) => {
                key.push(3);
                key.extend_from_slice(&(s.len() as u32).to_le_bytes());
                key.extend_from_slice(s.as_bytes());
            }
            SqlValue::ObjectId(s) => {
                key.push(4);
                key.extend_from_slice(&(s.len() as u32).to_le_bytes());
                key.extend_from_slice(s.as_bytes());
            }
            SqlValue::Date(ms) => {
                key.push(5);
                key.extend_from_slice(&ms.to_le_bytes());
            }
            SqlValue::Timestamp(ms) => {
                key.push(6);
                key.extend_from_slice(&ms.to_le_bytes());
            }
            SqlValue::Tuple(items) => {
                key.push(7);
                key.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode_key(key);
                }
            }
        }
    }

    /// Convert a document field into a typed SQL value.
    ///
    /// A missing or null field is SQL NULL regardless of the declared type —
    /// the store is schemaless, so absence is indistinguishable from null at
    /// the SQL surface.
    pub fn from_document(value: Option<&Document>, sql_type: SqlType) -> SqlValue {
        let Some(value) = value else {
            return SqlValue::Null;
        };
        match value {
            Json::Null => SqlValue::Null,
            Json::Bool(b) => SqlValue::Boolean(*b),
            Json::Number(n) => match sql_type {
                SqlType::Float => SqlValue::Float(n.as_f64().unwrap_or(0.0)),
                SqlType::Date => SqlValue::Date(n.as_i64().unwrap_or(0)),
                SqlType::Timestamp => SqlValue::Timestamp(n.as_i64().unwrap_or(0)),
                _ => {
                    if let Some(i) = n.as_i64() {
                        SqlValue::Int(i)
                    } else {
                        SqlValue::Float(n.as_f64().unwrap_or(0.0))
                    }
                }
            },
            Json::String(s) => match sql_type {
                SqlType::ObjectId => SqlValue::ObjectId(s.clone()),
                _ => SqlValue::Varchar(s.clone()),
            },
            Json::Object(map) => {
                // Extended wire forms: {"$oid": "..."} and {"$date": ms}
                if let Some(Json::String(oid)) = map.get("$oid") {
                    return SqlValue::ObjectId(oid.clone());
                }
                if let Some(ms) = map.get("$date").and_then(Json::as_i64) {
                    return match sql_type {
                        SqlType::Date => SqlValue::Date(ms),
                        _ => SqlValue::Timestamp(ms),
                    };
                }
                SqlValue::Null
            }
            Json::Array(_) => SqlValue::Null,
        }
    }

    /// Render the value in the store's document representation.
    pub fn to_document(&self) -> Document {
        match self {
            SqlValue::Null => Json::Null,
            SqlValue::Boolean(b) => Json::Bool(*b),
            SqlValue::Int(n) => Json::Number((*n).into()),
            SqlValue::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            SqlValue::Varchar(s) => Json::String(s.clone()),
            SqlValue::ObjectId(s) => serde_json::json!({ "$oid": s }),
            SqlValue::Date(ms) | SqlValue::Timestamp(ms) => serde_json::json!({ "$date": ms }),
            SqlValue::Tuple(items) => Json::Array(items.iter().map(|v| v.to_document()).collect()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Boolean(b) => write!(f, "{b}"),
            SqlValue::Int(n) => write!(f, "{n}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Varchar(s) => write!(f, "'{s}'"),
            SqlValue::ObjectId(s) => write!(f, "ObjectId('{s}')"),
            SqlValue::Date(ms) => write!(f, "DATE({ms})"),
            SqlValue::Timestamp(ms) => write!(f, "TIMESTAMP({ms})"),
            SqlValue::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::field_value;
    use serde_json::json;

    // ── Truthiness ──

    #[test]
    fn test_truthiness_strings() {
        assert!(!SqlValue::Varchar("abc".into()).is_truthy());
        assert!(!SqlValue::Varchar("0".into()).is_truthy());
        assert!(SqlValue::Varchar("3.5".into()).is_truthy());
    }

    #[test]
    fn test_truthiness_numbers_and_booleans() {
        assert!(!SqlValue::Int(0).is_truthy());
        assert!(SqlValue::Int(-2).is_truthy());
        assert!(SqlValue::Float(0.1).is_truthy());
        assert!(!SqlValue::Float(0.0).is_truthy());
        assert!(SqlValue::Boolean(true).is_truthy());
        assert!(!SqlValue::Boolean(false).is_truthy());
    }

    #[test]
    fn test_truthiness_other_types_false() {
        // Preserved gap: temporal and object-id values are always false.
        assert!(!SqlValue::Null.is_truthy());
        assert!(!SqlValue::Timestamp(1).is_truthy());
        assert!(!SqlValue::Date(1).is_truthy());
        assert!(!SqlValue::ObjectId("abc123".into()).is_truthy());
    }

    // ── Comparison ──

    #[test]
    fn test_mixed_numeric_compare() {
        assert_eq!(
            SqlValue::Int(2).compare(&SqlValue::Float(2.0)),
            Ordering::Equal
        );
        assert_eq!(
            SqlValue::Int(3).compare(&SqlValue::Float(2.5)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(SqlValue::Null.compare(&SqlValue::Int(-100)), Ordering::Less);
        assert_eq!(
            SqlValue::Varchar("a".into()).compare(&SqlValue::Null),
            Ordering::Greater
        );
    }

    #[test]
    fn test_tuple_compare_lexicographic() {
        let a = SqlValue::Tuple(vec![SqlValue::Int(1), SqlValue::Int(2)]);
        let b = SqlValue::Tuple(vec![SqlValue::Int(1), SqlValue::Int(3)]);
        assert_eq!(a.compare(&b), Ordering::Less);
    }

    // ── Key encoding ──

    #[test]
    fn test_group_key_numeric_merge() {
        let mut a = vec![];
        let mut b = vec![];
        SqlValue::Int(2).encode_key(&mut a);
        SqlValue::Float(2.0).encode_key(&mut b);
        assert_eq!(a, b);
    }

    // ── Document conversion ──

    #[test]
    fn test_from_document_typed() {
        let doc = json!({ "n": 3, "f": 1.5, "s": "x", "oid": "ab12", "missing": null });
        let n = field_value(&doc, "n");
        assert_eq!(SqlValue::from_document(n, SqlType::Int), SqlValue::Int(3));
        assert_eq!(
            SqlValue::from_document(field_value(&doc, "f"), SqlType::Float),
            SqlValue::Float(1.5)
        );
        assert_eq!(
            SqlValue::from_document(field_value(&doc, "oid"), SqlType::ObjectId),
            SqlValue::ObjectId("ab12".into())
        );
        assert_eq!(
            SqlValue::from_document(field_value(&doc, "nope"), SqlType::Int),
            SqlValue::Null
        );
    }

    #[test]
    fn test_extended_wire_forms() {
        let doc = json!({ "id": { "$oid": "deadbeef" }, "at": { "$date": 1700000000000u64 } });
        assert_eq!(
            SqlValue::from_document(field_value(&doc, "id"), SqlType::ObjectId),
            SqlValue::ObjectId("deadbeef".into())
        );
        assert_eq!(
            SqlValue::from_document(field_value(&doc, "at"), SqlType::Timestamp),
            SqlValue::Timestamp(1_700_000_000_000)
        );
    }
}
