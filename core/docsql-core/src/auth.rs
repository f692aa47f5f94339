//! Authorization boundary consulted by the virtual schema tables.
//!
//! The engine never decides privileges itself; it asks the host through this
//! trait when synthesizing `information_schema` rows. A provider that cannot
//! produce an answer must return `false` — absence of a usable authorization
//! answer is treated as "not allowed", never as an error.

use std::fmt;
use std::sync::Arc;

/// Privilege lookup supplied by the host process.
pub trait AuthProvider: Send + Sync {
    /// Whether the current principal may see the named database at all.
    fn is_database_allowed(&self, db: &str) -> bool;

    /// Whether the current principal may see the named collection.
    fn is_collection_allowed(&self, db: &str, collection: &str) -> bool;
}

/// Provider that allows everything. Useful for tests and trusted embeddings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthProvider for AllowAll {
    fn is_database_allowed(&self, _db: &str) -> bool {
        true
    }

    fn is_collection_allowed(&self, _db: &str, _collection: &str) -> bool {
        true
    }
}

/// Provider that denies everything — the defensive default when the host
/// supplies no authorization collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl AuthProvider for DenyAll {
    fn is_database_allowed(&self, _db: &str) -> bool {
        false
    }

    fn is_collection_allowed(&self, _db: &str, _collection: &str) -> bool {
        false
    }
}

impl fmt::Debug for dyn AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthProvider")
    }
}

/// Shared handle type used by plan stages.
pub type SharedAuth = Arc<dyn AuthProvider>;
