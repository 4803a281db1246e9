//! Prepared statement management and caching.
//!
//! - `PreparedStatement`: a server-side statement with its result layout
//! - `StatementCache`: per-connection LRU keyed by query text and parameter types

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::protocol::{FieldDescription, Format};
use super::types::Oid;
use crate::value::SharedColumns;

// ============================================================================
// Prepared Statement
// ============================================================================

/// A statement parsed by the server and described once.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-side name (e.g. "__qh_1")
    pub name: String,
    /// Parameter types as resolved by the server
    pub param_types: Vec<Oid>,
    /// Result column descriptions
    pub columns: Arc<Vec<FieldDescription>>,
    /// Column names shared by every row this statement produces
    pub column_names: SharedColumns,
    /// Format requested for each result column in Bind
    pub result_formats: Vec<Format>,
}

impl PreparedStatement {
    pub fn new(name: String) -> Self {
        Self {
            name,
            param_types: Vec::new(),
            columns: Arc::new(Vec::new()),
            column_names: Arc::new(Vec::new()),
            result_formats: Vec::new(),
        }
    }

    pub fn set_param_types(&mut self, types: Vec<Oid>) {
        self.param_types = types;
    }

    /// Record the row layout and pick a result format per column.
    pub fn set_columns(&mut self, columns: Vec<FieldDescription>) {
        self.result_formats = columns.iter().map(|c| c.type_oid.result_format()).collect();
        self.column_names = Arc::new(columns.iter().map(|c| c.name.clone()).collect());
        self.columns = Arc::new(columns);
    }

    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// Cache key for a query prepared with the given parameter types.
///
/// The same text bound with differently typed values gets its own statement.
pub fn cache_key(query: &str, param_types: &[Oid]) -> String {
    let mut key = String::with_capacity(query.len() + param_types.len() * 5);
    key.push_str(query);
    key.push('\0');
    for oid in param_types {
        key.push_str(&oid.as_i32().to_string());
        key.push(',');
    }
    key
}

// ============================================================================
// Statement Cache (O(1) LRU)
// ============================================================================

/// Per-connection LRU of prepared statements.
pub struct StatementCache {
    cache: LruCache<String, Arc<PreparedStatement>>,
    next_id: u32,
    /// Names evicted from the cache but not yet closed on the server
    pending_close: Vec<String>,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            next_id: 0,
            pending_close: Vec::new(),
        }
    }

    /// Look up a statement and mark it recently used.
    pub fn get(&mut self, key: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.get(key).map(Arc::clone)
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    /// Insert a statement, queueing whatever it displaces for closing.
    pub fn insert(&mut self, key: String, statement: Arc<PreparedStatement>) {
        let name = statement.name.clone();
        // `push` returns either the LRU entry or the replaced value for `key`
        if let Some((_, displaced)) = self.cache.push(key, statement) {
            if displaced.name != name {
                self.pending_close.push(displaced.name.clone());
            }
        }
    }

    /// Statement names the connection should close before its next Parse.
    pub fn take_pending_close(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_close)
    }

    /// Generate a unique statement name for this connection.
    pub fn next_statement_name(&mut self) -> String {
        self.next_id = self.next_id.wrapping_add(1);
        format!("__qh_{}", self.next_id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget every statement without closing them on the server.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.pending_close.clear();
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(100)
    }
}
