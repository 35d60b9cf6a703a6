//! Schema cache (spec.md §4.4): parsed schema, its version, and the
//! transaction-version range for which it is valid, shared across threads
//! under one mutex (spec.md §5 Shared resources).

use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CachedSchema {
    pub schema: std::sync::Arc<str>,
    pub schema_version: u64,
    pub valid_from: u64,
    pub valid_to: u64,
}

#[derive(Default)]
pub struct SchemaCache {
    inner: Mutex<Option<CachedSchema>>,
}

impl SchemaCache {
    /// Takes a read-side snapshot; readers never block a writer widening
    /// the cached range.
    pub fn snapshot(&self) -> Option<CachedSchema> {
        self.inner.lock().expect("schema cache poisoned").clone()
    }

    /// Installs or widens the cached schema's valid range. The range only
    /// ever widens monotonically: a narrower `[v_from, v_to]` than what is
    /// already cached for the same schema version is a no-op.
    pub fn cache_schema(&self, schema: std::sync::Arc<str>, schema_version: u64, v_from: u64, v_to: u64) {
        let mut guard = self.inner.lock().expect("schema cache poisoned");
        match guard.as_mut() {
            Some(cached) if cached.schema_version == schema_version => {
                cached.valid_from = cached.valid_from.min(v_from);
                cached.valid_to = cached.valid_to.max(v_to);
            }
            _ => {
                *guard = Some(CachedSchema { schema, schema_version, valid_from: v_from, valid_to: v_to });
            }
        }
    }

    /// Extends the cached range to cover `next` when a read transaction
    /// advances from `prev` to `next` without a schema change.
    pub fn advance_schema_cache(&self, prev: u64, next: u64) {
        let mut guard = self.inner.lock().expect("schema cache poisoned");
        if let Some(cached) = guard.as_mut() {
            if cached.valid_to >= prev {
                cached.valid_to = cached.valid_to.max(next);
            }
        }
    }

    /// Whether a transaction at `version` can reuse the cached schema.
    pub fn covers(&self, version: u64) -> bool {
        self.snapshot()
            .map(|c| c.valid_from <= version && version <= c.valid_to)
            .unwrap_or(false)
    }
}
