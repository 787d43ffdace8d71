use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::trace;

use super::{CompiledPredicate, compile};
use crate::error::ParseError;

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cached predicates.
    pub entries: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to compile.
    pub compilations: u64,
}

/// Memoizing compiler keyed by the exact check string.
///
/// Reads go through `DashMap`'s sharded locks. A first compile holds the
/// shard's entry lock, so concurrent first accesses to the same string
/// compile it once and share the result.
#[derive(Debug, Default)]
pub struct PredicateCache {
    entries: DashMap<String, Arc<CompiledPredicate>>,
    hits: AtomicU64,
    compilations: AtomicU64,
}

impl PredicateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled predicate for `check_str`, compiling it on first use.
    ///
    /// Parse failures are not cached; every call with a bad string reports
    /// the error again.
    pub fn get_or_compile(&self, check_str: &str) -> Result<Arc<CompiledPredicate>, ParseError> {
        if let Some(hit) = self.entries.get(check_str) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(hit.value()));
        }

        let entry = self
            .entries
            .entry(check_str.to_owned())
            .or_try_insert_with(|| {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                trace!(check = check_str, "compiling check string");
                compile(check_str).map(Arc::new)
            })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Number of cached predicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached predicate.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshot the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
        }
    }
}
