//! Artifact store trait and cache statistics.
//!
//! This module defines the trait that must be implemented by artifact
//! stores. The engine only ever talks to a store through it.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_core::{Artifact, CacheKey, KilnResult, RouteId};

/// Keyed store of rendered artifacts.
///
/// Implementations must be thread-safe: concurrent operations on different
/// keys must not block each other, and writes to the same key must be
/// linearizable. A `put` replaces the whole artifact at once; readers see
/// either the old artifact or the new one, never a mix.
///
/// # Key Format
///
/// Keys are canonical [`CacheKey`]s. Every key of a route starts with
/// [`CacheKey::route_prefix`], which backends may use for range scans.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Look up an artifact. Never triggers a build.
    async fn get(&self, key: &CacheKey) -> KilnResult<Option<Arc<Artifact>>>;

    /// Store an artifact, replacing whatever was there.
    async fn put(&self, key: &CacheKey, artifact: Artifact) -> KilnResult<()>;

    /// Remove one entry. Returns whether an entry existed.
    async fn invalidate(&self, key: &CacheKey) -> KilnResult<bool>;

    /// Mark the artifact under `key` as retained after a failed rebuild.
    ///
    /// Only `source_error` changes; payload and `generated_at` are kept.
    /// Returns `false` when there is nothing to annotate.
    async fn record_failure(&self, key: &CacheKey, error: &str) -> KilnResult<bool>;

    /// Remove every entry belonging to `route`. Returns how many were removed.
    async fn invalidate_route(&self, route: &RouteId) -> KilnResult<u64>;

    /// All entries of `route`, ordered by key.
    async fn entries(&self, route: &RouteId) -> KilnResult<Vec<(CacheKey, Arc<Artifact>)>>;

    /// Get cache statistics.
    async fn stats(&self) -> KilnResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found an artifact.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of entries currently in the store.
    pub entry_count: u64,
    /// Approximate payload bytes held.
    pub payload_bytes: u64,
    /// Number of artifacts currently carrying a `source_error`.
    pub retained_after_failure: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
