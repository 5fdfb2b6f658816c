//! Sharded in-memory artifact store.
//!
//! Entries live in a `DashMap`, so lookups and writes for different keys
//! land on independent shards and never wait on each other. Artifacts are
//! held behind `Arc`, making reads a pointer copy regardless of payload size.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use kiln_core::{Artifact, CacheKey, KilnResult, RouteId};

use super::traits::{ArtifactStore, CacheStats};

/// In-memory artifact store.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    entries: DashMap<CacheKey, Arc<Artifact>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn get(&self, key: &CacheKey) -> KilnResult<Option<Arc<Artifact>>> {
        let found = self.entries.get(key).map(|entry| Arc::clone(entry.value()));
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn put(&self, key: &CacheKey, artifact: Artifact) -> KilnResult<()> {
        self.entries.insert(key.clone(), Arc::new(artifact));
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> KilnResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn record_failure(&self, key: &CacheKey, error: &str) -> KilnResult<bool> {
        // Holding the shard guard keeps this linearizable with `put` on the same key.
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                let retained = entry.value().as_ref().clone().with_source_error(error);
                *entry.value_mut() = Arc::new(retained);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn invalidate_route(&self, route: &RouteId) -> KilnResult<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.belongs_to(route));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn entries(&self, route: &RouteId) -> KilnResult<Vec<(CacheKey, Arc<Artifact>)>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key().belongs_to(route))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn stats(&self) -> KilnResult<CacheStats> {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in self.entries.iter() {
            stats.entry_count += 1;
            stats.payload_bytes += entry.value().payload.len() as u64;
            if entry.value().source_error.is_some() {
                stats.retained_after_failure += 1;
            }
        }
        Ok(stats)
    }
}
