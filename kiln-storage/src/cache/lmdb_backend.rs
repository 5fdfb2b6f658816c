//! LMDB-backed artifact store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep rendered artifacts
//! in a memory-mapped file, so a restarted process can serve everything the
//! previous one built without running a single builder.
//!
//! # Layout
//!
//! One unnamed database. A [`CacheKey`] that fits within LMDB's key limit is
//! stored as its raw bytes. Longer keys are stored as the route prefix, a
//! `#` and the hex SHA-256 of the full key; canonical keys never have a `#`
//! right after the route prefix, so the two forms cannot collide. Values are
//! the JSON encoding of the full [`CacheKey`] together with its
//! [`Artifact`], and reads compare that key before answering. Every stored
//! key of a route starts with [`CacheKey::route_prefix`], which is what
//! route-scoped operations scan for.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions:
//! - Read transactions for `get`, `entries` and `stats`
//! - Write transactions for `put`, `invalidate`, `record_failure` and `invalidate_route`
//! - Hit/miss counters are atomics

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use kiln_core::{
    compute_content_hash, Artifact, CacheKey, KilnError, KilnResult, RouteId, StorageError,
};
use serde::{Deserialize, Serialize};

use super::traits::{ArtifactStore, CacheStats};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to create the directory or open the LMDB environment.
    #[error("Failed to open LMDB environment at {path}: {reason}")]
    EnvOpen { path: String, reason: String },

    /// Failed to open the database within the environment.
    #[error("Failed to open database at {path}: {reason}")]
    DbOpen { path: String, reason: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Even the hashed form of the key exceeds the environment's key limit.
    #[error("Cache key of {len} bytes cannot be stored (limit {max})")]
    KeyTooLong { len: usize, max: usize },
}

impl From<LmdbStoreError> for KilnError {
    fn from(e: LmdbStoreError) -> Self {
        let storage = match e {
            LmdbStoreError::EnvOpen { path, reason } | LmdbStoreError::DbOpen { path, reason } => {
                StorageError::OpenFailed { path, reason }
            }
            LmdbStoreError::Serialization(reason) => StorageError::Serialization { reason },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        };
        KilnError::Storage(storage)
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

#[derive(Serialize)]
struct StoredRef<'a> {
    key: &'a CacheKey,
    artifact: &'a Artifact,
}

#[derive(Deserialize)]
struct Stored {
    key: CacheKey,
    artifact: Artifact,
}

fn encode(key: &CacheKey, artifact: &Artifact) -> Result<Vec<u8>, LmdbStoreError> {
    serde_json::to_vec(&StoredRef { key, artifact })
        .map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Stored, LmdbStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

/// Durable artifact store.
///
/// ```ignore
/// use kiln_storage::LmdbArtifactStore;
///
/// let store = LmdbArtifactStore::open("/var/lib/kiln/store", 256)?;
/// store.put(&key, artifact).await?;
/// ```
pub struct LmdbArtifactStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbArtifactStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let path = path.as_ref();
        let display = || path.display().to_string();
        std::fs::create_dir_all(path).map_err(|e| LmdbStoreError::EnvOpen {
            path: display(),
            reason: e.to_string(),
        })?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen {
            path: display(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, None)
                .map_err(|e| LmdbStoreError::DbOpen {
                    path: display(),
                    reason: e.to_string(),
                })?;
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(
            path = %path.display(),
            max_size_mb,
            max_key_size = env.max_key_size(),
            "Opened LMDB artifact store"
        );

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// The bytes `key` is stored under.
    fn storage_key(&self, key: &CacheKey) -> Result<Vec<u8>, LmdbStoreError> {
        let max = self.env.max_key_size();
        if key.as_bytes().len() <= max {
            return Ok(key.as_bytes().to_vec());
        }
        let route = CacheKey::parse(key.as_str())
            .map(|(route, _)| CacheKey::route_prefix(&route))
            .unwrap_or_default();
        let hashed = format!(
            "{}#{}",
            route,
            hex::encode(compute_content_hash(key.as_bytes()))
        );
        if hashed.len() > max {
            return Err(LmdbStoreError::KeyTooLong {
                len: key.as_bytes().len(),
                max,
            });
        }
        Ok(hashed.into_bytes())
    }

    /// Stored keys and entries whose stored key starts with `prefix`.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Stored)>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut found = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = result.map_err(txn_err)?;
            if key.starts_with(prefix) {
                found.push((key.to_vec(), decode(value)?));
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl ArtifactStore for LmdbArtifactStore {
    async fn get(&self, key: &CacheKey) -> KilnResult<Option<Arc<Artifact>>> {
        let storage_key = self.storage_key(key)?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let stored = match self.db.get(&rtxn, &storage_key).map_err(txn_err)? {
            Some(bytes) => Some(decode(bytes)?),
            None => None,
        };
        match stored {
            Some(stored) if stored.key == *key => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Arc::new(stored.artifact)))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &CacheKey, artifact: Artifact) -> KilnResult<()> {
        let storage_key = self.storage_key(key)?;
        let bytes = encode(key, &artifact)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, &storage_key, &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> KilnResult<bool> {
        let storage_key = self.storage_key(key)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, &storage_key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn record_failure(&self, key: &CacheKey, error: &str) -> KilnResult<bool> {
        let storage_key = self.storage_key(key)?;
        // Read and rewrite inside one write transaction so a concurrent `put`
        // is either fully before or fully after this update.
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let existing = match self.db.get(&wtxn, &storage_key).map_err(txn_err)? {
            Some(bytes) => decode(bytes)?,
            None => return Ok(false),
        };
        if existing.key != *key {
            return Ok(false);
        }
        let bytes = encode(key, &existing.artifact.with_source_error(error))?;
        self.db
            .put(&mut wtxn, &storage_key, &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn invalidate_route(&self, route: &RouteId) -> KilnResult<u64> {
        let prefix = CacheKey::route_prefix(route);
        let keys: Vec<Vec<u8>> = self
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .filter(|(_, stored)| stored.key.belongs_to(route))
            .map(|(key, _)| key)
            .collect();

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(route = %route, deleted, "Invalidated route in LMDB store");
        Ok(deleted)
    }

    async fn entries(&self, route: &RouteId) -> KilnResult<Vec<(CacheKey, Arc<Artifact>)>> {
        let prefix = CacheKey::route_prefix(route);
        let mut entries = Vec::new();
        for (_, stored) in self.scan_prefix(prefix.as_bytes())? {
            if CacheKey::parse(stored.key.as_str()).is_none() {
                tracing::warn!(key = %stored.key, "Skipping non-canonical key in LMDB store");
                continue;
            }
            entries.push((stored.key, Arc::new(stored.artifact)));
        }
        // Hashed keys break byte order.
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entries)
    }

    async fn stats(&self) -> KilnResult<CacheStats> {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        };
        for (_, stored) in self.scan_prefix(&[])? {
            stats.entry_count += 1;
            stats.payload_bytes += stored.artifact.payload.len() as u64;
            if stored.artifact.source_error.is_some() {
                stats.retained_after_failure += 1;
            }
        }
        Ok(stats)
    }
}
