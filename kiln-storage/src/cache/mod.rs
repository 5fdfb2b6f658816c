//! Artifact cache: store trait, backends and freshness classification.
//!
//! # Architecture
//!
//! - **ArtifactStore**: keyed store of rendered artifacts, one per `CacheKey`
//! - **InMemoryArtifactStore**: sharded map, readers never wait on writers of other keys
//! - **LmdbArtifactStore**: durable store that survives restarts
//! - **Freshness**: pure `Fresh` / `Stale` / `Missing` classification
//!
//! Stores never build anything. Writes arrive only from the build
//! coordinator, which serializes them per key.

mod freshness;
mod lmdb_backend;
mod memory;
mod traits;

pub use freshness::{classify, Freshness, Lookup, RevalidationPolicy};
pub use lmdb_backend::{LmdbArtifactStore, LmdbStoreError};
pub use memory::InMemoryArtifactStore;
pub use traits::{ArtifactStore, CacheStats};
