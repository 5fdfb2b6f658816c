//! KILN Storage - Artifact Stores and Data Source Traits
//!
//! Defines where rendered artifacts live, how their freshness is judged,
//! and the capability the engine uses to read the underlying records.

pub mod cache;
pub mod memory_source;
pub mod source;

pub use cache::{
    classify, ArtifactStore, CacheStats, Freshness, InMemoryArtifactStore, LmdbArtifactStore,
    LmdbStoreError, Lookup, RevalidationPolicy,
};
pub use memory_source::InMemoryDataSource;
pub use source::{DataSource, IdOf, RawRecord};
