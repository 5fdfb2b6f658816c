//! KILN Core - Data Types
//!
//! Pure data structures shared by every KILN crate: routes and the cache
//! keys derived from them, rendered artifacts, identifier codecs, the error
//! hierarchy and configuration. No I/O and no async runtime live here.

pub mod artifact;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod route;

pub use artifact::Artifact;
pub use codec::{IdCodec, ObjectId, ObjectIdCodec, SlugCodec};
pub use config::{
    KilnConfig, DEFAULT_BUILD_CONCURRENCY, DEFAULT_BUILD_TIMEOUT_MS, MAX_ROUTE_ID_BYTES,
};
pub use error::{
    BuildError, ConfigError, DataError, EnumerationError, KeyDecodeError, KilnError, KilnResult,
    StorageError,
};
pub use identity::{compute_content_hash, ContentHash, Timestamp};
pub use route::{CacheKey, FallbackMode, ParamSet, Route, RouteId};
