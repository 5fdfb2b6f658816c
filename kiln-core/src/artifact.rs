//! Rendered artifacts and their generation metadata.

use crate::identity::{compute_content_hash, ContentHash, Timestamp};
use serde::{Deserialize, Serialize};

/// A rendered page plus the data it was rendered from.
///
/// The payload is opaque to the engine. Artifacts are only ever produced by
/// a successful build; a failed rebuild may annotate a retained artifact
/// through [`Artifact::with_source_error`] but never replaces its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub payload: Vec<u8>,
    /// Props the payload was rendered from.
    pub props: serde_json::Value,
    pub content_hash: ContentHash,
    pub generated_at: Timestamp,
    /// `None` means the artifact never goes stale.
    pub ttl_seconds: Option<u64>,
    /// Last rebuild error, set while this copy is retained after a failure.
    pub source_error: Option<String>,
}

impl Artifact {
    pub fn new(
        payload: Vec<u8>,
        props: serde_json::Value,
        generated_at: Timestamp,
        ttl_seconds: Option<u64>,
    ) -> Self {
        let content_hash = compute_content_hash(&payload);
        Self {
            payload,
            props,
            content_hash,
            generated_at,
            ttl_seconds,
            source_error: None,
        }
    }

    /// The same artifact, marked as retained after a failed rebuild.
    pub fn with_source_error(mut self, error: impl Into<String>) -> Self {
        self.source_error = Some(error.into());
        self
    }

    /// Hex form of the content hash, usable as an ETag.
    pub fn etag(&self) -> String {
        hex::encode(self.content_hash)
    }

    /// Time elapsed since generation. Negative under clock skew.
    pub fn age(&self, now: Timestamp) -> chrono::Duration {
        now.signed_duration_since(self.generated_at)
    }
}
