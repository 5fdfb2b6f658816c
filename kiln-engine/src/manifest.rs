//! Build manifest: the persisted listing of a build pass.
//!
//! `write_to_dir` lays a pass out as
//!
//! ```text
//! <dir>/manifest.json
//! <dir>/pages/<sha256 of cache key>.<renderer extension>
//! ```
//!
//! so a static-serving layer can map a key to its payload without parsing
//! anything but the manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_core::{
    compute_content_hash, Artifact, CacheKey, KilnResult, ParamSet, RouteId, StorageError,
    Timestamp,
};
use serde::{Deserialize, Serialize};

/// File name of the manifest inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

const PAGES_DIR: &str = "pages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub params: ParamSet,
    pub key: CacheKey,
    pub generated_at: Timestamp,
    pub ttl_seconds: Option<u64>,
    /// Hex SHA-256 of the payload.
    pub content_hash: String,
    /// Payload path relative to the output directory.
    pub payload_file: String,
    #[serde(skip)]
    payload: Vec<u8>,
}

impl ManifestEntry {
    /// `extension` names the payload file type; rendered bytes are opaque
    /// to the manifest.
    pub fn new(params: &ParamSet, key: &CacheKey, artifact: &Artifact, extension: &str) -> Self {
        let file_name = hex::encode(compute_content_hash(key.as_bytes()));
        Self {
            params: params.clone(),
            key: key.clone(),
            generated_at: artifact.generated_at,
            ttl_seconds: artifact.ttl_seconds,
            content_hash: artifact.etag(),
            payload_file: format!("{}/{}.{}", PAGES_DIR, file_name, extension),
            payload: artifact.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub generated_at: Option<Timestamp>,
    pub routes: BTreeMap<RouteId, Vec<ManifestEntry>>,
}

fn io_error(path: &Path, e: impl std::fmt::Display) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl BuildManifest {
    pub fn new(generated_at: Timestamp) -> Self {
        Self {
            generated_at: Some(generated_at),
            routes: BTreeMap::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn to_json(&self) -> KilnResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Write the manifest and one payload file per entry under `dir`.
    ///
    /// Returns the manifest path.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> KilnResult<PathBuf> {
        let dir = dir.as_ref();
        let pages = dir.join(PAGES_DIR);
        std::fs::create_dir_all(&pages).map_err(|e| io_error(&pages, e))?;

        for entry in self.routes.values().flatten() {
            let path = dir.join(&entry.payload_file);
            std::fs::write(&path, &entry.payload).map_err(|e| io_error(&path, e))?;
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, self.to_json()?).map_err(|e| io_error(&manifest_path, e))?;

        tracing::info!(
            path = %manifest_path.display(),
            entries = self.entry_count(),
            "Wrote build manifest"
        );
        Ok(manifest_path)
    }

    /// Read a manifest back. Payloads stay on disk.
    pub fn read_from_dir(dir: impl AsRef<Path>) -> KilnResult<Self> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        serde_json::from_str(&raw).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_back() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
        let route = RouteId::new("meetup");
        let params = ParamSet::single("meetupId", "m1");
        let key = CacheKey::new(&route, &params);
        let artifact = Artifact::new(b"{\"title\":\"v1\"}".to_vec(), json!({"title": "v1"}), at, Some(10));

        let mut manifest = BuildManifest::new(at);
        manifest
            .routes
            .insert(route.clone(), vec![ManifestEntry::new(&params, &key, &artifact, "json")]);

        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = manifest.write_to_dir(dir.path()).expect("write should succeed");
        assert!(path.ends_with(MANIFEST_FILE));

        let read = BuildManifest::read_from_dir(dir.path()).expect("read should succeed");
        let entries = read.routes.get(&route).expect("route present");
        assert_eq!(entries[0].key, key);
        assert_eq!(entries[0].content_hash, artifact.etag());
        assert_eq!(entries[0].ttl_seconds, Some(10));

        assert!(entries[0].payload_file.ends_with(".json"));
        let payload = std::fs::read(dir.path().join(&entries[0].payload_file)).expect("payload");
        assert_eq!(payload, artifact.payload);
    }

    #[test]
    fn test_payload_file_uses_given_extension() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
        let params = ParamSet::single("meetupId", "m1");
        let key = CacheKey::new(&RouteId::new("meetup"), &params);
        let artifact = Artifact::new(vec![0xde, 0xad], json!({}), at, None);

        let entry = ManifestEntry::new(&params, &key, &artifact, "bin");
        let expected = format!(
            "pages/{}.bin",
            hex::encode(compute_content_hash(key.as_bytes()))
        );
        assert_eq!(entry.payload_file, expected);
    }
}
