//! Outcome of a build pass.

use std::sync::Arc;

use kiln_core::{Artifact, BuildError, CacheKey, EnumerationError, ParamSet, RouteId, Timestamp};

use crate::manifest::{BuildManifest, ManifestEntry};

/// One page built during the pass.
#[derive(Debug, Clone)]
pub struct BuiltEntry {
    pub params: ParamSet,
    pub key: CacheKey,
    pub artifact: Arc<Artifact>,
}

/// One page whose build failed during the pass.
#[derive(Debug, Clone)]
pub struct KeyFailure {
    pub params: ParamSet,
    pub key: CacheKey,
    pub error: BuildError,
}

#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Enumeration succeeded; every enumerated key was attempted.
    Built {
        enumerated: usize,
        built: Vec<BuiltEntry>,
        failures: Vec<KeyFailure>,
    },
    /// Enumeration failed; nothing was built for the route.
    EnumerationFailed { error: EnumerationError },
}

#[derive(Debug, Clone)]
pub struct RouteReport {
    pub route: RouteId,
    pub outcome: RouteOutcome,
}

impl RouteReport {
    pub fn built(&self) -> &[BuiltEntry] {
        match &self.outcome {
            RouteOutcome::Built { built, .. } => built,
            RouteOutcome::EnumerationFailed { .. } => &[],
        }
    }

    pub fn failures(&self) -> &[KeyFailure] {
        match &self.outcome {
            RouteOutcome::Built { failures, .. } => failures,
            RouteOutcome::EnumerationFailed { .. } => &[],
        }
    }
}

/// Per-route results of [`RequestDispatcher::build_all`](crate::RequestDispatcher::build_all).
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub started_at: Timestamp,
    /// Extension the renderer gives its payload files.
    pub payload_extension: String,
    pub routes: Vec<RouteReport>,
}

impl BuildReport {
    pub fn new(started_at: Timestamp, payload_extension: impl Into<String>) -> Self {
        Self {
            started_at,
            payload_extension: payload_extension.into(),
            routes: Vec::new(),
        }
    }

    pub fn route(&self, id: &RouteId) -> Option<&RouteReport> {
        self.routes.iter().find(|report| &report.route == id)
    }

    pub fn built_count(&self) -> usize {
        self.routes.iter().map(|r| r.built().len()).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.routes.iter().map(|r| r.failures().len()).sum()
    }

    pub fn enumeration_failures(&self) -> impl Iterator<Item = &EnumerationError> {
        self.routes.iter().filter_map(|r| match &r.outcome {
            RouteOutcome::EnumerationFailed { error } => Some(error),
            RouteOutcome::Built { .. } => None,
        })
    }

    /// True when every route enumerated and every key built.
    pub fn is_clean(&self) -> bool {
        self.enumeration_failures().next().is_none() && self.failure_count() == 0
    }

    /// The persisted listing of everything this pass built.
    pub fn manifest(&self) -> BuildManifest {
        let mut manifest = BuildManifest::new(self.started_at);
        for report in &self.routes {
            let entries = report
                .built()
                .iter()
                .map(|entry| {
                    ManifestEntry::new(
                        &entry.params,
                        &entry.key,
                        &entry.artifact,
                        &self.payload_extension,
                    )
                })
                .collect();
            manifest.routes.insert(report.route.clone(), entries);
        }
        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_counts_and_manifest() {
        let now = Utc::now();
        let meetup = RouteId::new("meetup");
        let params = ParamSet::single("meetupId", "m1");
        let key = CacheKey::new(&meetup, &params);
        let artifact = Arc::new(Artifact::new(b"{}".to_vec(), json!({}), now, None));

        let failed_params = ParamSet::single("meetupId", "m2");
        let report = BuildReport {
            started_at: now,
            payload_extension: "html".to_string(),
            routes: vec![
                RouteReport {
                    route: meetup.clone(),
                    outcome: RouteOutcome::Built {
                        enumerated: 2,
                        built: vec![BuiltEntry {
                            params: params.clone(),
                            key: key.clone(),
                            artifact,
                        }],
                        failures: vec![KeyFailure {
                            key: CacheKey::new(&meetup, &failed_params),
                            params: failed_params,
                            error: BuildError::Render {
                                reason: "bad".to_string(),
                            },
                        }],
                    },
                },
                RouteReport {
                    route: RouteId::new("meetups"),
                    outcome: RouteOutcome::EnumerationFailed {
                        error: EnumerationError {
                            route: RouteId::new("meetups"),
                            reason: "offline".to_string(),
                        },
                    },
                },
            ],
        };

        assert_eq!(report.built_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.enumeration_failures().count(), 1);
        assert!(!report.is_clean());

        let manifest = report.manifest();
        let entries = manifest.routes.get(&meetup).expect("meetup entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key);
        assert!(entries[0].payload_file.ends_with(".html"));
        assert!(manifest
            .routes
            .get(&RouteId::new("meetups"))
            .expect("listed even when empty")
            .is_empty());
    }
}
