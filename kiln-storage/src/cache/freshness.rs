//! Freshness classification for cached artifacts.
//!
//! `classify` is the whole revalidation policy: a pure function of the
//! artifact's generation metadata and the caller-supplied clock. It reads
//! no global time, so the same inputs always yield the same answer.

use std::sync::Arc;

use kiln_core::{Artifact, Timestamp};

/// Where a cache entry stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Present and within its TTL (or without a TTL). Serve as is.
    Fresh,
    /// Present but past its TTL. Serve, and rebuild in the background.
    Stale,
    /// Nothing stored for the key.
    Missing,
}

impl Freshness {
    /// True when an artifact can be served right away.
    pub fn is_servable(&self) -> bool {
        matches!(self, Self::Fresh | Self::Stale)
    }

    /// True for the states a rebuild may be started from.
    pub fn needs_build(&self) -> bool {
        matches!(self, Self::Stale | Self::Missing)
    }
}

/// Classify `artifact` as of `now`.
///
/// - `Missing` when there is no artifact.
/// - `Fresh` when `ttl_seconds` is `None`, or `now - generated_at < ttl`.
/// - `Stale` when `now - generated_at >= ttl`.
///
/// A `now` earlier than `generated_at` yields a negative age and therefore
/// `Fresh`.
pub fn classify(artifact: Option<&Artifact>, now: Timestamp) -> Freshness {
    let Some(artifact) = artifact else {
        return Freshness::Missing;
    };
    let Some(ttl_seconds) = artifact.ttl_seconds else {
        return Freshness::Fresh;
    };

    // Whole milliseconds: truncation cannot cross an integer-second TTL.
    let age_ms = i128::from(artifact.age(now).num_milliseconds());
    if age_ms < i128::from(ttl_seconds) * 1000 {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

/// The revalidation policy as a value, for callers that want to hold one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevalidationPolicy;

impl RevalidationPolicy {
    /// See [`classify`].
    pub fn classify(&self, artifact: Option<&Artifact>, now: Timestamp) -> Freshness {
        classify(artifact, now)
    }
}

/// Result of a store lookup, carrying its classification.
///
/// Callers get the artifact and the verdict together so they cannot serve
/// one without having looked at the other.
#[derive(Debug, Clone)]
pub struct Lookup {
    artifact: Option<Arc<Artifact>>,
    freshness: Freshness,
}

impl Lookup {
    pub fn classify(artifact: Option<Arc<Artifact>>, now: Timestamp) -> Self {
        let freshness = classify(artifact.as_deref(), now);
        Self {
            artifact,
            freshness,
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn artifact(&self) -> Option<&Arc<Artifact>> {
        self.artifact.as_ref()
    }

    /// Consume the lookup and return the artifact, if any.
    pub fn into_artifact(self) -> Option<Arc<Artifact>> {
        self.artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn t(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn artifact_at(secs: i64, ttl_seconds: Option<u64>) -> Artifact {
        Artifact::new(b"v1".to_vec(), json!({"title": "v1"}), t(secs), ttl_seconds)
    }

    #[test]
    fn test_missing_without_artifact() {
        assert_eq!(classify(None, t(0)), Freshness::Missing);
    }

    #[test]
    fn test_fresh_within_ttl() {
        let artifact = artifact_at(0, Some(10));
        assert_eq!(classify(Some(&artifact), t(0)), Freshness::Fresh);
        assert_eq!(classify(Some(&artifact), t(5)), Freshness::Fresh);
        assert_eq!(
            classify(Some(&artifact), t(10) - Duration::milliseconds(1)),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_stale_at_and_after_ttl() {
        let artifact = artifact_at(0, Some(10));
        assert_eq!(classify(Some(&artifact), t(10)), Freshness::Stale);
        assert_eq!(classify(Some(&artifact), t(15)), Freshness::Stale);
    }

    #[test]
    fn test_no_ttl_is_always_fresh() {
        let artifact = artifact_at(0, None);
        assert_eq!(classify(Some(&artifact), t(0)), Freshness::Fresh);
        assert_eq!(classify(Some(&artifact), t(100_000_000)), Freshness::Fresh);
    }

    #[test]
    fn test_clock_skew_is_fresh() {
        let artifact = artifact_at(10, Some(1));
        assert_eq!(classify(Some(&artifact), t(0)), Freshness::Fresh);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let artifact = artifact_at(0, Some(u64::MAX));
        assert_eq!(classify(Some(&artifact), t(1_000_000)), Freshness::Fresh);
    }

    #[test]
    fn test_retained_artifact_is_still_classified_by_age() {
        let artifact = artifact_at(0, Some(10)).with_source_error("timeout");
        assert_eq!(classify(Some(&artifact), t(12)), Freshness::Stale);
    }

    #[test]
    fn test_policy_matches_free_function() {
        let artifact = artifact_at(0, Some(10));
        for secs in [0, 9, 10, 11] {
            assert_eq!(
                RevalidationPolicy.classify(Some(&artifact), t(secs)),
                classify(Some(&artifact), t(secs))
            );
        }
    }

    #[test]
    fn test_lookup_carries_artifact_and_verdict() {
        let lookup = Lookup::classify(Some(Arc::new(artifact_at(0, Some(10)))), t(15));
        assert_eq!(lookup.freshness(), Freshness::Stale);
        assert!(lookup.freshness().is_servable());
        assert!(lookup.freshness().needs_build());
        assert!(lookup.artifact().is_some());

        let missing = Lookup::classify(None, t(15));
        assert_eq!(missing.freshness(), Freshness::Missing);
        assert!(!missing.freshness().is_servable());
        assert!(missing.into_artifact().is_none());
    }
}
