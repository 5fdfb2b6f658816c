//! Single-flight build coordination.
//!
//! At most one build runs per [`CacheKey`] at any instant. The first caller
//! for a key spawns the build as its own task and every caller that arrives
//! while it runs subscribes to the same `watch` channel, so all of them
//! observe the one outcome. Because the build is a spawned task, a waiter
//! that goes away (a disconnected client) never cancels it.
//!
//! A successful artifact is written to the store before any waiter is
//! released. A failed build leaves the stored artifact in place and only
//! annotates its `source_error`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kiln_core::{Artifact, BuildError, CacheKey};
use kiln_storage::ArtifactStore;
use tokio::sync::watch;

use crate::stats::{BuildStats, BuildStatsSnapshot};

/// What every waiter of a build receives.
pub type BuildOutcome = Result<Arc<Artifact>, BuildError>;

type JobSlot = watch::Sender<Option<BuildOutcome>>;
type JobWatch = watch::Receiver<Option<BuildOutcome>>;

/// How a call attached to the build for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// This call started the build; its builder is running.
    Started,
    /// A build was already in flight; the builder passed in was dropped unused.
    Joined,
}

/// Removes the job entry if the build task ends without reporting, which
/// closes the channel and hands every waiter [`BuildError::Aborted`].
struct JobGuard {
    jobs: Arc<DashMap<CacheKey, JobSlot>>,
    key: CacheKey,
    armed: bool,
}

impl JobGuard {
    fn complete(mut self, outcome: BuildOutcome) {
        self.armed = false;
        if let Some((_, slot)) = self.jobs.remove(&self.key) {
            slot.send_replace(Some(outcome));
        }
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.armed {
            self.jobs.remove(&self.key);
            tracing::error!(key = %self.key, "Build task ended without reporting a result");
        }
    }
}

/// Per-key single-flight build coordinator.
///
/// Cheap to clone; clones share the in-flight registry, store and counters.
#[derive(Clone)]
pub struct BuildCoordinator {
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<DashMap<CacheKey, JobSlot>>,
    timeout: Duration,
    stats: Arc<BuildStats>,
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCoordinator")
            .field("in_flight", &self.jobs.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BuildCoordinator {
    /// Coordinator writing into `store`, bounding each build by `timeout`.
    pub fn new(store: Arc<dyn ArtifactStore>, timeout: Duration) -> Self {
        Self {
            store,
            jobs: Arc::new(DashMap::new()),
            timeout,
            stats: Arc::new(BuildStats::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return the artifact for `key`, joining the in-flight build or starting one.
    ///
    /// `builder` runs only if no build for `key` is in flight, and then
    /// exactly once. Dropping the returned future abandons the wait but not
    /// the build.
    pub async fn get_or_build<F, Fut>(&self, key: &CacheKey, builder: F) -> BuildOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Artifact, BuildError>> + Send + 'static,
    {
        let (watch, _) = self.join_or_start(key, builder);
        Self::wait(key, watch).await
    }

    /// Join-or-start without waiting. Used for background rebuilds.
    pub fn trigger<F, Fut>(&self, key: &CacheKey, builder: F) -> Trigger
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Artifact, BuildError>> + Send + 'static,
    {
        self.join_or_start(key, builder).1
    }

    /// Wait for the build in flight for `key`, if there is one.
    ///
    /// Never starts a build. Returns `None` when nothing is in flight.
    pub async fn settle(&self, key: &CacheKey) -> Option<BuildOutcome> {
        let watch = self.jobs.get(key).map(|slot| slot.subscribe())?;
        Some(Self::wait(key, watch).await)
    }

    /// Number of callers currently blocked on the build for `key`.
    pub fn waiters(&self, key: &CacheKey) -> usize {
        self.jobs
            .get(key)
            .map(|slot| slot.receiver_count())
            .unwrap_or(0)
    }

    /// True while a build for `key` is running.
    pub fn is_building(&self, key: &CacheKey) -> bool {
        self.jobs.contains_key(key)
    }

    /// Number of builds currently running.
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    pub fn stats(&self) -> BuildStatsSnapshot {
        self.stats.snapshot()
    }

    fn join_or_start<F, Fut>(&self, key: &CacheKey, builder: F) -> (JobWatch, Trigger)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Artifact, BuildError>> + Send + 'static,
    {
        // The entry guard holds the shard lock, so two callers can never both
        // find the key vacant.
        let watch = match self.jobs.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let watch = entry.get().subscribe();
                drop(entry);
                self.stats.record_joined();
                tracing::debug!(key = %key, waiters = self.waiters(key), "Joined in-flight build");
                return (watch, Trigger::Joined);
            }
            Entry::Vacant(entry) => {
                let (slot, watch) = watch::channel(None);
                entry.insert(slot);
                watch
            }
        };

        self.stats.record_started();
        tracing::debug!(key = %key, "Build started");

        let guard = JobGuard {
            jobs: Arc::clone(&self.jobs),
            key: key.clone(),
            armed: true,
        };
        tokio::spawn(Self::run(
            guard,
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            self.timeout,
            builder,
        ));

        (watch, Trigger::Started)
    }

    async fn run<F, Fut>(
        guard: JobGuard,
        store: Arc<dyn ArtifactStore>,
        stats: Arc<BuildStats>,
        timeout: Duration,
        builder: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Artifact, BuildError>> + Send + 'static,
    {
        let key = guard.key.clone();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(timeout, builder()).await {
            Ok(Ok(artifact)) => match store.put(&key, artifact.clone()).await {
                Ok(()) => Ok(Arc::new(artifact)),
                Err(e) => Err(BuildError::Store {
                    reason: e.to_string(),
                }),
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BuildError::Timeout { after: timeout }),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(artifact) => {
                stats.record_succeeded();
                tracing::info!(
                    key = %key,
                    elapsed_ms,
                    etag = %artifact.etag(),
                    "Build succeeded"
                );
            }
            Err(err) => {
                stats.record_failed(matches!(err, BuildError::Timeout { .. }));
                let retained = match store.record_failure(&key, &err.to_string()).await {
                    Ok(retained) => retained,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to annotate retained artifact");
                        false
                    }
                };
                tracing::warn!(
                    key = %key,
                    elapsed_ms,
                    error = %err,
                    kind = err.kind(),
                    retained,
                    "Build failed"
                );
            }
        }

        guard.complete(outcome);
    }

    async fn wait(key: &CacheKey, mut watch: JobWatch) -> BuildOutcome {
        let outcome = match watch.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(BuildError::Aborted { key: key.clone() }))
    }
}
