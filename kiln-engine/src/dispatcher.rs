//! Request dispatch and build passes.
//!
//! The dispatcher owns the routing table and the per-route set of keys the
//! last successful enumeration produced. Each request is classified against
//! the store, run through the route's [`FallbackPolicy`], and answered with a
//! [`Response`]. All builds go through the shared [`BuildCoordinator`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use kiln_core::{
    Artifact, BuildError, CacheKey, IdCodec, KilnConfig, ParamSet, Route, RouteId, Timestamp,
};
use kiln_storage::{ArtifactStore, DataSource, Lookup};

use crate::builder::{PageBuilder, Renderer};
use crate::coordinator::{BuildCoordinator, BuildOutcome};
use crate::enumerate::ParamEnumerator;
use crate::fallback::{Action, FallbackPolicy};
use crate::report::{BuildReport, BuiltEntry, KeyFailure, RouteOutcome, RouteReport};
use crate::response::{RequestError, Response};

type KnownKeys = Arc<HashSet<CacheKey>>;

/// Orchestrates enumeration, lookups, fallback and builds for every route.
pub struct RequestDispatcher<D: DataSource> {
    routes: Vec<Route>,
    index: HashMap<RouteId, usize>,
    store: Arc<dyn ArtifactStore>,
    coordinator: BuildCoordinator,
    builder: PageBuilder<D>,
    enumerator: ParamEnumerator<D>,
    known: RwLock<HashMap<RouteId, KnownKeys>>,
    build_concurrency: usize,
}

impl<D: DataSource> RequestDispatcher<D> {
    pub fn new(
        config: &KilnConfig,
        source: Arc<D>,
        store: Arc<dyn ArtifactStore>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let index = config
            .routes
            .iter()
            .enumerate()
            .map(|(i, route)| (route.id.clone(), i))
            .collect();
        Self {
            routes: config.routes.clone(),
            index,
            coordinator: BuildCoordinator::new(Arc::clone(&store), config.build_timeout()),
            store,
            builder: PageBuilder::new(Arc::clone(&source), renderer),
            enumerator: ParamEnumerator::new(source),
            known: RwLock::new(HashMap::new()),
            build_concurrency: config.build_concurrency.max(1),
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn route(&self, id: &RouteId) -> Option<&Route> {
        self.index.get(id).map(|&i| &self.routes[i])
    }

    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Keys produced by the last successful enumeration of `route`.
    pub fn known_keys(&self, route: &RouteId) -> KnownKeys {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
            .cloned()
            .unwrap_or_default()
    }

    /// Answer one request.
    pub async fn handle(&self, route_id: &RouteId, params: ParamSet, now: Timestamp) -> Response {
        let (route, params) = match self.resolve(route_id, params) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::debug!(route = %route_id, error = %err, "Rejected request");
                return Response::Error(err);
            }
        };
        let key = route.key(&params);

        let lookup = match self.store.get(&key).await {
            Ok(artifact) => Lookup::classify(artifact, now),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Store lookup failed");
                return Response::Error(RequestError::Store {
                    reason: e.to_string(),
                });
            }
        };

        let known = self.known_keys(&route.id).contains(&key);
        let action = FallbackPolicy::from(route.fallback).decide(lookup.freshness(), known);
        tracing::debug!(
            key = %key,
            freshness = ?lookup.freshness(),
            known,
            action = ?action,
            "Dispatching request"
        );

        match action {
            Action::Serve => Self::serve(lookup),
            Action::ServeStaleAndRebuild => {
                let trigger = self
                    .coordinator
                    .trigger(&key, self.build_job(route, params, now));
                tracing::debug!(key = %key, trigger = ?trigger, "Serving stale artifact");
                Self::serve(lookup)
            }
            Action::PendingAndBuild => {
                self.coordinator
                    .trigger(&key, self.build_job(route, params, now));
                Response::Pending
            }
            Action::BuildBlocking => {
                let outcome = self
                    .coordinator
                    .get_or_build(&key, self.build_job(route, params, now))
                    .await;
                Self::respond(outcome)
            }
            Action::NotFound => Response::NotFound,
        }
    }

    /// Rebuild one page now, joining a build already in flight.
    pub async fn revalidate(
        &self,
        route_id: &RouteId,
        params: ParamSet,
        now: Timestamp,
    ) -> Result<BuildOutcome, RequestError> {
        let (route, params) = self.resolve(route_id, params)?;
        let key = route.key(&params);
        tracing::info!(key = %key, "On-demand revalidation");
        Ok(self
            .coordinator
            .get_or_build(&key, self.build_job(route, params, now))
            .await)
    }

    /// Drop one page from the store. Returns whether it was stored.
    pub async fn invalidate(&self, route_id: &RouteId, params: ParamSet) -> Result<bool, RequestError> {
        let (route, params) = self.resolve(route_id, params)?;
        let key = route.key(&params);
        self.store.invalidate(&key).await.map_err(|e| RequestError::Store {
            reason: e.to_string(),
        })
    }

    /// Drop every stored page of a route.
    pub async fn invalidate_route(&self, route_id: &RouteId) -> Result<u64, RequestError> {
        if self.route(route_id).is_none() {
            return Err(RequestError::UnknownRoute {
                route: route_id.clone(),
            });
        }
        self.store
            .invalidate_route(route_id)
            .await
            .map_err(|e| RequestError::Store {
                reason: e.to_string(),
            })
    }

    /// Enumerate and build every route.
    ///
    /// Routes run one after another; the keys of a route build concurrently,
    /// at most `build_concurrency` at a time. A route whose enumeration fails
    /// keeps its previous known set and builds nothing. Failures of single
    /// keys are reported and do not stop the pass.
    pub async fn build_all(&self, now: Timestamp) -> BuildReport {
        let mut report = BuildReport::new(now, self.builder.file_extension());
        for route in &self.routes {
            report.routes.push(self.build_route(route, now).await);
        }
        tracing::info!(
            routes = report.routes.len(),
            built = report.built_count(),
            failed = report.failure_count(),
            enumeration_failures = report.enumeration_failures().count(),
            "Build pass finished"
        );
        report
    }

    async fn build_route(&self, route: &Route, now: Timestamp) -> RouteReport {
        let param_sets = match self.enumerator.enumerate(route).await {
            Ok(param_sets) => param_sets,
            Err(error) => {
                tracing::error!(route = %route.id, error = %error, "Enumeration failed");
                return RouteReport {
                    route: route.id.clone(),
                    outcome: RouteOutcome::EnumerationFailed { error },
                };
            }
        };

        let keys: HashSet<CacheKey> = param_sets.iter().map(|params| route.key(params)).collect();
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(route.id.clone(), Arc::new(keys));

        let enumerated = param_sets.len();
        let results: Vec<(ParamSet, CacheKey, BuildOutcome)> = stream::iter(param_sets)
            .map(|params| {
                let key = route.key(&params);
                let job = self.build_job(route, params.clone(), now);
                async move {
                    let outcome = self.coordinator.get_or_build(&key, job).await;
                    (params, key, outcome)
                }
            })
            .buffer_unordered(self.build_concurrency)
            .collect()
            .await;

        let mut built = Vec::new();
        let mut failures = Vec::new();
        for (params, key, outcome) in results {
            match outcome {
                Ok(artifact) => built.push(BuiltEntry {
                    params,
                    key,
                    artifact,
                }),
                Err(error) => failures.push(KeyFailure { params, key, error }),
            }
        }
        built.sort_by(|a, b| a.key.cmp(&b.key));
        failures.sort_by(|a, b| a.key.cmp(&b.key));

        tracing::info!(
            route = %route.id,
            enumerated,
            built = built.len(),
            failed = failures.len(),
            "Route built"
        );

        RouteReport {
            route: route.id.clone(),
            outcome: RouteOutcome::Built {
                enumerated,
                built,
                failures,
            },
        }
    }

    /// Look up the route, check the parameter names and canonicalize the id.
    fn resolve(&self, route_id: &RouteId, params: ParamSet) -> Result<(&Route, ParamSet), RequestError> {
        let route = self.route(route_id).ok_or_else(|| RequestError::UnknownRoute {
            route: route_id.clone(),
        })?;
        if !route.accepts(&params) {
            return Err(RequestError::InvalidParams {
                route: route.id.clone(),
                expected: route.slots.clone(),
                got: params.iter().map(|(name, _)| name.to_string()).collect(),
            });
        }
        let params = match route.key_slot() {
            None => params,
            Some(slot) => {
                let raw = params.get(slot).unwrap_or_default();
                ParamSet::single(slot, <D::Codec as IdCodec>::canonicalize(raw)?)
            }
        };
        Ok((route, params))
    }

    fn build_job(
        &self,
        route: &Route,
        params: ParamSet,
        now: Timestamp,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Artifact, BuildError>> + Send + 'static {
        let builder = self.builder.clone();
        let route = route.clone();
        move || async move { builder.build(&route, &params, now).await }.boxed()
    }

    fn serve(lookup: Lookup) -> Response {
        match lookup.into_artifact() {
            Some(artifact) => Response::Served(artifact),
            None => Response::NotFound,
        }
    }

    fn respond(outcome: BuildOutcome) -> Response {
        match outcome {
            Ok(artifact) => Response::Served(artifact),
            Err(BuildError::NotFound { .. }) => Response::NotFound,
            Err(err) => Response::Error(RequestError::Build(err)),
        }
    }
}
