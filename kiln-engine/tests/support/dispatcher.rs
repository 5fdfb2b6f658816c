//! Shared dispatcher setup for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use kiln_engine::{JsonRenderer, RequestDispatcher};
use kiln_storage::{ArtifactStore, InMemoryArtifactStore};
use kiln_test_utils::fixtures;
use kiln_test_utils::{CacheKey, FallbackMode, KilnConfig, ScriptedDataSource};

pub type TestDispatcher = RequestDispatcher<ScriptedDataSource>;

/// Dispatcher over the meetup routes, the given source and a fresh in-memory store.
pub fn meetup_dispatcher(
    fallback: FallbackMode,
    source: Arc<ScriptedDataSource>,
) -> Arc<TestDispatcher> {
    dispatcher_with(fixtures::meetup_config(fallback), source)
}

pub fn dispatcher_with(config: KilnConfig, source: Arc<ScriptedDataSource>) -> Arc<TestDispatcher> {
    let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());
    Arc::new(RequestDispatcher::new(
        &config,
        source,
        store,
        Arc::new(JsonRenderer),
    ))
}

/// Cache key of one meetup page.
pub fn meetup_key(id: &str) -> CacheKey {
    fixtures::meetup_route(FallbackMode::Blocking).key(&fixtures::meetup_params(id))
}

/// Title the served artifact was rendered with.
pub fn title_of(response: &kiln_engine::Response) -> Option<String> {
    response
        .artifact()
        .and_then(|artifact| artifact.props.get("title"))
        .and_then(|title| title.as_str())
        .map(str::to_string)
}

/// Yield until `key` has at least `count` callers blocked on its build.
pub async fn wait_for_waiters(dispatcher: &TestDispatcher, key: &CacheKey, count: usize) {
    while dispatcher.coordinator().waiters(key) < count {
        tokio::task::yield_now().await;
    }
}

/// Yield until no build for `key` is in flight.
///
/// The coordinator writes the store before it retires a job, so once this
/// returns the outcome of the last build is visible through the store.
pub async fn wait_until_idle(dispatcher: &TestDispatcher, key: &CacheKey) {
    while dispatcher.coordinator().is_building(key) {
        tokio::task::yield_now().await;
    }
}

/// The stored artifact for `key`, which must exist.
pub async fn stored(dispatcher: &TestDispatcher, key: &CacheKey) -> Arc<kiln_core::Artifact> {
    dispatcher
        .store()
        .get(key)
        .await
        .expect("store read should succeed")
        .expect("artifact should be stored")
}
