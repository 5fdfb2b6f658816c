//! Build passes, manifests and on-demand revalidation.

use std::sync::Arc;

use kiln_core::{BuildError, DataError, FallbackMode, KilnConfig, ParamSet, Route, RouteId};
use kiln_engine::{
    run_build_pass, BuildManifest, EngineSettings, JsonRenderer, Renderer, RequestDispatcher,
    RequestError, RouteOutcome,
};
use kiln_storage::{ArtifactStore, InMemoryArtifactStore, LmdbArtifactStore};
use kiln_test_utils::fixtures::{self, at};
use kiln_test_utils::{generators, ScriptedDataSource};
use proptest::prelude::*;
use tempfile::TempDir;
use tokio::runtime::Runtime;

#[path = "support/dispatcher.rs"]
mod test_dispatcher_support;
use test_dispatcher_support::{dispatcher_with, meetup_dispatcher, meetup_key, title_of};

#[tokio::test]
async fn test_build_all_builds_every_known_page() {
    let source = Arc::new(fixtures::scripted_meetups(&["m2", "m1", "m1"]));
    let dispatcher = meetup_dispatcher(FallbackMode::Disabled, Arc::clone(&source));

    let report = dispatcher.build_all(at(0)).await;
    assert!(report.is_clean());
    assert_eq!(report.routes.len(), 2);
    // One list page plus m1 and m2.
    assert_eq!(report.built_count(), 3);

    let meetup = report
        .route(&fixtures::meetup_route_id())
        .expect("meetup route reported");
    let keys: Vec<_> = meetup.built().iter().map(|entry| entry.key.clone()).collect();
    assert_eq!(keys, vec![meetup_key("m1"), meetup_key("m2")]);
    assert!(matches!(
        meetup.outcome,
        RouteOutcome::Built { enumerated: 2, .. }
    ));

    let list = dispatcher
        .handle(&fixtures::meetups_route_id(), kiln_core::ParamSet::empty(), at(1))
        .await;
    let records = list
        .artifact()
        .and_then(|a| a.props.get("records").and_then(|r| r.as_array()).cloned())
        .expect("list page served");
    assert_eq!(records.len(), 2);

    let stats = dispatcher.store().stats().await.expect("stats");
    assert_eq!(stats.entry_count, 3);
}

#[tokio::test]
async fn test_key_failures_do_not_stop_the_pass() {
    let source = Arc::new(fixtures::scripted_meetups(&["m1"]));
    // Known but with no record behind it.
    source.push_known_id(&fixtures::meetup_route_id(), "ghost");
    let dispatcher = meetup_dispatcher(FallbackMode::Disabled, Arc::clone(&source));

    let report = dispatcher.build_all(at(0)).await;
    assert!(!report.is_clean());
    assert_eq!(report.built_count(), 2);
    assert_eq!(report.failure_count(), 1);

    let failure = &report
        .route(&fixtures::meetup_route_id())
        .expect("meetup route reported")
        .failures()[0];
    assert_eq!(failure.key, meetup_key("ghost"));
    assert_eq!(failure.error.kind(), "not_found");
}

#[tokio::test]
async fn test_enumeration_failure_keeps_previous_known_set() {
    let source = Arc::new(fixtures::scripted_meetups(&["m1", "m2"]));
    let dispatcher = meetup_dispatcher(FallbackMode::Disabled, Arc::clone(&source));
    dispatcher.build_all(at(0)).await;
    assert_eq!(dispatcher.known_keys(&fixtures::meetup_route_id()).len(), 2);

    source.set_available(false);
    let report = dispatcher.build_all(at(20)).await;

    let failed: Vec<_> = report.enumeration_failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].route, fixtures::meetup_route_id());
    assert_eq!(dispatcher.known_keys(&fixtures::meetup_route_id()).len(), 2);

    // The list page enumerates without the source but fails to fetch.
    let list = report
        .route(&fixtures::meetups_route_id())
        .expect("list route reported");
    assert_eq!(list.failures().len(), 1);

    // Old pages keep being served.
    let response = dispatcher
        .handle(&fixtures::meetup_route_id(), fixtures::meetup_params("m1"), at(21))
        .await;
    assert_eq!(title_of(&response).as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_manifest_written_and_read_back() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let source = Arc::new(fixtures::scripted_meetups(&["m1", "m2"]));
    let dispatcher = meetup_dispatcher(FallbackMode::Disabled, source);

    let report = dispatcher.build_all(at(0)).await;
    let manifest = report.manifest();
    assert_eq!(manifest.entry_count(), 3);

    let path = manifest.write_to_dir(dir.path()).expect("manifest written");
    assert!(path.exists());

    let read = BuildManifest::read_from_dir(dir.path()).expect("manifest read");
    assert_eq!(read.entry_count(), 3);
    let entries = &read.routes[&fixtures::meetup_route_id()];
    for entry in entries {
        let payload = std::fs::read(dir.path().join(&entry.payload_file)).expect("payload file");
        assert_eq!(hex::encode(kiln_core::compute_content_hash(&payload)), entry.content_hash);
    }
}

struct TitleRenderer;

impl Renderer for TitleRenderer {
    fn render(&self, _route: &Route, props: &serde_json::Value) -> Result<Vec<u8>, BuildError> {
        let title = props.get("title").and_then(|t| t.as_str()).unwrap_or("untitled");
        Ok(format!("<h1>{}</h1>", title).into_bytes())
    }
}

#[tokio::test]
async fn test_manifest_payload_files_follow_renderer() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());
    let source = Arc::new(fixtures::scripted_meetups(&["m1"]));
    let dispatcher = RequestDispatcher::new(
        &fixtures::meetup_config(FallbackMode::Disabled),
        source,
        store,
        Arc::new(TitleRenderer),
    );

    let manifest = dispatcher.build_all(at(0)).await.manifest();
    manifest.write_to_dir(dir.path()).expect("manifest written");

    let entry = &manifest.routes[&fixtures::meetup_route_id()][0];
    assert!(entry.payload_file.ends_with(".bin"));
    let payload = std::fs::read(dir.path().join(&entry.payload_file)).expect("payload file");
    assert_eq!(payload, b"<h1>v1</h1>");
}

const SEED: &str = r#"{
    "meetups": [
        { "_id": "6123abcd0102030405000001", "title": "First Meetup", "address": "Some street 5" },
        { "_id": "6123abcd0102030405000002", "title": "Second Meetup", "address": "Some street 10" }
    ]
}"#;

#[tokio::test]
async fn test_run_build_pass_from_seed() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let seed = dir.path().join("seed.json");
    std::fs::write(&seed, SEED).expect("write seed");

    let settings = EngineSettings {
        seed_path: Some(seed),
        out_dir: dir.path().join("out"),
        store_dir: Some(dir.path().join("store")),
        store_size_mb: 16,
        ..Default::default()
    };
    assert!(run_build_pass(&settings).await.expect("pass should run"));

    let manifest = BuildManifest::read_from_dir(&settings.out_dir).expect("manifest read");
    assert_eq!(manifest.entry_count(), 3);
    let ids: Vec<_> = manifest.routes[&fixtures::meetup_route_id()]
        .iter()
        .filter_map(|entry| entry.params.get("meetupId").map(str::to_string))
        .collect();
    assert_eq!(
        ids,
        vec!["6123abcd0102030405000001", "6123abcd0102030405000002"]
    );
}

#[tokio::test]
async fn test_run_build_pass_rejects_missing_seed() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let settings = EngineSettings {
        seed_path: Some(dir.path().join("absent.json")),
        out_dir: dir.path().join("out"),
        ..Default::default()
    };
    assert!(run_build_pass(&settings).await.is_err());
    assert!(!settings.out_dir.exists());
}

#[tokio::test]
async fn test_revalidate_and_invalidate() {
    let source = Arc::new(fixtures::scripted_meetups(&["m1"]));
    let dispatcher = meetup_dispatcher(FallbackMode::Disabled, Arc::clone(&source));
    dispatcher.build_all(at(0)).await;

    source.put_record(&fixtures::meetup_route_id(), "m1", fixtures::meetup_fields("v2"));
    let outcome = dispatcher
        .revalidate(&fixtures::meetup_route_id(), fixtures::meetup_params("m1"), at(3))
        .await
        .expect("request resolves");
    assert_eq!(outcome.expect("rebuild succeeds").generated_at, at(3));

    let response = dispatcher
        .handle(&fixtures::meetup_route_id(), fixtures::meetup_params("m1"), at(4))
        .await;
    assert_eq!(title_of(&response).as_deref(), Some("v2"));

    let removed = dispatcher
        .invalidate_route(&fixtures::meetup_route_id())
        .await
        .expect("invalidate route");
    assert_eq!(removed, 1);
    assert!(!dispatcher
        .invalidate(&fixtures::meetup_route_id(), fixtures::meetup_params("m1"))
        .await
        .expect("invalidate"));

    assert!(matches!(
        dispatcher.invalidate_route(&RouteId::new("talks")).await,
        Err(RequestError::UnknownRoute { .. })
    ));
}

#[tokio::test]
async fn test_revalidate_failure_is_reported() {
    let source = Arc::new(fixtures::scripted_meetups(&["m1"]));
    let dispatcher = meetup_dispatcher(FallbackMode::Disabled, Arc::clone(&source));
    dispatcher.build_all(at(0)).await;

    source.fail_fetches(Some(DataError::Unavailable {
        reason: "maintenance".to_string(),
    }));
    let outcome = dispatcher
        .revalidate(&fixtures::meetup_route_id(), fixtures::meetup_params("m1"), at(3))
        .await
        .expect("request resolves");
    assert!(outcome.is_err());

    let response = dispatcher
        .handle(&fixtures::meetup_route_id(), fixtures::meetup_params("m1"), at(4))
        .await;
    let artifact = response.artifact().expect("previous page still served");
    assert_eq!(artifact.generated_at, at(0));
    assert!(artifact.source_error.is_some());
}

#[tokio::test]
async fn test_lmdb_backed_dispatcher() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let store: Arc<dyn ArtifactStore> =
        Arc::new(LmdbArtifactStore::open(dir.path(), 16).expect("LMDB store should open"));
    let source = Arc::new(fixtures::scripted_meetups(&["m1", "m2"]));
    let dispatcher = RequestDispatcher::new(
        &fixtures::meetup_config(FallbackMode::Blocking),
        Arc::clone(&source),
        store,
        Arc::new(JsonRenderer),
    );

    assert!(dispatcher.build_all(at(0)).await.is_clean());

    let response = dispatcher
        .handle(&fixtures::meetup_route_id(), fixtures::meetup_params("m2"), at(1))
        .await;
    assert_eq!(title_of(&response).as_deref(), Some("v1"));
    assert_eq!(source.fetch_calls_for("m2"), 1);

    let stats = dispatcher.store().stats().await.expect("stats");
    assert_eq!(stats.entry_count, 3);
    assert!(stats.hits >= 1);
}

#[tokio::test]
async fn test_lmdb_backed_dispatcher_serves_long_keys() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let store: Arc<dyn ArtifactStore> =
        Arc::new(LmdbArtifactStore::open(dir.path(), 16).expect("LMDB store should open"));
    let source = Arc::new(fixtures::scripted_meetups(&["m1"]));
    let long_id = "x".repeat(600);
    source.put_record(&fixtures::meetup_route_id(), &long_id, fixtures::meetup_fields("Long"));
    let dispatcher = RequestDispatcher::new(
        &fixtures::meetup_config(FallbackMode::Blocking),
        Arc::clone(&source),
        store,
        Arc::new(JsonRenderer),
    );

    let first = dispatcher
        .handle(&fixtures::meetup_route_id(), fixtures::meetup_params(&long_id), at(0))
        .await;
    assert_eq!(title_of(&first).as_deref(), Some("Long"));

    let second = dispatcher
        .handle(&fixtures::meetup_route_id(), fixtures::meetup_params(&long_id), at(1))
        .await;
    assert_eq!(second, first);
    assert_eq!(source.fetch_calls_for(&long_id), 1);

    let keys: Vec<_> = dispatcher
        .store()
        .entries(&fixtures::meetup_route_id())
        .await
        .expect("entries")
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec![meetup_key(&long_id)]);
}

// ============================================================================
// PROPERTY: EVERY ENUMERATED PAGE IS SERVABLE AFTER A PASS
// ============================================================================

fn arb_route_with_params() -> impl Strategy<Value = (Route, ParamSet)> {
    generators::arb_route().prop_flat_map(|route| {
        let params = generators::arb_params_for(&route);
        (Just(route), params)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_built_pages_are_served_without_rebuild((route, params) in arb_route_with_params()) {
        let rt = Runtime::new()
            .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))?;
        rt.block_on(async {
            let source = Arc::new(ScriptedDataSource::new());
            let id = route.key_slot().and_then(|slot| params.get(slot)).unwrap_or("only");
            source.push_known_id(&route.id, id);
            source.put_record(&route.id, id, fixtures::meetup_fields("v1"));
            let dispatcher = dispatcher_with(KilnConfig::new(vec![route.clone()]), Arc::clone(&source));

            let report = dispatcher.build_all(at(0)).await;
            prop_assert!(report.is_clean());
            prop_assert_eq!(report.built_count(), 1);
            let fetches = source.fetch_calls();

            let response = dispatcher.handle(&route.id, params.clone(), at(0)).await;
            prop_assert!(response.is_served());
            prop_assert_eq!(source.fetch_calls(), fetches);
            prop_assert!(dispatcher.known_keys(&route.id).contains(&route.key(&params)));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
