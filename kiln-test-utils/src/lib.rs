//! KILN Test Utilities
//!
//! Centralized test infrastructure for the KILN workspace:
//! - A scripted data source with call counters, failure switches and a gate
//! - Proptest generators for routes, parameter sets and artifacts
//! - Fixtures for the meetup pages

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

// Re-export core types for convenience
pub use kiln_core::{
    Artifact, CacheKey, DataError, FallbackMode, KilnConfig, ParamSet, Route, RouteId, SlugCodec,
    Timestamp,
};
pub use kiln_storage::{DataSource, InMemoryArtifactStore, RawRecord};

// ============================================================================
// SCRIPTED DATA SOURCE
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fields_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(fields) => fields,
        other => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), other);
            fields
        }
    }
}

/// Data source keyed by slugs, scripted by the test.
///
/// Known ids and records are kept apart, so a test can make a record
/// fetchable without it being enumerated. Every call is counted before it
/// waits on the gate or the delay.
#[derive(Debug)]
pub struct ScriptedDataSource {
    known: Mutex<HashMap<RouteId, Vec<String>>>,
    records: Mutex<HashMap<RouteId, BTreeMap<String, Map<String, Value>>>>,
    available: AtomicBool,
    fetch_failure: Mutex<Option<DataError>>,
    fetch_delay: Mutex<Option<Duration>>,
    gate: watch::Sender<bool>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    fetches_by_id: Mutex<HashMap<String, usize>>,
}

impl Default for ScriptedDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDataSource {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            known: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            fetch_failure: Mutex::new(None),
            fetch_delay: Mutex::new(None),
            gate,
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            fetches_by_id: Mutex::new(HashMap::new()),
        }
    }

    /// Make `id` part of the next `list_known_ids` for `route`. Duplicates are kept.
    pub fn push_known_id(&self, route: &RouteId, id: &str) {
        lock(&self.known)
            .entry(route.clone())
            .or_default()
            .push(id.to_string());
    }

    /// Store (or replace) the record `fetch_by_id` and `list_records` return.
    pub fn put_record(&self, route: &RouteId, id: &str, fields: Value) {
        lock(&self.records)
            .entry(route.clone())
            .or_default()
            .insert(id.to_string(), fields_of(fields));
    }

    pub fn remove_record(&self, route: &RouteId, id: &str) {
        if let Some(records) = lock(&self.records).get_mut(route) {
            records.remove(id);
        }
    }

    /// When false, every call fails with `DataError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make record fetches fail with `error` (or succeed again with `None`).
    /// Listing known ids is unaffected.
    pub fn fail_fetches(&self, error: Option<DataError>) {
        *lock(&self.fetch_failure) = error;
    }

    /// Sleep this long inside every record fetch.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *lock(&self.fetch_delay) = delay;
    }

    /// Hold every record fetch until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Record fetches of any kind, `list_records` included.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// `fetch_by_id` calls for one id.
    pub fn fetch_calls_for(&self, id: &str) -> usize {
        lock(&self.fetches_by_id).get(id).copied().unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), DataError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DataError::Unavailable {
                reason: "scripted outage".to_string(),
            })
        }
    }

    async fn before_fetch(&self) -> Result<(), DataError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`, so this only returns once open.
        let _ = gate.wait_for(|open| *open).await;

        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.check_available()?;
        match lock(&self.fetch_failure).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataSource for ScriptedDataSource {
    type Codec = SlugCodec;

    async fn list_known_ids(&self, route: &RouteId) -> Result<Vec<String>, DataError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(lock(&self.known).get(route).cloned().unwrap_or_default())
    }

    async fn fetch_by_id(&self, route: &RouteId, id: &String) -> Result<RawRecord, DataError> {
        *lock(&self.fetches_by_id).entry(id.clone()).or_default() += 1;
        self.before_fetch().await?;
        lock(&self.records)
            .get(route)
            .and_then(|records| records.get(id))
            .map(|fields| RawRecord::new(id.clone(), fields.clone()))
            .ok_or_else(|| DataError::NotFound {
                route: route.clone(),
                id: id.clone(),
            })
    }

    async fn list_records(&self, route: &RouteId) -> Result<Vec<RawRecord>, DataError> {
        self.before_fetch().await?;
        Ok(lock(&self.records)
            .get(route)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, fields)| RawRecord::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for KILN types.

    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;

    /// Generate a route identifier.
    pub fn arb_route_id() -> impl Strategy<Value = RouteId> {
        "[a-z][a-z0-9-]{0,15}".prop_map(RouteId::new)
    }

    /// Generate an identifier `SlugCodec` accepts.
    pub fn arb_slug() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{1,24}"
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
        })
    }

    /// Generate a TTL, `None` a quarter of the time.
    pub fn arb_ttl() -> impl Strategy<Value = Option<u64>> {
        prop_oneof![
            1 => Just(None),
            3 => (1u64..86_400).prop_map(Some),
        ]
    }

    pub fn arb_fallback_mode() -> impl Strategy<Value = FallbackMode> {
        prop_oneof![
            Just(FallbackMode::Disabled),
            Just(FallbackMode::Blocking),
            Just(FallbackMode::NonBlocking),
        ]
    }

    /// Generate a valid route: a collection or a single-slot record route.
    pub fn arb_route() -> impl Strategy<Value = Route> {
        (
            arb_route_id(),
            proptest::option::of("[a-z][a-zA-Z]{0,11}"),
            arb_ttl(),
            arb_fallback_mode(),
        )
            .prop_map(|(id, slot, ttl, fallback)| {
                let route = match slot {
                    Some(slot) => Route::record(id.as_str(), slot),
                    None => Route::collection(id.as_str()),
                };
                let route = route.with_fallback(fallback);
                match ttl {
                    Some(ttl) => route.with_ttl(ttl),
                    None => route,
                }
            })
    }

    /// Generate a parameter set that `route` accepts.
    pub fn arb_params_for(route: &Route) -> BoxedStrategy<ParamSet> {
        match route.key_slot() {
            Some(slot) => {
                let slot = slot.to_string();
                arb_slug()
                    .prop_map(move |id| ParamSet::single(slot.clone(), id))
                    .boxed()
            }
            None => Just(ParamSet::empty()).boxed(),
        }
    }

    /// Generate an artifact with a small JSON payload.
    pub fn arb_artifact() -> impl Strategy<Value = Artifact> {
        ("[ -~]{0,64}", arb_timestamp(), arb_ttl()).prop_map(|(title, generated_at, ttl)| {
            let props = serde_json::json!({ "title": title });
            let payload = props.to_string().into_bytes();
            Artifact::new(payload, props, generated_at, ttl)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for the meetup pages.

    use super::*;
    use chrono::{DateTime, Utc};

    /// Epoch second every fixture clock is relative to.
    pub const T0: i64 = 1_700_000_000;

    /// `T0 + secs`.
    pub fn at(secs: i64) -> Timestamp {
        DateTime::from_timestamp(T0 + secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn meetup_route_id() -> RouteId {
        RouteId::new("meetup")
    }

    pub fn meetups_route_id() -> RouteId {
        RouteId::new("meetups")
    }

    /// The per-meetup page with the given fallback and a 10 s TTL.
    pub fn meetup_route(fallback: FallbackMode) -> Route {
        Route::record("meetup", "meetupId")
            .with_ttl(10)
            .with_fallback(fallback)
    }

    /// The meetup list page with a 10 s TTL.
    pub fn meetups_route() -> Route {
        Route::collection("meetups").with_ttl(10)
    }

    /// Parameters for one meetup page.
    pub fn meetup_params(id: &str) -> ParamSet {
        ParamSet::single("meetupId", id)
    }

    pub fn meetup_fields(title: &str) -> Value {
        serde_json::json!({
            "title": title,
            "image": "https://example.com/meetup.jpg",
            "address": "Some street 5, Some city",
            "description": "A meetup",
        })
    }

    /// A config with both meetup routes and a 5 s build timeout.
    pub fn meetup_config(fallback: FallbackMode) -> KilnConfig {
        let mut config = KilnConfig::new(vec![meetups_route(), meetup_route(fallback)]);
        config.build_timeout_ms = 5_000;
        config
    }

    /// A scripted source where every id is known and titled `v1`, on both
    /// the record and the list route.
    pub fn scripted_meetups(ids: &[&str]) -> ScriptedDataSource {
        let source = ScriptedDataSource::new();
        for id in ids {
            source.push_known_id(&meetup_route_id(), id);
            source.put_record(&meetup_route_id(), id, meetup_fields("v1"));
            source.put_record(&meetups_route_id(), id, meetup_fields("v1"));
        }
        source
    }
}
