//! Routes, parameter sets and the cache keys derived from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a page template, e.g. `meetup` or `meetups`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(String);

impl RouteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What to do with a request whose key was not produced by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Only enumerated keys are servable; everything else is `NotFound`.
    #[default]
    Disabled,
    /// Unknown keys are built synchronously and the request waits.
    Blocking,
    /// Unknown keys get a pending placeholder while a build runs in the background.
    NonBlocking,
}

/// A page template together with its parameter schema and regeneration policy.
///
/// Routes are defined at process start and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    /// Ordered parameter slots. Empty for collection pages, one slot for
    /// record pages keyed by the data source's identifier.
    #[serde(default)]
    pub slots: Vec<String>,
    /// `None` means built once and never considered stale.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub fallback: FallbackMode,
}

impl Route {
    /// A page with no parameters, rendered from the whole collection.
    pub fn collection(id: impl Into<String>) -> Self {
        Self {
            id: RouteId::new(id),
            slots: Vec::new(),
            ttl_seconds: None,
            fallback: FallbackMode::Disabled,
        }
    }

    /// A page keyed by one record identifier.
    pub fn record(id: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            id: RouteId::new(id),
            slots: vec![slot.into()],
            ttl_seconds: None,
            fallback: FallbackMode::Disabled,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.fallback = fallback;
        self
    }

    /// True when the route has no parameter slots.
    pub fn is_collection(&self) -> bool {
        self.slots.is_empty()
    }

    /// The slot carrying the record identifier, if any.
    pub fn key_slot(&self) -> Option<&str> {
        self.slots.first().map(String::as_str)
    }

    /// True when `params` names exactly this route's slots.
    pub fn accepts(&self, params: &ParamSet) -> bool {
        params.len() == self.slots.len() && self.slots.iter().all(|slot| params.get(slot).is_some())
    }

    /// Derive the cache key for one instance of this route.
    pub fn key(&self, params: &ParamSet) -> CacheKey {
        CacheKey::new(&self.id, params)
    }
}

/// Concrete parameter values for one instance of a route.
///
/// Backed by a `BTreeMap` so iteration (and therefore key derivation) is
/// independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, String>);

impl ParamSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut params = Self::empty();
        params.insert(name, value);
        params
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Canonical serialization of `(route, params)`.
///
/// The encoding is the compact JSON array `["<route>",{"<name>":"<value>",...}]`
/// with parameter names in sorted order, so equal parameter sets always
/// produce byte-identical keys, and every key of a route shares the prefix
/// returned by [`CacheKey::route_prefix`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(route: &RouteId, params: &ParamSet) -> Self {
        let pairs: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}:{}", json_string(name), json_string(value)))
            .collect();
        Self(format!(
            "{}{{{}}}]",
            Self::route_prefix(route),
            pairs.join(",")
        ))
    }

    /// Prefix shared by every key of `route`.
    pub fn route_prefix(route: &RouteId) -> String {
        format!("[{},", json_string(route.as_str()))
    }

    /// Recover the route and parameters a key was derived from.
    pub fn parse(raw: &str) -> Option<(RouteId, ParamSet)> {
        let (route, params): (String, BTreeMap<String, String>) = serde_json::from_str(raw).ok()?;
        let route = RouteId::new(route);
        let params = ParamSet(params);
        // Only accept keys in canonical form.
        (Self::new(&route, &params).0 == raw).then_some((route, params))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn belongs_to(&self, route: &RouteId) -> bool {
        self.0.starts_with(&Self::route_prefix(route))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn json_string(raw: &str) -> String {
    Value::String(raw.to_string()).to_string()
}
