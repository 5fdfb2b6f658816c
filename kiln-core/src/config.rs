//! Configuration types

use crate::error::{ConfigError, KilnResult};
use crate::route::{Route, RouteId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default upper bound on a single build, in milliseconds.
pub const DEFAULT_BUILD_TIMEOUT_MS: u64 = 10_000;

/// Default number of builds a build pass runs at once.
pub const DEFAULT_BUILD_CONCURRENCY: usize = 8;

/// Longest accepted route id, in bytes. Keeps every cache key's route
/// prefix well inside storage key limits.
pub const MAX_ROUTE_ID_BYTES: usize = 128;

fn default_build_timeout_ms() -> u64 {
    DEFAULT_BUILD_TIMEOUT_MS
}

fn default_build_concurrency() -> usize {
    DEFAULT_BUILD_CONCURRENCY
}

/// Master configuration struct.
///
/// Loaded from TOML at process start:
///
/// ```toml
/// build_timeout_ms = 5000
///
/// [[routes]]
/// id = "meetups"
/// ttl_seconds = 10
///
/// [[routes]]
/// id = "meetup"
/// slots = ["meetupId"]
/// fallback = "blocking"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Upper bound on one builder invocation, in milliseconds.
    #[serde(default = "default_build_timeout_ms")]
    pub build_timeout_ms: u64,
    /// How many keys a build pass renders concurrently.
    #[serde(default = "default_build_concurrency")]
    pub build_concurrency: usize,
    pub routes: Vec<Route>,
}

impl KilnConfig {
    /// Configuration with default limits for the given routes.
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            build_timeout_ms: DEFAULT_BUILD_TIMEOUT_MS,
            build_concurrency: DEFAULT_BUILD_CONCURRENCY,
            routes,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> KilnResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }

    pub fn route(&self, id: &RouteId) -> Option<&Route> {
        self.routes.iter().find(|route| &route.id == id)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> KilnResult<()> {
        if self.build_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "build_timeout_ms".to_string(),
                value: self.build_timeout_ms.to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        if self.build_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "build_concurrency".to_string(),
                value: self.build_concurrency.to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        if self.routes.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "routes".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            validate_route(route)?;
            if !seen.insert(&route.id) {
                return Err(ConfigError::DuplicateRoute {
                    route: route.id.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

fn validate_route(route: &Route) -> Result<(), ConfigError> {
    let id = route.id.as_str();
    if id.is_empty() || id.chars().any(char::is_control) {
        return Err(ConfigError::InvalidValue {
            field: "routes.id".to_string(),
            value: format!("{:?}", id),
            reason: "must be non-empty and free of control characters".to_string(),
        });
    }

    if id.len() > MAX_ROUTE_ID_BYTES {
        return Err(ConfigError::InvalidValue {
            field: "routes.id".to_string(),
            value: format!("{}...", id.chars().take(16).collect::<String>()),
            reason: format!("longer than {} bytes", MAX_ROUTE_ID_BYTES),
        });
    }

    if route.slots.len() > 1 {
        return Err(ConfigError::InvalidValue {
            field: format!("routes.{}.slots", id),
            value: format!("{:?}", route.slots),
            reason: "a route takes at most one parameter slot".to_string(),
        });
    }

    if route.slots.iter().any(|slot| slot.trim().is_empty()) {
        return Err(ConfigError::InvalidValue {
            field: format!("routes.{}.slots", id),
            value: format!("{:?}", route.slots),
            reason: "slot names must be non-empty".to_string(),
        });
    }

    if route.ttl_seconds == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: format!("routes.{}.ttl_seconds", id),
            value: "0".to_string(),
            reason: "must be positive; omit it for pages that never go stale".to_string(),
        });
    }

    Ok(())
}
