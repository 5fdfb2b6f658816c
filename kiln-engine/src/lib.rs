//! KILN Engine - Static Generation and Revalidation
//!
//! Pre-builds every known page of every route, serves pages from the
//! artifact store, and rebuilds them in the background once they go stale.
//!
//! # Components
//!
//! - **ParamEnumerator**: parameter sets a route is pre-built for
//! - **BuildCoordinator**: at most one build per cache key, result fanned out to all waiters
//! - **FallbackPolicy**: what to do with a missing page
//! - **PageBuilder**: fetch, render, stamp
//! - **RequestDispatcher**: `handle(route, params, now) -> Response`, plus build passes
//! - **run_build_pass**: what the `kiln` binary does, config to manifest

pub mod builder;
pub mod coordinator;
pub mod dispatcher;
pub mod enumerate;
pub mod fallback;
pub mod manifest;
pub mod report;
pub mod response;
pub mod run;
pub mod settings;
pub mod stats;
pub mod telemetry;

pub use builder::{JsonRenderer, PageBuilder, Renderer};
pub use coordinator::{BuildCoordinator, BuildOutcome, Trigger};
pub use dispatcher::RequestDispatcher;
pub use enumerate::ParamEnumerator;
pub use fallback::{Action, FallbackPolicy};
pub use manifest::{BuildManifest, ManifestEntry, MANIFEST_FILE};
pub use report::{BuildReport, BuiltEntry, KeyFailure, RouteOutcome, RouteReport};
pub use response::{RequestError, Response};
pub use run::run_build_pass;
pub use settings::{meetup_config, EngineSettings};
pub use stats::{BuildStats, BuildStatsSnapshot};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
