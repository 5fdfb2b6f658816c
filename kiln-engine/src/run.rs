//! One complete build pass, as the `kiln` binary runs it.

use std::sync::Arc;

use chrono::Utc;
use kiln_core::{ConfigError, KilnResult};
use kiln_storage::{ArtifactStore, InMemoryArtifactStore, InMemoryDataSource, LmdbArtifactStore};

use crate::builder::JsonRenderer;
use crate::dispatcher::RequestDispatcher;
use crate::settings::EngineSettings;

/// Load config and seed, build every route and write the manifest.
///
/// Returns whether every route enumerated.
pub async fn run_build_pass(settings: &EngineSettings) -> KilnResult<bool> {
    let config = settings.load_config()?;

    let source = InMemoryDataSource::new()
        .bind("meetup", "meetups")
        .bind("meetups", "meetups");
    if let Some(path) = &settings.seed_path {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            field: "KILN_SEED".to_string(),
            value: path.display().to_string(),
            reason: e.to_string(),
        })?;
        source.load_seed(&raw)?;
    }

    let store: Arc<dyn ArtifactStore> = match &settings.store_dir {
        Some(dir) => Arc::new(LmdbArtifactStore::open(dir, settings.store_size_mb)?),
        None => Arc::new(InMemoryArtifactStore::new()),
    };

    tracing::info!(
        routes = config.routes.len(),
        timeout_ms = config.build_timeout_ms,
        concurrency = config.build_concurrency,
        durable = settings.store_dir.is_some(),
        "Starting build pass"
    );

    let dispatcher = RequestDispatcher::new(&config, Arc::new(source), store, Arc::new(JsonRenderer));
    let report = dispatcher.build_all(Utc::now()).await;

    for failure in report.routes.iter().flat_map(|r| r.failures()) {
        tracing::warn!(key = %failure.key, error = %failure.error, "Page not built");
    }
    for error in report.enumeration_failures() {
        tracing::error!(route = %error.route, reason = %error.reason, "Route skipped");
    }

    report.manifest().write_to_dir(&settings.out_dir)?;

    let stats = dispatcher.store().stats().await?;
    tracing::info!(
        built = report.built_count(),
        failed = report.failure_count(),
        entries = stats.entry_count,
        payload_bytes = stats.payload_bytes,
        "Build complete"
    );

    let enumerated = report.enumeration_failures().next().is_none();
    Ok(enumerated)
}
