//! KILN build entry point
//!
//! Loads the route table and seed records, runs one build pass against the
//! in-memory data source, and writes the manifest. Exits non-zero when any
//! route failed to enumerate.

use std::process::ExitCode;

use kiln_engine::{init_tracing, run_build_pass, EngineSettings, TelemetryConfig};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing(&TelemetryConfig::from_env()) {
        eprintln!("kiln: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match EngineSettings::from_env() {
        Ok(settings) => run_build_pass(&settings).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "Build aborted");
            ExitCode::FAILURE
        }
    }
}
