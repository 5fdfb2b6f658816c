//! Process settings for the `kiln` binary.
//!
//! Loaded from environment variables with defaults for local runs. The
//! route table itself lives in a TOML file (`KILN_CONFIG`); without one the
//! binary builds the stock meetup pages.

use std::path::PathBuf;

use kiln_core::{ConfigError, FallbackMode, KilnConfig, KilnResult, Route};

/// Default manifest output directory.
pub const DEFAULT_OUT_DIR: &str = "kiln-out";

/// Default LMDB map size, in megabytes.
pub const DEFAULT_STORE_SIZE_MB: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub config_path: Option<PathBuf>,
    pub seed_path: Option<PathBuf>,
    pub out_dir: PathBuf,
    /// LMDB directory; the in-memory store is used when unset.
    pub store_dir: Option<PathBuf>,
    pub store_size_mb: usize,
    pub build_timeout_ms: Option<u64>,
    pub build_concurrency: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            seed_path: None,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            store_dir: None,
            store_size_mb: DEFAULT_STORE_SIZE_MB,
            build_timeout_ms: None,
            build_concurrency: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> KilnResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| {
            ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

impl EngineSettings {
    /// Create settings from environment variables.
    ///
    /// Environment variables:
    /// - `KILN_CONFIG`: path to the route table (TOML)
    /// - `KILN_SEED`: path to JSON seed records for the in-memory data source
    /// - `KILN_OUT`: manifest output directory (default: `kiln-out`)
    /// - `KILN_STORE_DIR`: LMDB store directory (default: in-memory store)
    /// - `KILN_STORE_SIZE_MB`: LMDB map size (default: 256)
    /// - `KILN_BUILD_TIMEOUT_MS`: overrides `build_timeout_ms` from the config
    /// - `KILN_BUILD_CONCURRENCY`: overrides `build_concurrency` from the config
    ///
    /// Malformed numbers are an error rather than silently defaulted.
    pub fn from_env() -> KilnResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            config_path: std::env::var("KILN_CONFIG").ok().map(PathBuf::from),
            seed_path: std::env::var("KILN_SEED").ok().map(PathBuf::from),
            out_dir: std::env::var("KILN_OUT")
                .map(PathBuf::from)
                .unwrap_or(defaults.out_dir),
            store_dir: std::env::var("KILN_STORE_DIR").ok().map(PathBuf::from),
            store_size_mb: parse_var("KILN_STORE_SIZE_MB")?.unwrap_or(defaults.store_size_mb),
            build_timeout_ms: parse_var("KILN_BUILD_TIMEOUT_MS")?,
            build_concurrency: parse_var("KILN_BUILD_CONCURRENCY")?,
        })
    }

    /// Load the route table, apply overrides and validate.
    pub fn load_config(&self) -> KilnResult<KilnConfig> {
        let mut config = match &self.config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
                    field: "KILN_CONFIG".to_string(),
                    value: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                KilnConfig::from_toml_str(&raw)?
            }
            None => meetup_config(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides to `config`.
    pub fn apply(&self, config: &mut KilnConfig) {
        if let Some(timeout) = self.build_timeout_ms {
            config.build_timeout_ms = timeout;
        }
        if let Some(concurrency) = self.build_concurrency {
            config.build_concurrency = concurrency;
        }
    }
}

/// The stock route table: a meetup list regenerated every ten seconds and
/// one page per meetup, built at build time only.
pub fn meetup_config() -> KilnConfig {
    KilnConfig::new(vec![
        Route::collection("meetups").with_ttl(10),
        Route::record("meetup", "meetupId").with_fallback(FallbackMode::Disabled),
    ])
}
