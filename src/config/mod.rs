//! Typed engine configuration.
//!
//! Loads from environment variables (optionally seeded from a TOML file) and
//! fails fast on malformed values. The process-wide configuration is set at
//! most once; anything that reads it before [`install`] gets the environment
//! defaults.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default time after which a still-running task is reported by the watchdog.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(5 * 60);

/// Default bound on concurrently running members of a group.
pub const DEFAULT_GROUP_CONCURRENCY: usize = 64;

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Config {
    /// Max task bodies executing at once on the shared queue.
    pub shared_concurrency: usize,
    /// Max members of one group in flight at once.
    pub group_concurrency: usize,
    /// Watchdog delay after a task starts executing.
    pub watchdog_timeout: Duration,
    /// Worker threads of the engine runtime. None = tokio default.
    pub runtime_threads: Option<usize>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_concurrency: default_parallelism(),
            group_concurrency: DEFAULT_GROUP_CONCURRENCY,
            watchdog_timeout: DEFAULT_WATCHDOG,
            runtime_threads: None,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

/// On-disk shape. Every field is optional; missing ones keep defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    shared_concurrency: Option<usize>,
    group_concurrency: Option<usize>,
    watchdog_secs: Option<u64>,
    runtime_threads: Option<usize>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Load a TOML file, then apply environment overrides on top.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: FileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))?;

        let mut config = Self::default();
        if let Some(n) = file.shared_concurrency {
            config.shared_concurrency = n;
        }
        if let Some(n) = file.group_concurrency {
            config.group_concurrency = n;
        }
        if let Some(secs) = file.watchdog_secs {
            config.watchdog_timeout = Duration::from_secs(secs);
        }
        if file.runtime_threads.is_some() {
            config.runtime_threads = file.runtime_threads;
        }
        if file.otel_endpoint.is_some() {
            config.otel_endpoint = file.otel_endpoint;
        }
        if let Some(level) = file.log_level {
            config.log_level = level;
        }

        config.validate()?;
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(n) = parsed_var::<usize>("WORK_SHARED_CONCURRENCY")? {
            self.shared_concurrency = n;
        }
        if let Some(n) = parsed_var::<usize>("WORK_GROUP_CONCURRENCY")? {
            self.group_concurrency = n;
        }
        if let Some(secs) = parsed_var::<u64>("WORK_WATCHDOG_SECS")? {
            self.watchdog_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parsed_var::<usize>("WORK_RUNTIME_THREADS")? {
            self.runtime_threads = Some(n);
        }
        if let Ok(endpoint) = std::env::var("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.shared_concurrency == 0 {
            return Err(Error::Config("shared_concurrency must be at least 1".into()));
        }
        if self.group_concurrency == 0 {
            return Err(Error::Config("group_concurrency must be at least 1".into()));
        }
        if self.runtime_threads == Some(0) {
            return Err(Error::Config("runtime_threads must be at least 1".into()));
        }
        Ok(())
    }
}

/// Set the process-wide configuration. Returns `false` if one was already in
/// place (installed earlier or loaded lazily by [`get`]).
pub fn install(config: Config) -> bool {
    CONFIG.set(config).is_ok()
}

/// The process-wide configuration, loaded from the environment on first use.
pub fn get() -> &'static Config {
    CONFIG.get_or_init(|| match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "invalid engine configuration, using defaults");
            Config::default()
        }
    })
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("environment variable {name} has invalid value {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
