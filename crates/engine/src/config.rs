//! Worker configuration via `tessera.toml`
//!
//! A worker opened on a directory reads `tessera.toml` from it, creating a
//! commented default on first open. Programmatic callers build a
//! [`WorkerConfig`] directly with the `with_*` setters.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessera_concurrency::RetryConfig;
use tessera_core::{TesseraError, TesseraResult};

/// Config file name placed in the worker directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

fn default_prepare_timeout_ms() -> u64 {
    2_000
}

fn default_reclaim_interval_ms() -> u64 {
    1_000
}

fn default_use_overlay() -> bool {
    true
}

/// Worker configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// prepare_timeout_ms = 2000
/// reclaim_interval_ms = 1000
/// use_overlay = true
///
/// [retry]
/// max_retries = 5
/// base_delay_ms = 5
/// max_delay_ms = 200
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bound on the prepare phase of a commit, in milliseconds.
    #[serde(default = "default_prepare_timeout_ms")]
    pub prepare_timeout_ms: u64,
    /// Interval between background reclamation passes, in milliseconds.
    /// Zero disables the background thread.
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,
    /// Fetch through the dissemination overlay when one is attached.
    #[serde(default = "default_use_overlay")]
    pub use_overlay: bool,
    /// Retry policy for `transaction_with_retry` and auto-commit.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: default_prepare_timeout_ms(),
            reclaim_interval_ms: default_reclaim_interval_ms(),
            use_overlay: default_use_overlay(),
            retry: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Prepare timeout as a duration.
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    /// Reclaim interval, `None` when background reclamation is off.
    pub fn reclaim_interval(&self) -> Option<Duration> {
        (self.reclaim_interval_ms > 0).then(|| Duration::from_millis(self.reclaim_interval_ms))
    }

    /// Set the prepare timeout.
    pub fn with_prepare_timeout_ms(mut self, ms: u64) -> Self {
        self.prepare_timeout_ms = ms;
        self
    }

    /// Set the reclaim interval; zero disables the background thread.
    pub fn with_reclaim_interval_ms(mut self, ms: u64) -> Self {
        self.reclaim_interval_ms = ms;
        self
    }

    /// Enable or disable overlay fetches.
    pub fn with_overlay(mut self, use_overlay: bool) -> Self {
        self.use_overlay = use_overlay;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject values the worker cannot run with.
    ///
    /// # Errors
    ///
    /// `Config` if the prepare timeout is zero.
    pub fn validate(&self) -> TesseraResult<()> {
        if self.prepare_timeout_ms == 0 {
            return Err(TesseraError::Config(format!(
                "prepare_timeout_ms must be positive in {}",
                CONFIG_FILE_NAME
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera worker configuration
#
# Upper bound on the prepare phase of a commit, in milliseconds.
# A store that does not answer in time counts as unreachable and the
# transaction restarts with exponential backoff.
prepare_timeout_ms = 2000

# Interval between background cache reclamation passes, in milliseconds.
# 0 disables the background thread; call reclaim() yourself.
reclaim_interval_ms = 1000

# Fetch signed objects from the dissemination overlay when attached.
use_overlay = true

# Retry policy for transaction_with_retry and auto-commit.
[retry]
max_retries = 5
base_delay_ms = 5
max_delay_ms = 200
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// `Config` if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> TesseraResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: WorkerConfig = toml::from_str(&content).map_err(|e| {
            TesseraError::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> TesseraResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                TesseraError::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> TesseraResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TesseraError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            TesseraError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
