//! Configuration management for modelyard
//!
//! Settings load from environment variables with sensible defaults, so the
//! library works with zero configuration and every knob stays scriptable.
//!
//! # Environment Variables
//!
//! - `MODELYARD_MANIFEST_URL`: Runtime manifest endpoint - default: the hosted manifest
//! - `MODELYARD_MANIFEST_TTL`: Manifest freshness window in seconds - default: "300"
//! - `MODELYARD_CACHE_DIR`: Cache base directory - default: resolved from
//!   `HF_HUB_CACHE`, `HF_HOME`, `XDG_CACHE_HOME`, then the platform cache dir
//! - `MODELYARD_MAX_CACHE_SIZE`: Binary cache budget in bytes - default: "10737418240" (10 GiB)
//! - `MODELYARD_POOL_BUDGET`: Model pool budget in bytes - default: derived from detected memory
//! - `MODELYARD_SAFETY_MARGIN`: Headroom fraction for pool admission - default: "0.2"
//! - `MODELYARD_PROVIDER`: Preferred execution provider (auto|cuda|directml|coreml|cpu) - default: "auto"
//! - `MODELYARD_HTTP_TIMEOUT`: HTTP timeout in seconds - default: "30"
//! - `MODELYARD_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use modelyard::YardConfig;
//!
//! let config = YardConfig::default();
//! config.validate().expect("invalid configuration");
//! println!("{config}");
//! ```

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_MAX_CACHE_BYTES;
use crate::memory::DEFAULT_SAFETY_MARGIN;
use crate::provider::ExecutionProvider;
use crate::util::format_bytes;

/// Default values for configuration
pub const DEFAULT_MANIFEST_URL: &str = "https://runtimes.modelyard.dev/manifest.json";
const DEFAULT_MANIFEST_TTL_SECS: u64 = 300;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// Main configuration structure for modelyard
///
/// Constructed via `Default::default()`, which loads `MODELYARD_*`
/// environment variables with fallback defaults for anything missing.
#[derive(Debug, Clone)]
pub struct YardConfig {
    /// Runtime manifest endpoint
    pub manifest_url: String,

    /// How long a fetched manifest stays fresh, in seconds
    pub manifest_ttl_secs: u64,

    /// Cache base directory; `None` resolves through the environment chain
    pub cache_dir: Option<PathBuf>,

    /// Binary cache budget in bytes
    pub max_cache_bytes: u64,

    /// Model pool budget in bytes; `None` derives it from detected memory
    pub pool_budget_bytes: Option<u64>,

    /// Headroom fraction applied when admitting a model to the pool
    pub safety_margin: f64,

    /// Preferred execution provider
    pub preferred_provider: ExecutionProvider,

    /// HTTP timeout in seconds
    pub http_timeout_secs: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for YardConfig {
    fn default() -> Self {
        let manifest_url =
            env::var("MODELYARD_MANIFEST_URL").unwrap_or_else(|_| DEFAULT_MANIFEST_URL.to_string());

        let manifest_ttl_secs = env::var("MODELYARD_MANIFEST_TTL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MANIFEST_TTL_SECS);

        let cache_dir = env::var("MODELYARD_CACHE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let max_cache_bytes = env::var("MODELYARD_MAX_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_CACHE_BYTES);

        let pool_budget_bytes = env::var("MODELYARD_POOL_BUDGET")
            .ok()
            .and_then(|v| v.parse::<u64>().ok());

        let safety_margin = env::var("MODELYARD_SAFETY_MARGIN")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(DEFAULT_SAFETY_MARGIN);

        let preferred_provider = env::var("MODELYARD_PROVIDER")
            .ok()
            .and_then(|v| v.parse::<ExecutionProvider>().ok())
            .unwrap_or(ExecutionProvider::Auto);

        let http_timeout_secs = env::var("MODELYARD_HTTP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        let log_level = env::var("MODELYARD_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            manifest_url,
            manifest_ttl_secs,
            cache_dir,
            max_cache_bytes,
            pool_budget_bytes,
            safety_margin,
            preferred_provider,
            http_timeout_secs,
            log_level,
        }
    }
}

impl YardConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any value is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manifest_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Manifest URL cannot be empty".to_string(),
            ));
        }
        if !self.manifest_url.starts_with("http://") && !self.manifest_url.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "Manifest URL must be http(s), got: {}",
                self.manifest_url
            )));
        }

        // A zero TTL is valid and means revalidate on every call.
        if self.manifest_ttl_secs > 86_400 {
            return Err(ConfigError::ValidationFailed(
                "Manifest TTL cannot exceed 24 hours".to_string(),
            ));
        }

        if self.max_cache_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "Cache budget must be at least 1 byte".to_string(),
            ));
        }

        if let Some(budget) = self.pool_budget_bytes {
            if budget == 0 {
                return Err(ConfigError::ValidationFailed(
                    "Pool budget must be at least 1 byte".to_string(),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.safety_margin) {
            return Err(ConfigError::ValidationFailed(format!(
                "Safety margin must be between 0.0 and 1.0, got {}",
                self.safety_margin
            )));
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "HTTP timeout must be at least 1 second".to_string(),
            ));
        }
        if self.http_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "HTTP timeout cannot exceed 10 minutes".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn manifest_ttl(&self) -> Duration {
        Duration::from_secs(self.manifest_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl fmt::Display for YardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Modelyard Configuration:")?;
        writeln!(f, "  Manifest URL: {}", self.manifest_url)?;
        writeln!(f, "  Manifest TTL: {}s", self.manifest_ttl_secs)?;
        match &self.cache_dir {
            Some(dir) => writeln!(f, "  Cache Dir: {}", dir.display())?,
            None => writeln!(f, "  Cache Dir: (auto)")?,
        }
        writeln!(f, "  Cache Budget: {}", format_bytes(self.max_cache_bytes))?;
        match self.pool_budget_bytes {
            Some(budget) => writeln!(f, "  Pool Budget: {}", format_bytes(budget))?,
            None => writeln!(f, "  Pool Budget: (from detected memory)")?,
        }
        writeln!(f, "  Safety Margin: {:.0}%", self.safety_margin * 100.0)?;
        writeln!(f, "  Provider: {}", self.preferred_provider)?;
        writeln!(f, "  HTTP Timeout: {}s", self.http_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

/// Temporarily pins an environment variable, restoring it on drop
///
/// Shared by env-sensitive tests across modules; pair with `#[serial]`.
#[cfg(test)]
pub(crate) struct EnvGuard {
    key: String,
    old_value: Option<String>,
}

#[cfg(test)]
impl EnvGuard {
    pub(crate) fn set(key: &str, value: &str) -> Self {
        let old_value = env::var(key).ok();
        env::set_var(key, value);
        Self {
            key: key.to_string(),
            old_value,
        }
    }

    pub(crate) fn unset(key: &str) -> Self {
        let old_value = env::var(key).ok();
        env::remove_var(key);
        Self {
            key: key.to_string(),
            old_value,
        }
    }
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.old_value {
            Some(v) => env::set_var(&self.key, v),
            None => env::remove_var(&self.key),
        }
    }
}
