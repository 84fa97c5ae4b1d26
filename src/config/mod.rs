//! Configuration module for Photo Relay
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

use crate::upload::validate::MAX_FILE_SIZE;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MEDIA_KEY", "value");
/// assert_eq!(expand_env_vars("key-${MEDIA_KEY}"), "key-value");
/// assert_eq!(expand_env_vars("${MISSING:-fallback}"), "fallback");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default: keep the placeholder
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    pub media_store: MediaStoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "relay.batch_size must be at least 1".into(),
            ));
        }

        if self.relay.max_file_size == 0 {
            return Err(ConfigError::ValidationError(
                "relay.max_file_size must be at least 1 byte".into(),
            ));
        }

        if self.relay.max_request_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "relay.max_request_size must be at least 1 byte".into(),
            ));
        }

        if self.relay.folder.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "relay.folder cannot be empty".into(),
            ));
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "server.request_timeout_seconds must be at least 1".into(),
            ));
        }

        let store = &self.media_store;
        if !is_valid_http_url(&store.api_base) {
            return Err(ConfigError::ValidationError(
                "Invalid media_store.api_base: must start with http:// or https://".into(),
            ));
        }

        for (field, value) in [
            ("cloud_name", &store.cloud_name),
            ("api_key", &store.api_key),
            ("api_secret", &store.api_secret),
        ] {
            if value.trim().is_empty() || value.starts_with("${") {
                return Err(ConfigError::ValidationError(format!(
                    "media_store.{} is not set",
                    field
                )));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level '{}': must be trace, debug, info, warn or error",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Upper bound on handling one upload request, in seconds. Default: 120
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// Relay endpoint behaviour
///
/// # Example
///
/// ```yaml
/// relay:
///   multi_file: true
///   batch_size: 5
///   folder: "wedding-photos"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Accept repeated `file` fields in one request. Default: false
    #[serde(default)]
    pub multi_file: bool,

    /// Maximum concurrent media store calls within one multi-file request. Default: 5
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Largest accepted file in bytes. Default: 50 MiB
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Largest accepted request body in bytes. Default: `max_file_size`
    /// times the files one request may carry (`batch_size` in multi-file
    /// mode, otherwise 1) plus 1 MiB for multipart framing
    #[serde(default)]
    pub max_request_size: Option<u64>,

    /// Destination folder in the media store. Default: "wedding-photos"
    #[serde(default = "default_folder")]
    pub folder: String,

    /// Long-edge limit requested from the media store. Default: 1920
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Default: 1080
    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            multi_file: false,
            batch_size: default_batch_size(),
            max_file_size: default_max_file_size(),
            max_request_size: None,
            folder: default_folder(),
            max_width: default_max_width(),
            max_height: default_max_height(),
        }
    }
}

/// Allowance for multipart boundaries and part headers
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

impl RelayConfig {
    /// Effective request body limit
    pub fn max_request_bytes(&self) -> u64 {
        self.max_request_size.unwrap_or_else(|| {
            let files = if self.multi_file { self.batch_size.max(1) as u64 } else { 1 };
            self.max_file_size.saturating_mul(files).saturating_add(MULTIPART_OVERHEAD)
        })
    }
}

fn default_batch_size() -> usize {
    5
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_folder() -> String {
    "wedding-photos".to_string()
}

fn default_max_width() -> u32 {
    1920
}

fn default_max_height() -> u32 {
    1080
}

/// Media store credentials and endpoint
///
/// String fields support `${VAR}` and `${VAR:-default}` expansion so secrets
/// can stay out of the file.
///
/// # Example
///
/// ```yaml
/// media_store:
///   cloud_name: "${MEDIA_CLOUD_NAME}"
///   api_key: "${MEDIA_API_KEY}"
///   api_secret: "${MEDIA_API_SECRET}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaStoreConfig {
    #[serde(
        default = "default_api_base",
        deserialize_with = "deserialize_with_env"
    )]
    pub api_base: String,

    #[serde(deserialize_with = "deserialize_with_env")]
    pub cloud_name: String,

    #[serde(deserialize_with = "deserialize_with_env")]
    pub api_key: String,

    #[serde(deserialize_with = "deserialize_with_env")]
    pub api_secret: String,

    /// Timeout for one store call in seconds. Default: 60
    #[serde(default = "default_store_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://api.cloudinary.com/v1_1".to_string()
}

fn default_store_timeout() -> u64 {
    60
}

/// Custom deserializer for strings with environment variable expansion.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus text exposition at `GET /metrics`. Default: true
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Fallback level when `RUST_LOG` is unset. Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output. Default: false
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
