//! Configuration for the transfer client.
//!
//! Loaded from optional config files and `TRANSFER__`-prefixed environment
//! variables, e.g. `TRANSFER__RETRY__MAX_ATTEMPTS=5`.

use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the transfer client
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Grant authority API
    pub api: ApiConfig,
    /// Concurrency limits
    #[serde(default)]
    pub queue: QueueConfig,
    /// Upload strategy settings
    #[serde(default)]
    pub upload: UploadConfig,
    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Export pipeline settings
    #[serde(default)]
    pub export: ExportConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Grant authority endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the grant authority (e.g. "https://api.example.com")
    pub base_url: String,
    /// Bearer token sent on every authority request
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default = "default_upload_grant_path")]
    pub upload_grant_path: String,
    #[serde(default = "default_read_grant_path")]
    pub read_grant_path: String,
    #[serde(default = "default_proxy_download_path")]
    pub proxy_download_path: String,
    #[serde(default = "default_list_path")]
    pub list_path: String,
    #[serde(default = "default_delete_path")]
    pub delete_path: String,
    /// Timeout for authority requests in seconds (0 = transport default).
    /// Object store PUTs and GETs use a separate client without it.
    #[serde(default)]
    pub request_timeout_secs: u64,
}

/// Concurrency queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum transfers in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

/// Upload configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Payloads above this size use the streamed transfer (5MB default)
    #[serde(default = "default_streamed_threshold")]
    pub streamed_threshold_bytes: u64,
    /// Largest accepted payload (100MB default)
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Chunk size for streamed bodies
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per transfer
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure, doubled for each further failure
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Re-request a grant that expires within this many seconds
    #[serde(default = "default_grant_refresh_margin_secs")]
    pub grant_refresh_margin_secs: u64,
}

/// Export configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Lifetime requested for fallback read grants
    #[serde(default = "default_read_grant_ttl_secs")]
    pub read_grant_ttl_secs: u64,
    /// Time box for each download strategy
    #[serde(default = "default_strategy_timeout_secs")]
    pub strategy_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_upload_grant_path() -> String {
    "/api/v1/grants/upload".to_string()
}

fn default_read_grant_path() -> String {
    "/api/v1/grants/download".to_string()
}

fn default_proxy_download_path() -> String {
    "/api/v1/objects/download".to_string()
}

fn default_list_path() -> String {
    "/api/v1/objects".to_string()
}

fn default_delete_path() -> String {
    "/api/v1/objects/delete".to_string()
}

fn default_max_concurrent() -> usize {
    3
}

fn default_streamed_threshold() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    60000
}

fn default_grant_refresh_margin_secs() -> u64 {
    30
}

fn default_read_grant_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_strategy_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            streamed_threshold_bytes: default_streamed_threshold(),
            max_file_size_bytes: default_max_file_size(),
            chunk_size_bytes: default_chunk_size(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            grant_refresh_margin_secs: default_grant_refresh_margin_secs(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            read_grant_ttl_secs: default_read_grant_ttl_secs(),
            strategy_timeout_secs: default_strategy_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ApiConfig {
    /// Config pointing at `base_url` with the default endpoint paths
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: String::new(),
            upload_grant_path: default_upload_grant_path(),
            read_grant_path: default_read_grant_path(),
            proxy_download_path: default_proxy_download_path(),
            list_path: default_list_path(),
            delete_path: default_delete_path(),
            request_timeout_secs: 0,
        }
    }

    /// Join the base URL with an endpoint path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Transport timeout, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn grant_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.grant_refresh_margin_secs)
    }
}

impl ExportConfig {
    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }
}

impl TransferConfig {
    /// Config with defaults everywhere except the authority URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig::new(base_url),
            queue: QueueConfig::default(),
            upload: UploadConfig::default(),
            retry: RetryConfig::default(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from config files and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. config/transfer
    /// 2. /etc/guestlens/transfer
    /// 3. Environment variables prefixed with TRANSFER__
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/transfer").required(false))
            .add_source(config::File::with_name("/etc/guestlens/transfer").required(false))
            // TRANSFER__API__BASE_URL -> api.base_url
            .add_source(
                config::Environment::with_prefix("TRANSFER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.api.base_url.is_empty() {
            return Err(ConfigValidationError::MissingField("api.base_url".to_string()));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.base_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        if self.queue.max_concurrent == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "queue.max_concurrent".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.upload.chunk_size_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.chunk_size_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.export.strategy_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "export.strategy_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.export.read_grant_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "export.read_grant_ttl_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
