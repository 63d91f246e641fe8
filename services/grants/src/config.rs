use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration for the grant service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service-level configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Bucket the grants are signed against
    pub s3: S3Config,
    /// Grant lifetimes
    #[serde(default)]
    pub grants: GrantsConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Who may read which gallery
    #[serde(default)]
    pub access: AccessConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style URLs (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Grant lifetimes in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct GrantsConfig {
    #[serde(default = "default_write_ttl_secs")]
    pub write_ttl_secs: u64,
    /// Used when a read request names no lifetime
    #[serde(default = "default_read_ttl_secs")]
    pub read_ttl_secs: u64,
    /// Requested read lifetimes are clamped to this
    #[serde(default = "default_max_read_ttl_secs")]
    pub max_read_ttl_secs: u64,
    /// Lifetime of the display URLs in list responses
    #[serde(default = "default_list_url_ttl_secs")]
    pub list_url_ttl_secs: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,
    /// Allowed origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Accepted bearer tokens; empty accepts any non-empty token
    #[serde(default)]
    pub bearer_tokens: Vec<String>,
}

/// How read access is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Every caller may read every gallery
    Open,
    /// Only callers listed for a gallery may read it
    AllowList,
}

/// Access configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_access_mode")]
    pub mode: AccessMode,
    /// Gallery slug -> callers allowed to read it
    #[serde(default)]
    pub allow: HashMap<String, Vec<String>>,
}

// Default value functions
fn default_service_name() -> String {
    "grant-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_write_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_read_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_read_ttl_secs() -> u64 {
    3600
}

fn default_list_url_ttl_secs() -> u64 {
    3600
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_cors_enabled() -> bool {
    true
}

fn default_access_mode() -> AccessMode {
    AccessMode::Open
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for GrantsConfig {
    fn default() -> Self {
        Self {
            write_ttl_secs: default_write_ttl_secs(),
            read_ttl_secs: default_read_ttl_secs(),
            max_read_ttl_secs: default_max_read_ttl_secs(),
            list_url_ttl_secs: default_list_url_ttl_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_cors_enabled(),
            cors_origins: Vec::new(),
            bearer_tokens: Vec::new(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            mode: default_access_mode(),
            allow: HashMap::new(),
        }
    }
}

impl GrantsConfig {
    pub fn write_ttl(&self) -> Duration {
        Duration::from_secs(self.write_ttl_secs)
    }

    /// Lifetime for a read grant, clamped to the configured maximum
    pub fn read_ttl(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(self.read_ttl_secs)
            .min(self.max_read_ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn list_url_ttl(&self) -> Duration {
        Duration::from_secs(self.list_url_ttl_secs)
    }
}

impl Config {
    /// Load configuration from config files and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. config/grants
    /// 2. /etc/guestlens/grants
    /// 3. Environment variables prefixed with GRANTS__
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/grants").required(false))
            .add_source(config::File::with_name("/etc/guestlens/grants").required(false))
            // GRANTS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("GRANTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        if self.grants.write_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "grants.write_ttl_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        // S3 presigned URLs are capped at 7 days.
        const MAX_PRESIGN_SECS: u64 = 7 * 24 * 3600;
        if self.grants.max_read_ttl_secs == 0 || self.grants.max_read_ttl_secs > MAX_PRESIGN_SECS {
            return Err(ConfigValidationError::InvalidValue {
                field: "grants.max_read_ttl_secs".to_string(),
                message: format!("Must be between 1 and {}", MAX_PRESIGN_SECS),
            });
        }

        if self.grants.read_ttl_secs > self.grants.max_read_ttl_secs {
            return Err(ConfigValidationError::InvalidValue {
                field: "grants.read_ttl_secs".to_string(),
                message: "Must not exceed grants.max_read_ttl_secs".to_string(),
            });
        }

        if self.access.mode == AccessMode::AllowList && self.access.allow.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "access.allow".to_string(),
                message: "allow_list mode needs at least one gallery".to_string(),
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

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        service: ServiceConfig::default(),
        s3: S3Config {
            bucket: "guestlens-media".to_string(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        },
        grants: GrantsConfig::default(),
        api: ApiConfig::default(),
        access: AccessConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = test_config();
        assert_eq!(config.grants.write_ttl(), Duration::from_secs(3600));
        assert_eq!(config.grants.read_ttl_secs, 300);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.access.mode, AccessMode::Open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_ttl_is_clamped() {
        let grants = GrantsConfig {
            max_read_ttl_secs: 600,
            ..GrantsConfig::default()
        };
        assert_eq!(grants.read_ttl(None), Duration::from_secs(300));
        assert_eq!(grants.read_ttl(Some(0)), Duration::from_secs(300));
        assert_eq!(grants.read_ttl(Some(120)), Duration::from_secs(120));
        assert_eq!(grants.read_ttl(Some(86_400)), Duration::from_secs(600));
    }

    #[test]
    fn test_missing_bucket() {
        let mut config = test_config();
        config.s3.bucket.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_allow_list_needs_entries() {
        let mut config = test_config();
        config.access.mode = AccessMode::AllowList;
        assert!(config.validate().is_err());

        config
            .access
            .allow
            .insert("party".to_string(), vec!["alice".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_access_mode_from_snake_case() {
        let mode: AccessMode = serde_json::from_str("\"allow_list\"").unwrap();
        assert_eq!(mode, AccessMode::AllowList);
    }
}
