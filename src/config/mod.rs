//! Configuration loading for the Open Finance sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `OPENFINANCE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "OPENFINANCE_";

/// Application configuration derived from `OPENFINANCE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Browser origins allowed by CORS; empty allows any origin
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub front_origins: Vec<String>,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Settings for the Pluggy aggregator API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AggregatorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_aggregator_api_base")]
    pub api_base: String,
    /// Transactions requested per page
    #[serde(default = "default_aggregator_page_size")]
    pub page_size: u32,
    /// Lifetime given to a cached API key; kept below the provider's 60 minutes
    #[serde(default = "default_aggregator_credential_ttl_seconds")]
    pub credential_ttl_seconds: u64,
    #[serde(default = "default_aggregator_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Settings for sync passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Lower bound used when a caller does not pass `from`
    #[serde(default = "default_sync_default_from")]
    pub default_from: String,
    /// Upper bound for one item's pipeline; 0 disables the limit
    #[serde(default)]
    pub item_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            front_origins: Vec::new(),
            aggregator: AggregatorConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base: default_aggregator_api_base(),
            page_size: default_aggregator_page_size(),
            credential_ttl_seconds: default_aggregator_credential_ttl_seconds(),
            request_timeout_ms: default_aggregator_request_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_from: default_sync_default_from(),
            item_timeout_seconds: 0,
        }
    }
}

impl AggregatorConfig {
    /// Validate aggregator settings. Credentials are only enforced when `require_credentials`.
    pub fn validate(&self, require_credentials: bool) -> Result<(), ConfigError> {
        if require_credentials {
            if self.client_id.is_none() {
                return Err(ConfigError::MissingAggregatorClientId);
            }
            if self.client_secret.is_none() {
                return Err(ConfigError::MissingAggregatorClientSecret);
            }
        }

        Url::parse(&self.api_base).map_err(|source| ConfigError::InvalidAggregatorApiBase {
            value: self.api_base.clone(),
            source,
        })?;

        if !(1..=500).contains(&self.page_size) {
            return Err(ConfigError::InvalidPageSize {
                value: self.page_size,
            });
        }

        if !(60..=3600).contains(&self.credential_ttl_seconds) {
            return Err(ConfigError::InvalidCredentialTtl {
                value: self.credential_ttl_seconds,
            });
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidRequestTimeout {
                value: self.request_timeout_ms,
            });
        }

        Ok(())
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SyncConfig {
    /// Parsed form of `default_from`.
    pub fn default_from(&self) -> Result<DateTime<Utc>, ConfigError> {
        parse_timestamp(&self.default_from).ok_or_else(|| ConfigError::InvalidSyncDefaultFrom {
            value: self.default_from.clone(),
        })
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        (self.item_timeout_seconds > 0).then(|| Duration::from_secs(self.item_timeout_seconds))
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.aggregator.client_id.is_some() {
            config.aggregator.client_id = Some("[REDACTED]".to_string());
        }
        if config.aggregator.client_secret.is_some() {
            config.aggregator.client_secret = Some("[REDACTED]".to_string());
        }
        if let Ok(mut url) = Url::parse(&config.database_url)
            && url.password().is_some()
            && url.set_password(Some("[REDACTED]")).is_ok()
        {
            config.database_url = url.to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Whether aggregator credentials must be present for this profile.
    pub fn requires_aggregator_credentials(&self) -> bool {
        !matches!(self.profile.as_str(), "local" | "test")
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregator
            .validate(self.requires_aggregator_credentials())?;

        self.sync.default_from()?;

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections {
                value: self.db_max_connections,
            });
        }

        Ok(())
    }
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:3333".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/finance".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_aggregator_api_base() -> String {
    "https://api.pluggy.ai".to_string()
}

fn default_aggregator_page_size() -> u32 {
    50
}

fn default_aggregator_credential_ttl_seconds() -> u64 {
    50 * 60
}

fn default_aggregator_request_timeout_ms() -> u64 {
    30_000
}

fn default_sync_default_from() -> String {
    "2015-01-01T00:00:00Z".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("aggregator client ID is missing; set OPENFINANCE_PLUGGY_CLIENT_ID")]
    MissingAggregatorClientId,
    #[error("aggregator client secret is missing; set OPENFINANCE_PLUGGY_CLIENT_SECRET")]
    MissingAggregatorClientSecret,
    #[error("invalid aggregator api base '{value}': {source}")]
    InvalidAggregatorApiBase {
        value: String,
        source: url::ParseError,
    },
    #[error("aggregator page size must be between 1 and 500, got {value}")]
    InvalidPageSize { value: u32 },
    #[error("aggregator credential TTL must be between 60 and 3600 seconds, got {value}")]
    InvalidCredentialTtl { value: u64 },
    #[error("aggregator request timeout must be positive, got {value}")]
    InvalidRequestTimeout { value: u64 },
    #[error("sync default from '{value}' is not an RFC 3339 timestamp or YYYY-MM-DD date")]
    InvalidSyncDefaultFrom { value: String },
    #[error("database max connections must be positive, got {value}")]
    InvalidDbMaxConnections { value: u32 },
    #[error("invalid numeric value for {key}: '{value}'")]
    InvalidNumber { key: String, value: String },
}

/// Loads configuration using layered `.env` files and `OPENFINANCE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`, then the
    /// process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_number(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_number(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let front_origins = take_string(&mut layered, "FRONT_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let aggregator = AggregatorConfig {
            client_id: take_string(&mut layered, "PLUGGY_CLIENT_ID"),
            client_secret: take_string(&mut layered, "PLUGGY_CLIENT_SECRET"),
            api_base: take_string(&mut layered, "PLUGGY_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(default_aggregator_api_base),
            page_size: take_number(&mut layered, "PLUGGY_PAGE_SIZE")?
                .unwrap_or_else(default_aggregator_page_size),
            credential_ttl_seconds: take_number(&mut layered, "PLUGGY_CREDENTIAL_TTL_SECONDS")?
                .unwrap_or_else(default_aggregator_credential_ttl_seconds),
            request_timeout_ms: take_number(&mut layered, "PLUGGY_REQUEST_TIMEOUT_MS")?
                .unwrap_or_else(default_aggregator_request_timeout_ms),
        };

        let sync = SyncConfig {
            default_from: take_string(&mut layered, "SYNC_DEFAULT_FROM")
                .unwrap_or_else(default_sync_default_from),
            item_timeout_seconds: take_number(&mut layered, "SYNC_ITEM_TIMEOUT_SECONDS")?
                .unwrap_or_default(),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            front_origins,
            aggregator,
            sync,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_number<T: std::str::FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(values, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        None => Ok(None),
    }
}
