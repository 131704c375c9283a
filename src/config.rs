use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::storage::registry::is_valid_tenant_key;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_request_timeout() -> u64 {
    30
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// One SQLite file per game lives under `data_dir`, named `<game>.db`.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Tenant used when a request carries no `gameName`.
    #[serde(default = "default_game")]
    pub default_game: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_game: default_game(),
            pool_size: default_pool_size(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_game() -> String {
    "playmetrics".to_string()
}
fn default_pool_size() -> usize {
    8
}
fn default_query_timeout() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_max_name")]
    pub max_name_bytes: usize,
    #[serde(default = "default_max_test_type")]
    pub max_test_type_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload(),
            max_name_bytes: default_max_name(),
            max_test_type_bytes: default_max_test_type(),
        }
    }
}

fn default_max_payload() -> usize {
    16 * 1024
}
fn default_max_name() -> usize {
    256
}
fn default_max_test_type() -> usize {
    128
}

/// Where label discovery looks when a request omits `testType`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestTypeSource {
    #[default]
    Player,
    Playtime,
}

/// What defines the day a player joins a retention cohort.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CohortBasis {
    /// `players.created_at`, i.e. the first recorded event of any kind.
    #[default]
    CreatedAt,
    /// Earliest playtime event for the player under the label.
    FirstPlaytime,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub test_type_source: TestTypeSource,
    #[serde(default)]
    pub cohort_basis: CohortBasis,
    #[serde(default = "default_max_range_days")]
    pub max_range_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            test_type_source: TestTypeSource::default(),
            cohort_basis: CohortBasis::default(),
            max_range_days: default_max_range_days(),
        }
    }
}

fn default_max_range_days() -> i64 {
    366
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Applies to the ingest routes only.
    #[serde(default)]
    pub enabled: bool,
    /// Milliseconds between token replenishments per client IP.
    #[serde(default = "default_replenish_interval_ms")]
    pub replenish_interval_ms: u64,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            replenish_interval_ms: default_replenish_interval_ms(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_replenish_interval_ms() -> u64 {
    5
}
fn default_burst_size() -> u32 {
    2000
}

impl AppConfig {
    /// Reject values that would only fail later, at request time.
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_tenant_key(&self.database.default_game) {
            return Err(format!(
                "database.default_game {:?} must match [A-Za-z0-9_-]{{1,64}}",
                self.database.default_game
            ));
        }
        if self.database.pool_size == 0 {
            return Err("database.pool_size must be at least 1".to_string());
        }
        if self.database.query_timeout_secs == 0 || self.server.request_timeout_secs == 0 {
            return Err("timeouts must be at least 1 second".to_string());
        }
        if self.analytics.max_range_days < 1 {
            return Err("analytics.max_range_days must be at least 1".to_string());
        }
        if self.rate_limit.enabled
            && (self.rate_limit.replenish_interval_ms == 0 || self.rate_limit.burst_size == 0)
        {
            return Err(
                "rate_limit.replenish_interval_ms and rate_limit.burst_size must be non-zero"
                    .to_string(),
            );
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // PLAYMETRICS__DATABASE__DEFAULT_GAME=mygame, etc.
        builder = builder.add_source(
            Environment::with_prefix("PLAYMETRICS")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
