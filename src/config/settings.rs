//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

use crate::pool::PoolConfig;
use crate::transport::{ConnectParams, DEFAULT_PORT};

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Cluster connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DsqlSettings {
    pub cluster_id: String,
    /// Explicit endpoint; derived from cluster id and region when unset
    pub endpoint: Option<String>,
    pub database: String,
    pub username: String,
    pub port: u16,
    pub token_ttl_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for DsqlSettings {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            endpoint: None,
            database: "postgres".to_string(),
            username: "admin".to_string(),
            port: DEFAULT_PORT,
            token_ttl_secs: 5,
            connect_timeout_secs: 10,
        }
    }
}

/// Pool sizing and health settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolSettings {
    pub min_connections: usize,
    pub max_connections: usize,
    /// 0 = fail fast when exhausted
    pub acquire_timeout_ms: u64,
    /// 0 = never recycle by age
    pub max_connection_age_secs: u64,
    pub probe_on_acquire: bool,
    pub probe_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 20,
            acquire_timeout_ms: 0,
            max_connection_age_secs: 3600,
            probe_on_acquire: true,
            probe_timeout_ms: 2000,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,
    /// Optional JSON log file, rotated by size
    pub log_file: Option<String>,

    // AWS settings
    pub aws_region: String,

    pub dsql: DsqlSettings,
    pub pool: PoolSettings,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        Self::load_with(|_| {})
    }

    /// Like `load`, applying `overrides` (e.g. CLI flags) before validation
    pub fn load_with(overrides: impl FnOnce(&mut Self)) -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let mut settings = Self::from_env()?;
        overrides(&mut settings);
        settings.validate()?;

        Ok(settings)
    }

    fn from_env() -> Result<Self> {
        Ok(Self {
            // App settings
            app_name: env_or_default("APP_NAME", "dsql-pool"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),
            log_file: env::var("LOG_FILE").ok(),

            // AWS settings
            aws_region: env_or_default("AWS_REGION", "us-east-1"),

            dsql: DsqlSettings {
                cluster_id: env_or_default("DSQL_CLUSTER_ID", ""),
                endpoint: env::var("DSQL_ENDPOINT").ok().filter(|s| !s.is_empty()),
                database: env_or_default("DSQL_DATABASE", "postgres"),
                username: env_or_default("DSQL_USERNAME", "admin"),
                port: env_or_default("DSQL_PORT", "5432")
                    .parse()
                    .context("Invalid DSQL_PORT value")?,
                token_ttl_secs: env_or_default("DSQL_TOKEN_TTL_SECS", "5")
                    .parse()
                    .context("Invalid DSQL_TOKEN_TTL_SECS value")?,
                connect_timeout_secs: env_or_default("DSQL_CONNECT_TIMEOUT_SECS", "10")
                    .parse()
                    .context("Invalid DSQL_CONNECT_TIMEOUT_SECS value")?,
            },

            pool: PoolSettings {
                min_connections: env_or_default("POOL_MIN_CONNECTIONS", "1")
                    .parse()
                    .context("Invalid POOL_MIN_CONNECTIONS value")?,
                max_connections: env_or_default("POOL_MAX_CONNECTIONS", "20")
                    .parse()
                    .context("Invalid POOL_MAX_CONNECTIONS value")?,
                acquire_timeout_ms: env_or_default("POOL_ACQUIRE_TIMEOUT_MS", "0")
                    .parse()
                    .context("Invalid POOL_ACQUIRE_TIMEOUT_MS value")?,
                max_connection_age_secs: env_or_default("POOL_MAX_CONNECTION_AGE_SECS", "3600")
                    .parse()
                    .context("Invalid POOL_MAX_CONNECTION_AGE_SECS value")?,
                probe_on_acquire: env_or_default("POOL_PROBE_ON_ACQUIRE", "true")
                    .parse()
                    .context("Invalid POOL_PROBE_ON_ACQUIRE value")?,
                probe_timeout_ms: env_or_default("POOL_PROBE_TIMEOUT_MS", "2000")
                    .parse()
                    .context("Invalid POOL_PROBE_TIMEOUT_MS value")?,
            },
        })
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.dsql.cluster_id.trim().is_empty() {
            anyhow::bail!("DSQL_CLUSTER_ID must be set");
        }

        if self.dsql.port == 0 {
            anyhow::bail!("DSQL port cannot be 0");
        }

        if self.dsql.token_ttl_secs == 0 {
            anyhow::bail!("DSQL token TTL must be > 0");
        }

        if self.dsql.connect_timeout_secs == 0 {
            anyhow::bail!("DSQL connect timeout must be > 0");
        }

        self.pool_config().validate()?;

        // Stale sessions surface as query errors without the probe
        if self.is_production() && !self.pool.probe_on_acquire {
            tracing::warn!("Running in production with the acquire-time liveness probe disabled!");
        }

        Ok(())
    }

    /// Cluster endpoint, e.g. `abc123.dsql.us-east-1.on.aws`
    pub fn endpoint(&self) -> String {
        match &self.dsql.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("{}.dsql.{}.on.aws", self.dsql.cluster_id, self.aws_region),
        }
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams::new(self.endpoint())
            .with_port(self.dsql.port)
            .with_database(self.dsql.database.clone())
            .with_username(self.dsql.username.clone())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.pool.min_connections, self.pool.max_connections)
            .with_acquire_timeout(Duration::from_millis(self.pool.acquire_timeout_ms))
            .with_max_connection_age(Duration::from_secs(self.pool.max_connection_age_secs))
            .with_probe_on_acquire(self.pool.probe_on_acquire)
            .with_probe_timeout(Duration::from_millis(self.pool.probe_timeout_ms))
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.dsql.token_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.dsql.connect_timeout_secs)
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "dsql-pool".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            log_file: None,
            aws_region: "us-east-1".to_string(),
            dsql: DsqlSettings::default(),
            pool: PoolSettings::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
