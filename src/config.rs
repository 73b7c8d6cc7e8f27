//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `LAKEHOUSE_*` environment overrides, and
//! turns the result into the driver, credential source and manager settings
//! the client needs.

use crate::connection::{
    CredentialSource, Driver, HttpIdentityClient, IdentityConfig as HttpIdentityConfig,
    LocalFileSource, ManagerConfig, PoolOptions, PostgresDriver, SqliteDriver, SslMode,
    StaticCredentials, TokenCredentials,
};
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::Versioning;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token-based authentication; static credentials are used when absent
    #[serde(default)]
    pub identity: Option<IdentityConfig>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which store to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Postgres,
    Sqlite,
}

/// Database endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: DriverKind,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub user: String,

    pub password: Option<String>,

    /// Database file for the sqlite driver
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub ssl_mode: SslMode,

    pub ssl_root_cert: Option<PathBuf>,

    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_db_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            host: String::new(),
            port: default_db_port(),
            name: String::new(),
            user: String::new(),
            password: None,
            path: None,
            ssl_mode: SslMode::default(),
            ssl_root_cert: None,
            schema: default_schema(),
        }
    }
}

/// Identity service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub url: String,

    pub secret_name: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,

    #[serde(default = "default_identity_timeout")]
    pub request_timeout_ms: u64,
}

fn default_token_ttl() -> i64 {
    900 // 15 minutes
}

fn default_identity_timeout() -> u64 {
    5000
}

/// Pool sizing and timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    30
}

fn default_refresh_margin() -> u64 {
    60
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            query_timeout_secs: default_query_timeout(),
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

/// Catalog and versioning conventions
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Replace the curated catalog with a live listing after connecting
    #[serde(default)]
    pub refresh_on_connect: bool,

    #[serde(default = "default_migration_table")]
    pub migration_table: String,

    #[serde(default = "default_date_column")]
    pub date_column: String,

    #[serde(default = "default_updated_column")]
    pub updated_column: String,

    #[serde(default = "default_deleted_column")]
    pub deleted_column: String,
}

fn default_migration_table() -> String {
    "alembic_version".to_string()
}

fn default_date_column() -> String {
    "reference_date".to_string()
}

fn default_updated_column() -> String {
    "updated_at".to_string()
}

fn default_deleted_column() -> String {
    "deleted_at".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_on_connect: false,
            migration_table: default_migration_table(),
            date_column: default_date_column(),
            updated_column: default_updated_column(),
            deleted_column: default_deleted_column(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("lakehouse").join("config.toml")),
            Some(PathBuf::from("/etc/lakehouse/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("LAKEHOUSE_DB_HOST") {
            self.database.host = host;
        }
        if let Ok(port) = std::env::var("LAKEHOUSE_DB_PORT") {
            if let Ok(p) = port.parse() {
                self.database.port = p;
            }
        }
        if let Ok(name) = std::env::var("LAKEHOUSE_DB_NAME") {
            self.database.name = name;
        }
        if let Ok(user) = std::env::var("LAKEHOUSE_DB_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("LAKEHOUSE_DB_PASSWORD") {
            self.database.password = Some(password);
        }

        if let Ok(level) = std::env::var("LAKEHOUSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LAKEHOUSE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Credential source matching the configured driver and auth mode
    pub fn credential_source(&self) -> LakehouseResult<Arc<dyn CredentialSource>> {
        let db = &self.database;

        if db.driver == DriverKind::Sqlite {
            let path = db.path.clone().ok_or_else(|| {
                LakehouseError::Configuration("database.path is required for sqlite".to_string())
            })?;
            return Ok(Arc::new(LocalFileSource::new(path)));
        }

        if let Some(identity) = &self.identity {
            let client = Arc::new(HttpIdentityClient::new(HttpIdentityConfig {
                base_url: identity.url.clone(),
                secret_name: identity.secret_name.clone(),
                token_ttl_secs: identity.token_ttl_secs,
                request_timeout_ms: identity.request_timeout_ms,
            })?);
            let mut source = TokenCredentials::new(client.clone(), client);
            if let Some(cert) = &db.ssl_root_cert {
                source = source.root_cert(cert);
            }
            return Ok(Arc::new(source));
        }

        Ok(Arc::new(
            StaticCredentials::new(
                db.host.as_str(),
                db.port,
                db.name.as_str(),
                db.user.as_str(),
                db.password.clone().unwrap_or_default(),
            )
            .ssl(db.ssl_mode, db.ssl_root_cert.clone()),
        ))
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        match self.database.driver {
            DriverKind::Postgres => Arc::new(PostgresDriver),
            DriverKind::Sqlite => Arc::new(SqliteDriver),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            pool: PoolOptions {
                max_connections: self.pool.max_connections,
                acquire_timeout: Duration::from_secs(self.pool.acquire_timeout_secs),
            },
            connect_timeout: Duration::from_secs(self.pool.connect_timeout_secs),
            query_timeout: Duration::from_secs(self.pool.query_timeout_secs),
            refresh_margin: Duration::from_secs(self.pool.refresh_margin_secs),
        }
    }

    pub fn versioning(&self) -> Versioning {
        Versioning {
            date_column: self.catalog.date_column.clone(),
            updated_column: self.catalog.updated_column.clone(),
            deleted_column: self.catalog.deleted_column.clone(),
        }
    }

    /// Schema used for catalog listings; SQLite only has `main`
    pub fn catalog_schema(&self) -> &str {
        match self.database.driver {
            DriverKind::Postgres => &self.database.schema,
            DriverKind::Sqlite => "main",
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lakehouse={}", config.level)));

    let result = if config.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Lakehouse Configuration
#
# Environment variables override these settings:
# - LAKEHOUSE_DB_HOST
# - LAKEHOUSE_DB_PORT
# - LAKEHOUSE_DB_NAME
# - LAKEHOUSE_DB_USER
# - LAKEHOUSE_DB_PASSWORD
# - LAKEHOUSE_LOG_LEVEL
# - LAKEHOUSE_LOG_FORMAT

[database]
# Store driver: postgres or sqlite
driver = "postgres"

host = "localhost"
port = 5432
name = "lakehouse"
user = "reader"
# password = ""

# Database file, sqlite driver only
# path = "/var/lib/lakehouse/snapshot.db"

# TLS: disable, prefer, require, verify-full
ssl_mode = "prefer"
# ssl_root_cert = "/etc/ssl/certs/db-root.pem"

# Schema holding the dataset tables
schema = "public"

# Token authentication through an identity service.
# When present, host/port/name/user come from the stored secret.
# [identity]
# url = "https://identity.internal"
# secret_name = "lakehouse/reader"
# token_ttl_secs = 900
# request_timeout_ms = 5000

[pool]
max_connections = 5

# Seconds to wait for a free connection
acquire_timeout_secs = 10

# Seconds allowed for credential resolution and pool opening
connect_timeout_secs = 30

# Seconds allowed per query
query_timeout_secs = 30

# Rotate short-lived credentials this many seconds before expiry
refresh_margin_secs = 60

[catalog]
# Replace the curated table list with the store's own listing on connect
refresh_on_connect = false

# Bookkeeping table hidden from listings
migration_table = "alembic_version"

# Versioning columns
date_column = "reference_date"
updated_column = "updated_at"
deleted_column = "deleted_at"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
