//! Configuration system for the RTO document service.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `RTO_SERVER_HOST` / `RTO_SERVER_PORT` - Bind address
//! - `RTO_DATABASE_TYPE` - `sqlite` or `postgres`
//! - `RTO_DATABASE_URL` - Connection URL (routed by scheme)
//! - `RTO_DATABASE_MAX_CONNECTIONS` - Pool size
//! - `RTO_LOG_LEVEL` - trace, debug, info, warn, error
//! - `RTO_ERROR_LOG_DIR` - Directory for daily warning/error log files
//! - `RTO_JWT_SECRET` / `RTO_JWT_ISSUER` / `RTO_JWT_AUDIENCE`
//! - `RTO_TOKEN_EXPIRATION_SECS` - Session lifetime
//! - `RTO_COOKIE_SECURE` - Add `Secure` to the session cookie
//! - `RTO_JOBS_ENABLED` / `RTO_STATUS_CRON` - Status reconciliation schedule
//! - `RTO_UTC_OFFSET_MINUTES` - Offset used to compute "today"

use config::{Config, ConfigBuilder};
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::documents::DocumentKind;
use crate::errors::{RtoError, RtoResult};

/// Global configuration singleton.
static CONFIG: OnceLock<RtoConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RtoConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub jobs: JobsConfig,
    pub lifecycle: LifecycleConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    pub sqlite_url: String,
    pub postgres_url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://rto.db?mode=rwc".to_string(),
            postgres_url: "postgres://localhost/rto".to_string(),
            max_connections: 5,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Directory for `error-YYYY-MM-DD.log` files. Empty disables the file sink.
    pub error_log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            error_log_dir: "logs".to_string(),
        }
    }
}

/// Session authentication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWT secret key (use `env:VAR_NAME` to read from environment)
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    /// Session lifetime in seconds (default: 12 hours)
    pub token_expiration_secs: u64,
    pub cookie_name: String,
    /// Mark the session cookie `Secure` (HTTPS only)
    pub cookie_secure: bool,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: "rto-docs".to_string(),
            jwt_audience: "rto-desk".to_string(),
            token_expiration_secs: 43_200,
            cookie_name: "rto_session".to_string(),
            cookie_secure: false,
            bcrypt_cost: 12,
        }
    }
}

/// Scheduled job configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    /// Cron expression (with seconds) for status reconciliation
    pub status_cron: String,
    /// Reconcile once as soon as the server starts
    pub run_on_startup: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 18:30 UTC is midnight IST
            status_cron: "0 30 18 * * *".to_string(),
            run_on_startup: true,
        }
    }
}

/// Lookahead windows and the offset that defines "today".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub utc_offset_minutes: i32,
    pub insurance_window_days: u32,
    pub puc_window_days: u32,
    pub temporary_permit_window_days: u32,
    pub tax_window_days: u32,
    pub fitness_window_days: u32,
    pub national_permit_window_days: u32,
    pub cg_permit_window_days: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 330,
            insurance_window_days: DocumentKind::Insurance.default_window_days(),
            puc_window_days: DocumentKind::Puc.default_window_days(),
            temporary_permit_window_days: DocumentKind::TemporaryPermit.default_window_days(),
            tax_window_days: DocumentKind::Tax.default_window_days(),
            fitness_window_days: DocumentKind::Fitness.default_window_days(),
            national_permit_window_days: DocumentKind::NationalPermit.default_window_days(),
            cg_permit_window_days: DocumentKind::CgPermit.default_window_days(),
        }
    }
}

impl LifecycleConfig {
    /// Lookahead window configured for `kind`.
    pub fn window_days(&self, kind: DocumentKind) -> u32 {
        match kind {
            DocumentKind::Insurance => self.insurance_window_days,
            DocumentKind::Puc => self.puc_window_days,
            DocumentKind::TemporaryPermit => self.temporary_permit_window_days,
            DocumentKind::Tax => self.tax_window_days,
            DocumentKind::Fitness => self.fitness_window_days,
            DocumentKind::NationalPermit => self.national_permit_window_days,
            DocumentKind::CgPermit => self.cg_permit_window_days,
        }
    }

    /// Today's date at the configured offset.
    pub fn today(&self) -> chrono::NaiveDate {
        crate::lifecycle::today_at_offset(self.utc_offset_minutes)
    }
}

fn config_err(e: config::ConfigError) -> RtoError {
    RtoError::ConfigError(e.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

type Builder = ConfigBuilder<config::builder::DefaultState>;

fn with_defaults(builder: Builder) -> RtoResult<Builder> {
    let lifecycle = LifecycleConfig::default();
    let mut builder = builder
        .set_default("server.host", "127.0.0.1")
        .map_err(config_err)?
        .set_default("server.port", 8080)
        .map_err(config_err)?
        .set_default("database.db_type", "sqlite")
        .map_err(config_err)?
        .set_default("database.sqlite_url", "sqlite://rto.db?mode=rwc")
        .map_err(config_err)?
        .set_default("database.postgres_url", "postgres://localhost/rto")
        .map_err(config_err)?
        .set_default("database.max_connections", 5)
        .map_err(config_err)?
        .set_default("logging.level", "info")
        .map_err(config_err)?
        .set_default("logging.error_log_dir", "logs")
        .map_err(config_err)?
        .set_default("auth.jwt_secret", "")
        .map_err(config_err)?
        .set_default("auth.jwt_issuer", "rto-docs")
        .map_err(config_err)?
        .set_default("auth.jwt_audience", "rto-desk")
        .map_err(config_err)?
        .set_default("auth.token_expiration_secs", 43_200)
        .map_err(config_err)?
        .set_default("auth.cookie_name", "rto_session")
        .map_err(config_err)?
        .set_default("auth.cookie_secure", false)
        .map_err(config_err)?
        .set_default("auth.bcrypt_cost", 12)
        .map_err(config_err)?
        .set_default("jobs.enabled", true)
        .map_err(config_err)?
        .set_default("jobs.status_cron", "0 30 18 * * *")
        .map_err(config_err)?
        .set_default("jobs.run_on_startup", true)
        .map_err(config_err)?
        .set_default("lifecycle.utc_offset_minutes", i64::from(lifecycle.utc_offset_minutes))
        .map_err(config_err)?;

    for kind in DocumentKind::ALL {
        builder = builder
            .set_default(window_key(kind), i64::from(lifecycle.window_days(kind)))
            .map_err(config_err)?;
    }
    Ok(builder)
}

fn window_key(kind: DocumentKind) -> String {
    let field = match kind {
        DocumentKind::Insurance => "insurance",
        DocumentKind::Puc => "puc",
        DocumentKind::TemporaryPermit => "temporary_permit",
        DocumentKind::Tax => "tax",
        DocumentKind::Fitness => "fitness",
        DocumentKind::NationalPermit => "national_permit",
        DocumentKind::CgPermit => "cg_permit",
    };
    format!("lifecycle.{field}_window_days")
}

fn with_env_overrides(builder: Builder) -> RtoResult<Builder> {
    builder
        .set_override_option("server.host", env::var("RTO_SERVER_HOST").ok())
        .map_err(config_err)?
        .set_override_option("server.port", env_parsed::<i64>("RTO_SERVER_PORT"))
        .map_err(config_err)?
        .set_override_option("database.db_type", env::var("RTO_DATABASE_TYPE").ok())
        .map_err(config_err)?
        .set_override_option(
            "database.sqlite_url",
            env::var("RTO_DATABASE_URL")
                .ok()
                .filter(|url| url.starts_with("sqlite")),
        )
        .map_err(config_err)?
        .set_override_option(
            "database.postgres_url",
            env::var("RTO_DATABASE_URL")
                .ok()
                .filter(|url| url.starts_with("postgres")),
        )
        .map_err(config_err)?
        .set_override_option(
            "database.max_connections",
            env_parsed::<i64>("RTO_DATABASE_MAX_CONNECTIONS"),
        )
        .map_err(config_err)?
        .set_override_option("logging.level", env::var("RTO_LOG_LEVEL").ok())
        .map_err(config_err)?
        .set_override_option("logging.error_log_dir", env::var("RTO_ERROR_LOG_DIR").ok())
        .map_err(config_err)?
        .set_override_option("auth.jwt_secret", env::var("RTO_JWT_SECRET").ok())
        .map_err(config_err)?
        .set_override_option("auth.jwt_issuer", env::var("RTO_JWT_ISSUER").ok())
        .map_err(config_err)?
        .set_override_option("auth.jwt_audience", env::var("RTO_JWT_AUDIENCE").ok())
        .map_err(config_err)?
        .set_override_option(
            "auth.token_expiration_secs",
            env_parsed::<i64>("RTO_TOKEN_EXPIRATION_SECS"),
        )
        .map_err(config_err)?
        .set_override_option("auth.cookie_secure", env_parsed::<bool>("RTO_COOKIE_SECURE"))
        .map_err(config_err)?
        .set_override_option("jobs.enabled", env_parsed::<bool>("RTO_JOBS_ENABLED"))
        .map_err(config_err)?
        .set_override_option("jobs.status_cron", env::var("RTO_STATUS_CRON").ok())
        .map_err(config_err)?
        .set_override_option(
            "lifecycle.utc_offset_minutes",
            env_parsed::<i64>("RTO_UTC_OFFSET_MINUTES"),
        )
        .map_err(config_err)
}

impl RtoConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> RtoResult<Self> {
        let builder = with_defaults(Config::builder())?
            .add_source(config::File::with_name("config").required(false));
        let builder = with_env_overrides(builder)?;

        let settings = builder
            .build()
            .map_err(|e| RtoError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| RtoError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RtoResult<()> {
        if self.server.port == 0 {
            return Err(RtoError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(RtoError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        if self.database.max_connections == 0 {
            return Err(RtoError::ConfigError(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(RtoError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(RtoError::ConfigError(
                "auth.jwt_secret is required (set RTO_JWT_SECRET)".to_string(),
            ));
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(RtoError::ConfigError(format!(
                "auth.bcrypt_cost must be between 4 and 31, got {}",
                self.auth.bcrypt_cost
            )));
        }

        if self.auth.cookie_name.is_empty() {
            return Err(RtoError::ConfigError(
                "auth.cookie_name cannot be empty".to_string(),
            ));
        }

        if self.lifecycle.utc_offset_minutes.unsigned_abs() >= 24 * 60 {
            return Err(RtoError::ConfigError(format!(
                "lifecycle.utc_offset_minutes must be within +/-1439, got {}",
                self.lifecycle.utc_offset_minutes
            )));
        }

        for kind in DocumentKind::ALL {
            if self.lifecycle.window_days(kind) == 0 {
                return Err(RtoError::ConfigError(format!(
                    "{} must be greater than 0",
                    window_key(kind)
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// Loads and validates on first access, then caches.
pub fn get_config() -> RtoResult<&'static RtoConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = RtoConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is fine.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| RtoError::ConfigError("configuration was not stored".to_string()))
}

/// Initialize configuration explicitly so errors surface at startup.
pub fn init_config() -> RtoResult<&'static RtoConfig> {
    get_config()
}
