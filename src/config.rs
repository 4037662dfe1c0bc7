//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentLimits,
    pub sms: SmsConfig,
    pub reconciliation: ReconciliationConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// When set, the cron tick endpoint requires `Authorization: Bearer <secret>`.
    pub cron_secret: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Collection limits accepted at payment initiation
#[derive(Debug, Clone)]
pub struct PaymentLimits {
    pub min_amount: i64,
    pub max_amount: i64,
}

/// SMS gateway configuration. Without a URL the log-only sender is used.
#[derive(Debug, Clone, Default)]
pub struct SmsConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: u64, // seconds
}

/// Reconciliation worker settings
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Ticks a job may spend in `processing` before it is marked failed.
    pub max_retries: i32,
    /// Terminal jobs older than this are swept during idle ticks.
    pub job_retention: Duration,
    /// Jobs stuck in `processing` longer than this are handed back to the queue.
    pub stalled_after: Duration,
    /// Optional in-process ticker. `None` leaves scheduling to an external cron.
    pub tick_interval: Option<Duration>,
    /// Upper bound on one provider status call, worker or client poll.
    pub status_check_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_retries: 60,
            job_retention: Duration::from_secs(24 * 60 * 60),
            stalled_after: Duration::from_secs(300),
            tick_interval: None,
            status_check_timeout: Duration::from_secs(15),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_flag("SKIP_EXTERNALS", false);
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            payments: PaymentLimits::from_env()?,
            sms: SmsConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;
        self.reconciliation.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            cron_secret: env::var("CRON_SECRET").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: env_flag("RUN_MIGRATIONS", true),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for PaymentLimits {
    fn default() -> Self {
        Self {
            min_amount: 500,
            max_amount: 10_000_000,
        }
    }
}

impl PaymentLimits {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(PaymentLimits {
            min_amount: parse_or("PAYMENT_MIN_AMOUNT", defaults.min_amount)?,
            max_amount: parse_or("PAYMENT_MAX_AMOUNT", defaults.max_amount)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_amount <= 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_MIN_AMOUNT must be positive".to_string(),
            ));
        }
        if self.min_amount > self.max_amount {
            return Err(ConfigError::ValidationFailed(
                "PAYMENT_MIN_AMOUNT must be <= PAYMENT_MAX_AMOUNT".to_string(),
            ));
        }
        Ok(())
    }
}

impl SmsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SmsConfig {
            api_url: env::var("SMS_API_URL").ok().filter(|s| !s.trim().is_empty()),
            api_key: env::var("SMS_API_KEY").ok().filter(|s| !s.trim().is_empty()),
            timeout: parse_or("SMS_TIMEOUT_SECS", 10)?,
        })
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let retention_hours: u64 = parse_or(
            "RECONCILER_JOB_RETENTION_HOURS",
            defaults.job_retention.as_secs() / 3600,
        )?;
        let stalled_secs: u64 =
            parse_or("RECONCILER_STALLED_JOB_SECS", defaults.stalled_after.as_secs())?;
        let tick_interval = env::var("RECONCILER_TICK_INTERVAL_SECS")
            .ok()
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    ConfigError::InvalidValue("RECONCILER_TICK_INTERVAL_SECS".to_string())
                })
            })
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(ReconciliationConfig {
            max_retries: parse_or("RECONCILER_MAX_RETRIES", defaults.max_retries)?,
            job_retention: Duration::from_secs(retention_hours * 3600),
            stalled_after: Duration::from_secs(stalled_secs),
            tick_interval,
            status_check_timeout: Duration::from_secs(parse_or(
                "STATUS_CHECK_TIMEOUT_SECS",
                defaults.status_check_timeout.as_secs(),
            )?),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries <= 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILER_MAX_RETRIES must be positive".to_string(),
            ));
        }
        if self.stalled_after.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RECONCILER_STALLED_JOB_SECS".to_string(),
            ));
        }
        if self.status_check_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "STATUS_CHECK_TIMEOUT_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

/// Reads a boolean flag, accepting `true`/`1`/`yes` case-insensitively.
pub fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
