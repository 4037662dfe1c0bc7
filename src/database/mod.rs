pub mod error;
pub mod job_repository;
pub mod memory;
pub mod payment_repository;
pub mod repository;
pub mod transaction_repository;
pub mod voucher_repository;

use std::sync::Arc;

use self::memory::InMemoryStore;
use self::repository::{JobQueue, PaymentRecordStore, TransactionLog, VoucherInventory};

#[cfg(feature = "database")]
use self::error::DatabaseError;
#[cfg(feature = "database")]
use crate::config::DatabaseConfig;
#[cfg(feature = "database")]
use sqlx::postgres::PgPoolOptions;
#[cfg(feature = "database")]
use sqlx::PgPool;
#[cfg(feature = "database")]
use std::time::Duration;
#[cfg(feature = "database")]
use tracing::{error as log_error, info, warn};

/// The four collections the reconciliation core works against.
#[derive(Clone)]
pub struct Stores {
    pub payments: Arc<dyn PaymentRecordStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub vouchers: Arc<dyn VoucherInventory>,
    pub transactions: Arc<dyn TransactionLog>,
}

impl Stores {
    /// All collections backed by one shared in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            payments: store.clone(),
            jobs: store.clone(),
            vouchers: store.clone(),
            transactions: store,
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: PgPool) -> Self {
        use self::job_repository::PaymentJobRepository;
        use self::payment_repository::PaymentRecordRepository;
        use self::transaction_repository::TransactionLogRepository;
        use self::voucher_repository::VoucherRepository;

        Self {
            payments: Arc::new(PaymentRecordRepository::new(pool.clone())),
            jobs: Arc::new(PaymentJobRepository::new(pool.clone())),
            vouchers: Arc::new(VoucherRepository::new(pool.clone())),
            transactions: Arc::new(TransactionLogRepository::new(pool)),
        }
    }
}

/// Database pool configuration
#[cfg(feature = "database")]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

#[cfg(feature = "database")]
impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialize the database connection pool
#[cfg(feature = "database")]
pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<PgPool, DatabaseError> {
    let config = config.unwrap_or_default();

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connection_timeout = ?config.connection_timeout,
        "Initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

/// Initialize the database pool from application configuration
#[cfg(feature = "database")]
pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        min_connections: config.min_connections,
        connection_timeout: Duration::from_secs(config.connection_timeout),
        idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
        max_lifetime: Duration::from_secs(1800),
    };

    init_pool(&config.url, Some(pool_config)).await
}

/// Apply the bundled schema migrations.
#[cfg(feature = "database")]
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        log_error!("Migration failed: {}", e);
        DatabaseError::new(error::DatabaseErrorKind::Unknown {
            message: e.to_string(),
        })
    })?;
    info!("Database migrations applied");
    Ok(())
}

/// Connection pool health check
#[cfg(feature = "database")]
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!("Health check failed: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    Ok(())
}
