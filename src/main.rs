use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

use voucher_backend::api::{build_router, AppState};
use voucher_backend::config::{env_flag, AppConfig};
use voucher_backend::database::memory::InMemoryStore;
use voucher_backend::database::Stores;
use voucher_backend::health::HealthChecker;
use voucher_backend::logging::init_tracing;
use voucher_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use voucher_backend::payments::provider::PaymentProvider;
use voucher_backend::payments::providers::{MarzPayConfig, MarzPayProvider, SandboxProvider};
use voucher_backend::payments::types::ProviderName;
use voucher_backend::services::notification::NotificationService;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// `PAYMENT_PROVIDER` picks the provider. Without MarzPay credentials in
/// `SKIP_EXTERNALS` mode the sandbox stands in.
fn select_provider(skip_externals: bool) -> anyhow::Result<Arc<dyn PaymentProvider>> {
    let requested = std::env::var("PAYMENT_PROVIDER")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.parse::<ProviderName>())
        .transpose()?
        .unwrap_or(ProviderName::Marzpay);

    let provider = match requested {
        ProviderName::Marzpay if skip_externals && !MarzPayConfig::credentials_present() => {
            warn!("⚠️  MarzPay credentials missing; using sandbox provider (SKIP_EXTERNALS=true)");
            ProviderName::Sandbox
        }
        other => other,
    };

    Ok(match provider {
        ProviderName::Marzpay => {
            let config = MarzPayConfig::from_env()?;
            info!(base_url = %config.base_url, "💳 MarzPay provider configured");
            Arc::new(MarzPayProvider::new(config)?)
        }
        ProviderName::Sandbox => {
            info!("🧪 Sandbox payment provider configured");
            Arc::new(SandboxProvider::from_env())
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting voucher payment service"
    );

    // Storage
    #[cfg(feature = "database")]
    let mut db_pool = None;
    let stores = match &config.database {
        #[cfg(feature = "database")]
        Some(db_config) => {
            info!("📊 Initializing database connection pool...");
            let pool = voucher_backend::database::init_pool_from_config(db_config)
                .await
                .map_err(|e| {
                    error!("Failed to initialize database pool: {}", e);
                    e
                })?;
            if db_config.run_migrations {
                voucher_backend::database::run_migrations(&pool).await?;
            }
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            db_pool = Some(pool.clone());
            Stores::postgres(pool)
        }
        _ => {
            info!("⏭️  Using in-memory stores (SKIP_EXTERNALS=true)");
            Stores::in_memory(Arc::new(InMemoryStore::new()))
        }
    };

    // Collaborators
    let provider = select_provider(config.skip_externals)?;
    let notifications = Arc::new(NotificationService::from_config(&config.sms)?);
    if config.sms.api_url.is_none() {
        info!("📱 SMS_API_URL not set; voucher SMS will only be logged");
    }

    #[cfg(feature = "database")]
    let health = HealthChecker::new(db_pool, stores.jobs.clone());
    #[cfg(not(feature = "database"))]
    let health = HealthChecker::new(stores.jobs.clone());

    let state = AppState::new(&config, &stores, provider, notifications, health);

    // Optional in-process ticker; the cron endpoint works either way.
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let ticker_enabled = env_flag("RECONCILER_ENABLED", true);
    let ticker_handle = match config.reconciliation.tick_interval {
        Some(interval) if ticker_enabled => {
            info!(interval_secs = interval.as_secs(), "⏱️  Starting reconciliation ticker");
            Some(tokio::spawn(
                state.worker.clone().run(interval, worker_shutdown_rx),
            ))
        }
        _ => {
            info!("⏭️  In-process ticker disabled; expecting an external scheduler on /api/cron/process-jobs");
            None
        }
    };

    info!("🛣️  Setting up application routes...");
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(
        address = %addr,
        cron_protected = config.server.cron_secret.is_some(),
        "🚀 Server listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = ticker_handle {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for reconciliation ticker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
