//! Shared wiring for integration tests: in-memory stores, the sandbox
//! provider and a log-only SMS sender behind a real `AppState`.

#![allow(dead_code)]

use std::sync::Arc;

use voucher_backend::api::{build_router, AppState};
use voucher_backend::config::{
    AppConfig, LogFormat, LoggingConfig, PaymentLimits, ReconciliationConfig, ServerConfig,
    SmsConfig,
};
use voucher_backend::database::memory::InMemoryStore;
use voucher_backend::database::repository::VoucherInventory;
use voucher_backend::database::Stores;
use voucher_backend::health::HealthChecker;
use voucher_backend::payments::providers::SandboxProvider;
use voucher_backend::services::notification::{LogSmsSender, NotificationService};

pub const PHONE: &str = "0700123456";
pub const NORMALIZED_PHONE: &str = "+256700123456";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub sandbox: Arc<SandboxProvider>,
    pub sms: Arc<LogSmsSender>,
    pub notifications: Arc<NotificationService>,
    pub state: AppState,
}

impl Harness {
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    pub async fn stock(&self, amount: i64, codes: &[&str]) {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        self.store.add_vouchers(amount, &codes).await.unwrap();
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cron_secret: None,
        },
        database: None,
        logging: LoggingConfig {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        },
        payments: PaymentLimits::default(),
        sms: SmsConfig::default(),
        reconciliation: ReconciliationConfig::default(),
        skip_externals: true,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: AppConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let stores = Stores::in_memory(store.clone());
    let sandbox = Arc::new(SandboxProvider::default());
    let sms = Arc::new(LogSmsSender::new());
    let notifications = Arc::new(NotificationService::new(sms.clone()));

    #[cfg(feature = "database")]
    let health = HealthChecker::new(None, stores.jobs.clone());
    #[cfg(not(feature = "database"))]
    let health = HealthChecker::new(stores.jobs.clone());

    let state = AppState::new(
        &config,
        &stores,
        sandbox.clone(),
        notifications.clone(),
        health,
    );

    Harness {
        store,
        sandbox,
        sms,
        notifications,
        state,
    }
}
