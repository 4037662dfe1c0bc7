//! HTTP surface: shared state and the router.

pub mod jobs;
pub mod payments;

use crate::config::AppConfig;
use crate::database::repository::JobQueue;
use crate::database::Stores;
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::payments::provider::PaymentProvider;
use crate::services::notification::NotificationService;
use crate::services::payment_initiation::PaymentInitiationService;
use crate::services::status_adapter::ProviderStatusAdapter;
use crate::services::status_merge::PaymentStatusService;
use crate::services::voucher_assignment::VoucherAssignmentService;
use crate::workers::reconciliation::ReconciliationWorker;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub initiation: Arc<PaymentInitiationService>,
    pub status: Arc<PaymentStatusService>,
    pub worker: Arc<ReconciliationWorker>,
    pub jobs: Arc<dyn JobQueue>,
    pub notifications: Arc<NotificationService>,
    pub health: HealthChecker,
    /// Bearer secret for the tick endpoint, if configured.
    pub cron_secret: Option<String>,
}

impl AppState {
    /// Wires the services over one set of stores and one provider.
    pub fn new(
        config: &AppConfig,
        stores: &Stores,
        provider: Arc<dyn PaymentProvider>,
        notifications: Arc<NotificationService>,
        health: HealthChecker,
    ) -> Self {
        let adapter = Arc::new(ProviderStatusAdapter::new(
            provider.clone(),
            config.reconciliation.status_check_timeout,
        ));
        let assignment = Arc::new(VoucherAssignmentService::new(stores, notifications.clone()));
        let initiation = Arc::new(PaymentInitiationService::new(
            stores,
            provider,
            config.payments.clone(),
            config.reconciliation.max_retries,
        ));
        let status = Arc::new(PaymentStatusService::new(
            stores,
            adapter.clone(),
            assignment.clone(),
            notifications.clone(),
        ));
        let worker = Arc::new(ReconciliationWorker::new(
            stores,
            adapter,
            assignment,
            notifications.clone(),
            config.reconciliation.clone(),
        ));

        Self {
            initiation,
            status,
            worker,
            jobs: stores.jobs.clone(),
            notifications,
            health,
            cron_secret: config.server.cron_secret.clone(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/api/pay", post(payments::initiate_payment))
        .route("/api/check-payment", post(payments::check_payment))
        .route("/api/check-payment-by-phone", post(payments::check_payment_by_phone))
        .route("/api/payment-timeout", post(payments::payment_timeout))
        .route("/api/resend-voucher-sms", post(payments::resend_voucher_sms))
        .route(
            "/api/check-voucher-availability",
            post(payments::check_voucher_availability),
        )
        .route(
            "/api/cron/process-jobs",
            get(jobs::process_jobs).post(jobs::process_jobs),
        )
        .route("/api/debug-jobs", get(jobs::debug_jobs))
        .with_state(state)
}

async fn root() -> &'static str {
    "WiFi voucher payment service"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let status = state.health.check_health().await;
    if status.status == HealthState::Unhealthy {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)))
    } else {
        Ok(Json(status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let result = health(state).await;
    if result.is_ok() {
        info!("✅ Readiness check passed");
    }
    result
}

/// Liveness probe - the process is up
async fn liveness() -> &'static str {
    "OK"
}
