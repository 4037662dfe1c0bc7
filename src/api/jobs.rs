//! Scheduler and diagnostics endpoints for the job queue.

use crate::api::AppState;
use crate::database::job_repository::{JobStatus, PaymentJob};
use crate::error::{AppError, AppErrorKind, InfrastructureError, ValidationError};
use crate::middleware::error::success_response;
use crate::payments::utils::secure_eq;
use crate::services::notification::OperationalAlert;
use crate::workers::reconciliation::TickOutcome;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct DebugJobsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub total_jobs: usize,
    pub counts: BTreeMap<&'static str, usize>,
    pub jobs: Vec<PaymentJob>,
    pub recent_alerts: Vec<OperationalAlert>,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(secret) = &state.cron_secret else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if secure_eq(presented.as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::validation(ValidationError::Unauthorized {
            reason: "invalid cron secret".to_string(),
        }))
    }
}

/// Runs exactly one reconciliation tick.
pub async fn process_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &headers)?;
    let outcome: TickOutcome = state.worker.run_tick().await.map_err(|e| {
        error!(error = %e, "reconciliation tick failed");
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: e.to_string(),
            is_retryable: true,
        }))
    })?;
    Ok(success_response(outcome))
}

pub async fn debug_jobs(
    State(state): State<AppState>,
    Query(query): Query<DebugJobsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(JobStatus::from_str)
        .transpose()
        .map_err(|_| {
            AppError::validation(ValidationError::OutOfRange {
                field: "status".to_string(),
                min: None,
                max: None,
            })
        })?;

    let all = state.jobs.list_all(None).await?;
    let mut counts: BTreeMap<&'static str, usize> =
        JobStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for job in &all {
        *counts.entry(job.status.as_str()).or_default() += 1;
    }

    let jobs: Vec<PaymentJob> = match filter {
        Some(status) => all.into_iter().filter(|j| j.status == status).collect(),
        None => all,
    };
    Ok(success_response(QueueSnapshot {
        total_jobs: counts.values().sum(),
        counts,
        jobs,
        recent_alerts: state.notifications.recent_alerts().await,
    }))
}
