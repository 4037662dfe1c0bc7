use crate::config::ReconciliationConfig;
use crate::database::error::DatabaseError;
use crate::database::job_repository::{JobStatus, JobUpdate, PaymentJob};
use crate::database::payment_repository::{FailureReason, PaymentStatus, TerminalUpdate};
use crate::database::repository::{JobQueue, PaymentRecordStore};
use crate::database::Stores;
use crate::logging::mask_phone;
use crate::services::notification::{NotificationService, OperationalAlert};
use crate::services::status_adapter::{InternalStatus, ProviderStatusAdapter};
use crate::services::voucher_assignment::{FulfillmentOutcome, VoucherAssignmentService};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Failures that stop a tick. The job involved stays in the queue and is
/// picked up again once storage recovers.
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

/// How a job left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    VoucherIssued,
    /// A client poll issued the voucher first; the SMS was sent again.
    VoucherResent,
    NoVoucherAvailable,
    ProviderRejected,
    /// The payment was already failed, e.g. the client gave up.
    AlreadyFailed,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Idle {
        swept: u64,
        requeued: u64,
    },
    /// Job retired.
    Completed {
        job_id: Uuid,
        reference: String,
        resolution: Resolution,
    },
    /// Job back in `pending` for a later tick.
    Requeued {
        job_id: Uuid,
        reference: String,
        attempt: i32,
        reason: Option<String>,
    },
    /// Job marked `failed` and kept for manual inspection.
    Failed {
        job_id: Uuid,
        reference: String,
        attempt: i32,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct ReconciliationWorker {
    payments: Arc<dyn PaymentRecordStore>,
    jobs: Arc<dyn JobQueue>,
    adapter: Arc<ProviderStatusAdapter>,
    assignment: Arc<VoucherAssignmentService>,
    notifications: Arc<NotificationService>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(
        stores: &Stores,
        adapter: Arc<ProviderStatusAdapter>,
        assignment: Arc<VoucherAssignmentService>,
        notifications: Arc<NotificationService>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            payments: stores.payments.clone(),
            jobs: stores.jobs.clone(),
            adapter,
            assignment,
            notifications,
            config,
        }
    }

    /// In-process ticker. External schedulers call [`Self::run_tick`] instead.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            "payment reconciliation worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("payment reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_tick().await {
                        warn!(error = %e, "reconciliation tick failed");
                    }
                }
            }
        }

        info!("payment reconciliation worker stopped");
    }

    /// Processes at most one job.
    pub async fn run_tick(&self) -> Result<TickOutcome, ReconciliationError> {
        let Some(job) = self.jobs.dequeue_oldest_pending().await else {
            return Ok(self.housekeeping().await);
        };

        let attempt = job.retry_count + 1;
        self.jobs
            .mark_status(job.id, JobStatus::Processing, JobUpdate::default().retry_count(attempt))
            .await?;

        let record = match self.payments.get(&job.reference).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                return self
                    .fail_job(&job, attempt, "payment record not found".to_string())
                    .await;
            }
            Err(e) => return self.keep_waiting(&job, attempt, e.to_string(), false).await,
        };

        if record.status == PaymentStatus::Failed {
            if let Some(reason) = record.failure_reason.filter(FailureReason::needs_manual_review) {
                return self
                    .fail_job(&job, attempt, format!("payment failed with {reason}; needs manual review"))
                    .await;
            }
            info!(
                job_id = %job.id,
                reference = %job.reference,
                reason = ?record.failure_reason,
                "payment already failed; retiring job without provider check"
            );
            return self.complete(&job, Resolution::AlreadyFailed).await;
        }

        let check = self.adapter.check_status(&job.transaction_uuid).await;
        match check.status {
            InternalStatus::Successful => {
                let outcome = match self
                    .assignment
                    .fulfill_payment(&record, check.confirmed_amount)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => return self.keep_waiting(&job, attempt, e.to_string(), false).await,
                };
                self.after_fulfillment(&job, attempt, outcome).await
            }
            InternalStatus::Failed => {
                let outcome = self
                    .payments
                    .transition_to_terminal(
                        &job.reference,
                        TerminalUpdate::failed(FailureReason::ProviderRejected),
                    )
                    .await;
                match outcome {
                    Ok(outcome) => {
                        if !outcome.applied && outcome.record.status == PaymentStatus::Successful {
                            warn!(
                                reference = %job.reference,
                                "provider reports failure for a payment already fulfilled"
                            );
                        }
                        self.complete(&job, Resolution::ProviderRejected).await
                    }
                    Err(e) => self.keep_waiting(&job, attempt, e.to_string(), false).await,
                }
            }
            InternalStatus::Processing => {
                let reason = check
                    .reason
                    .unwrap_or_else(|| "provider still processing".to_string());
                self.keep_waiting(&job, attempt, reason, check.hard_error).await
            }
        }
    }

    async fn after_fulfillment(
        &self,
        job: &PaymentJob,
        attempt: i32,
        outcome: FulfillmentOutcome,
    ) -> Result<TickOutcome, ReconciliationError> {
        match outcome {
            FulfillmentOutcome::Issued { .. } => self.complete(job, Resolution::VoucherIssued).await,
            FulfillmentOutcome::AlreadyIssued { record, voucher } => {
                let _ = self
                    .notifications
                    .send_voucher(&record.phone, &voucher, &record.reference, true)
                    .await;
                self.complete(job, Resolution::VoucherResent).await
            }
            FulfillmentOutcome::NoVoucherAvailable { .. } => {
                self.complete(job, Resolution::NoVoucherAvailable).await
            }
            FulfillmentOutcome::AmountMismatch { record, confirmed } => {
                self.fail_job(
                    job,
                    attempt,
                    format!(
                        "amount mismatch: requested {}, confirmed {}",
                        record.amount, confirmed
                    ),
                )
                .await
            }
            FulfillmentOutcome::AlreadyFailed { .. } => {
                self.complete(job, Resolution::AlreadyFailed).await
            }
        }
    }

    async fn complete(
        &self,
        job: &PaymentJob,
        resolution: Resolution,
    ) -> Result<TickOutcome, ReconciliationError> {
        self.jobs.retire(job.id).await?;
        info!(
            job_id = %job.id,
            reference = %job.reference,
            phone = %mask_phone(&job.phone),
            ?resolution,
            "payment job retired"
        );
        Ok(TickOutcome::Completed {
            job_id: job.id,
            reference: job.reference.clone(),
            resolution,
        })
    }

    /// Re-queues the job, or fails it once the budget is spent or the error
    /// cannot be fixed by retrying.
    async fn keep_waiting(
        &self,
        job: &PaymentJob,
        attempt: i32,
        reason: String,
        hard_error: bool,
    ) -> Result<TickOutcome, ReconciliationError> {
        if hard_error {
            return self
                .fail_job(job, attempt, format!("provider error: {}", reason))
                .await;
        }
        if attempt >= job.max_retries {
            self.notifications
                .alert(OperationalAlert::RetryExhausted {
                    reference: job.reference.clone(),
                    job_id: job.id.to_string(),
                    attempts: attempt,
                })
                .await;
            return self
                .fail_job(
                    job,
                    attempt,
                    format!("retry budget exhausted after {} attempts: {}", attempt, reason),
                )
                .await;
        }

        self.jobs
            .mark_status(job.id, JobStatus::Pending, JobUpdate::default().error(reason.clone()))
            .await?;
        info!(
            job_id = %job.id,
            reference = %job.reference,
            attempt,
            max_retries = job.max_retries,
            reason = %reason,
            "payment still processing; job requeued"
        );
        Ok(TickOutcome::Requeued {
            job_id: job.id,
            reference: job.reference.clone(),
            attempt,
            reason: Some(reason),
        })
    }

    async fn fail_job(
        &self,
        job: &PaymentJob,
        attempt: i32,
        reason: String,
    ) -> Result<TickOutcome, ReconciliationError> {
        self.jobs
            .mark_status(job.id, JobStatus::Failed, JobUpdate::default().error(reason.clone()))
            .await?;
        error!(
            job_id = %job.id,
            reference = %job.reference,
            attempt,
            reason = %reason,
            "payment job failed; kept for manual inspection"
        );
        Ok(TickOutcome::Failed {
            job_id: job.id,
            reference: job.reference.clone(),
            attempt,
            reason,
        })
    }

    async fn housekeeping(&self) -> TickOutcome {
        let now = Utc::now();
        let retention =
            chrono::Duration::from_std(self.config.job_retention).unwrap_or(chrono::Duration::hours(24));
        let stalled =
            chrono::Duration::from_std(self.config.stalled_after).unwrap_or(chrono::Duration::minutes(5));

        let swept = self.jobs.sweep_stale(now - retention).await.unwrap_or_else(|e| {
            warn!(error = %e, "stale job sweep failed");
            0
        });
        let requeued = self.jobs.requeue_stalled(now - stalled).await.unwrap_or_else(|e| {
            warn!(error = %e, "stalled job requeue failed");
            0
        });
        if swept > 0 || requeued > 0 {
            info!(swept, requeued, "job queue housekeeping");
        }
        TickOutcome::Idle { swept, requeued }
    }
}
