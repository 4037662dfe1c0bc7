//! Health check module
//! Reports the state of storage and the reconciliation queue

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::job_repository::JobStatus;
use crate::database::repository::JobQueue;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    fn record(&mut self, name: &str, component: ComponentHealth) {
        match component.status {
            ComponentState::Down => self.status = HealthState::Unhealthy,
            ComponentState::Warning if self.status == HealthState::Healthy => {
                self.status = HealthState::Degraded
            }
            _ => {}
        }
        self.checks.insert(name.to_string(), component);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    jobs: Arc<dyn JobQueue>,
}

impl HealthChecker {
    #[cfg(feature = "database")]
    pub fn new(db_pool: Option<sqlx::PgPool>, jobs: Arc<dyn JobQueue>) -> Self {
        Self { db_pool, jobs }
    }

    #[cfg(not(feature = "database"))]
    pub fn new(jobs: Arc<dyn JobQueue>) -> Self {
        Self { jobs }
    }

    /// Database and queue checks run concurrently
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let (database, queue) =
            futures::future::join(self.database_component(), self.queue_component()).await;
        health_status.record("database", database);
        health_status.record("job_queue", queue);

        match health_status.status {
            HealthState::Healthy => info!("Health check: OK"),
            HealthState::Degraded => warn!("Health check: degraded"),
            HealthState::Unhealthy => error!("Health check: unhealthy"),
        }
        health_status
    }

    #[cfg(feature = "database")]
    async fn database_component(&self) -> ComponentHealth {
        let Some(pool) = &self.db_pool else {
            return in_memory_component();
        };
        match timeout(Duration::from_secs(5), check_database_health(pool)).await {
            Ok(Ok(response_time)) => ComponentHealth::up(Some(response_time)),
            Ok(Err(e)) => {
                error!("Database health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Database health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }

    #[cfg(not(feature = "database"))]
    async fn database_component(&self) -> ComponentHealth {
        in_memory_component()
    }

    /// Failed jobs need an operator, so they degrade the service.
    async fn queue_component(&self) -> ComponentHealth {
        let start = Instant::now();
        match timeout(Duration::from_secs(5), self.jobs.list_all(None)).await {
            Ok(Ok(jobs)) => {
                let elapsed = start.elapsed().as_millis();
                let pending = jobs.iter().filter(|j| j.status == JobStatus::Pending).count();
                let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
                let details = format!("{} pending, {} failed", pending, failed);
                if failed > 0 {
                    ComponentHealth::warning(Some(elapsed), Some(details))
                } else {
                    ComponentHealth {
                        details: Some(details),
                        ..ComponentHealth::up(Some(elapsed))
                    }
                }
            }
            Ok(Err(e)) => ComponentHealth::down(Some(e.to_string())),
            Err(_) => ComponentHealth::down(Some("Timeout".to_string())),
        }
    }
}

fn in_memory_component() -> ComponentHealth {
    ComponentHealth {
        details: Some("in-memory store".to_string()),
        ..ComponentHealth::up(None)
    }
}

#[cfg(feature = "database")]
pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, crate::database::error::DatabaseError> {
    let start = Instant::now();
    crate::database::health_check(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;

    fn checker(store: Arc<InMemoryStore>) -> HealthChecker {
        #[cfg(feature = "database")]
        return HealthChecker::new(None, store);
        #[cfg(not(feature = "database"))]
        return HealthChecker::new(store);
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));

        let warning_health = ComponentHealth::warning(Some(500), Some("2 failed".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
    }

    #[tokio::test]
    async fn empty_in_memory_service_is_healthy() {
        let status = checker(Arc::new(InMemoryStore::new())).check_health().await;
        assert!(status.is_healthy());
        assert!(status.checks.contains_key("database"));
        assert!(status.checks.contains_key("job_queue"));
    }

    #[tokio::test]
    async fn failed_jobs_degrade_health() {
        let store = Arc::new(InMemoryStore::new());
        let job = store.enqueue("ref-1", "+256700000001", 1000, "tx-1", 60).await.unwrap();
        store
            .mark_status(job.id, JobStatus::Failed, Default::default())
            .await
            .unwrap();

        let status = checker(store).check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
    }

    #[tokio::test]
    async fn storage_outage_is_unhealthy() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);

        let status = checker(store).check_health().await;
        assert_eq!(status.status, HealthState::Unhealthy);
    }
}
