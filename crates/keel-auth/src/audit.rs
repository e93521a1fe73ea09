//! Best-effort audit recording.

use std::sync::Arc;
use std::time::Duration;

use keel_core::clock::Clock;
use keel_core::error::KeelResult;
use keel_core::models::audit::{AuditLogEntry, CreateAuditLogEntry};
use keel_core::repository::{AuditLogFilter, AuditLogRepository, PaginatedResult, Pagination};
use tracing::warn;
use uuid::Uuid;

/// Wraps an [`AuditLogRepository`] so that a failed or slow append is
/// logged and never reaches the caller.
pub struct AuditTrail<A> {
    repo: A,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl<A: AuditLogRepository> AuditTrail<A> {
    pub fn new(repo: A, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            repo,
            clock,
            timeout,
        }
    }

    pub async fn record(
        &self,
        actor_id: Option<Uuid>,
        action: &str,
        target_type: &str,
        target_id: impl Into<String>,
        payload: serde_json::Value,
    ) {
        let entry = CreateAuditLogEntry {
            actor_id,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.into(),
            payload,
            created_at: self.clock.now(),
        };
        match tokio::time::timeout(self.timeout, self.repo.append(entry)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(action, error = %e, "Audit write failed"),
            Err(_) => warn!(action, "Audit write timed out"),
        }
    }

    pub async fn query(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> KeelResult<PaginatedResult<AuditLogEntry>> {
        self.repo.list(filter, pagination).await
    }
}
