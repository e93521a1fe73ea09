//! SurrealDB implementation of [`AuditLogRepository`].

use chrono::{DateTime, Utc};
use keel_core::error::KeelResult;
use keel_core::models::audit::{AuditLogEntry, CreateAuditLogEntry};
use keel_core::repository::{AuditLogFilter, AuditLogRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::CountRow;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct AuditRow {
    actor_id: Option<String>,
    action: String,
    target_type: String,
    target_id: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AuditRowWithId {
    record_id: String,
    actor_id: Option<String>,
    action: String,
    target_type: String,
    target_id: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

fn parse_actor(actor_id: Option<String>) -> Result<Option<Uuid>, DbError> {
    actor_id
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| DbError::Decode(format!("invalid actor UUID: {e}")))
}

impl AuditRow {
    fn into_entry(self, id: Uuid) -> Result<AuditLogEntry, DbError> {
        Ok(AuditLogEntry {
            id,
            actor_id: parse_actor(self.actor_id)?,
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id,
            payload: self.payload,
            created_at: self.created_at,
        })
    }
}

impl AuditRowWithId {
    fn try_into_entry(self) -> Result<AuditLogEntry, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::Decode(format!("invalid UUID: {e}")))?;
        Ok(AuditLogEntry {
            id,
            actor_id: parse_actor(self.actor_id)?,
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id,
            payload: self.payload,
            created_at: self.created_at,
        })
    }
}

/// The `payload` column is an object; anything else is wrapped.
fn payload_object(payload: serde_json::Value) -> serde_json::Value {
    match payload {
        serde_json::Value::Object(_) => payload,
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => serde_json::json!({ "value": other }),
    }
}

/// SurrealDB implementation of the audit log. Append-only.
#[derive(Clone)]
pub struct SurrealAuditLogRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditLogRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AuditLogRepository for SurrealAuditLogRepository<C> {
    async fn append(&self, input: CreateAuditLogEntry) -> KeelResult<AuditLogEntry> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('audit_log', $id) SET \
                 actor_id = $actor_id, action = $action, \
                 target_type = $target_type, target_id = $target_id, \
                 payload = $payload, created_at = $created_at",
            )
            .bind(("id", id_str.clone()))
            .bind(("actor_id", input.actor_id.map(|a| a.to_string())))
            .bind(("action", input.action))
            .bind(("target_type", input.target_type))
            .bind(("target_id", input.target_id))
            .bind(("payload", payload_object(input.payload)))
            .bind(("created_at", input.created_at))
            .await
            .map_err(|e| DbError::classify(e, "audit_log"))?;

        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "audit_log"))?;

        let rows: Vec<AuditRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "audit_log".into(),
            id: id_str,
        })?;

        Ok(row.into_entry(id)?)
    }

    async fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> KeelResult<PaginatedResult<AuditLogEntry>> {
        let pagination = pagination.clamped();

        let mut conditions = Vec::new();
        if filter.actor_id.is_some() {
            conditions.push("actor_id = $actor_id");
        }
        if filter.action.is_some() {
            conditions.push("action = $action");
        }
        if filter.target_type.is_some() {
            conditions.push("target_type = $target_type");
        }
        if filter.target_id.is_some() {
            conditions.push("target_id = $target_id");
        }
        if filter.from.is_some() {
            conditions.push("created_at >= $from");
        }
        if filter.to.is_some() {
            conditions.push("created_at < $to");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        // Statement 0 counts, statement 1 fetches the page.
        let query = format!(
            "SELECT count() AS total FROM audit_log{where_clause} GROUP ALL; \
             SELECT meta::id(id) AS record_id, * FROM audit_log{where_clause} \
             ORDER BY created_at DESC LIMIT $limit START $offset;"
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset));
        if let Some(actor_id) = filter.actor_id {
            builder = builder.bind(("actor_id", actor_id.to_string()));
        }
        if let Some(action) = filter.action {
            builder = builder.bind(("action", action));
        }
        if let Some(target_type) = filter.target_type {
            builder = builder.bind(("target_type", target_type));
        }
        if let Some(target_id) = filter.target_id {
            builder = builder.bind(("target_id", target_id));
        }
        if let Some(from) = filter.from {
            builder = builder.bind(("from", from));
        }
        if let Some(to) = filter.to {
            builder = builder.bind(("to", to));
        }

        let mut result = builder.await.map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);
        let rows: Vec<AuditRowWithId> = result.take(1).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_entry())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
