//! Durable event channel backed by the `outbox` table.

use chrono::{DateTime, Utc};
use keel_core::error::KeelResult;
use keel_core::models::event::EventEnvelope;
use keel_core::repository::EventChannel;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct OutboxRow {
    topic: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SurrealEventOutbox<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealEventOutbox<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Oldest first, for consumers polling the table.
    pub async fn recent(&self, topic: &str, limit: u64) -> KeelResult<Vec<EventEnvelope>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM outbox WHERE topic = $topic \
                 ORDER BY created_at ASC LIMIT $limit",
            )
            .bind(("topic", topic.to_string()))
            .bind(("limit", limit))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OutboxRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| EventEnvelope {
                topic: row.topic,
                payload: row.payload,
                created_at: row.created_at,
            })
            .collect())
    }
}

impl<C: Connection> EventChannel for SurrealEventOutbox<C> {
    async fn deliver(&self, envelope: EventEnvelope) -> KeelResult<()> {
        let result = self
            .db
            .query(
                "CREATE outbox SET topic = $topic, payload = $payload, \
                 created_at = $created_at",
            )
            .bind(("topic", envelope.topic))
            .bind(("payload", envelope.payload))
            .bind(("created_at", envelope.created_at))
            .await
            .map_err(|e| DbError::classify(e, "outbox"))?;
        result
            .check()
            .map_err(|e| DbError::classify(e, "outbox"))?;
        Ok(())
    }
}
