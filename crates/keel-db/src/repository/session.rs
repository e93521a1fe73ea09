//! SurrealDB implementation of [`SessionRepository`].
//!
//! The record id is the token hash itself, so lookup, single-use
//! consumption and logout are all point operations on one record.
//! Rotation runs as one transaction so a failed insert never strands
//! the caller without a session.

use chrono::{DateTime, Utc};
use keel_core::error::KeelResult;
use keel_core::models::session::{CreateSession, RefreshSession};
use keel_core::repository::SessionRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::CountRow;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct SessionRow {
    user_id: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self, token_hash: String) -> Result<RefreshSession, DbError> {
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| DbError::Decode(format!("invalid user UUID: {e}")))?;
        Ok(RefreshSession {
            token_hash,
            user_id,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

/// SurrealDB implementation of the Session repository.
#[derive(Clone)]
pub struct SurrealSessionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealSessionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// `DELETE ... RETURN BEFORE` on a single record. Whichever caller
    /// receives the row owns the session; a caller that loses a write
    /// conflict is treated the same as one that found nothing.
    async fn consume(&self, token_hash: &str) -> Result<Option<RefreshSession>, DbError> {
        let result = match self
            .db
            .query("DELETE type::record('session', $hash) RETURN BEFORE")
            .bind(("hash", token_hash.to_string()))
            .await
        {
            Ok(result) => result,
            Err(e) => return conflict_as_none(DbError::classify(e, "session")),
        };
        let mut result = match result.check() {
            Ok(result) => result,
            Err(e) => return conflict_as_none(DbError::classify(e, "session")),
        };

        let rows: Vec<SessionRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.into_session(token_hash.to_string()))
            .transpose()
    }
}

const CONSUMED: &str = "session already consumed";

/// Delete-old and insert-new commit together or not at all. A missing
/// old record aborts the transaction with [`CONSUMED`].
const ROTATE: &str = "\
BEGIN TRANSACTION;
LET $consumed = (DELETE type::record('session', $old_hash) RETURN BEFORE);
IF array::len($consumed) = 0 { THROW 'session already consumed' };
CREATE type::record('session', $new_hash) SET \
    user_id = $user_id, \
    expires_at = $expires_at, \
    created_at = $created_at;
COMMIT TRANSACTION;";

fn conflict_as_none(err: DbError) -> Result<Option<RefreshSession>, DbError> {
    match err {
        DbError::WriteConflict(message) => {
            debug!(%message, "Lost session delete race");
            Ok(None)
        }
        other => Err(other),
    }
}

impl<C: Connection> SessionRepository for SurrealSessionRepository<C> {
    async fn create(&self, input: CreateSession) -> KeelResult<RefreshSession> {
        let result = self
            .db
            .query(
                "CREATE type::record('session', $hash) SET \
                 user_id = $user_id, \
                 expires_at = $expires_at, \
                 created_at = $created_at",
            )
            .bind(("hash", input.token_hash.clone()))
            .bind(("user_id", input.user_id.to_string()))
            .bind(("expires_at", input.expires_at))
            .bind(("created_at", input.created_at))
            .await
            .map_err(|e| DbError::classify(e, "session"))?;

        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "session"))?;

        let rows: Vec<SessionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "session".into(),
            id: input.token_hash.clone(),
        })?;

        Ok(row.into_session(input.token_hash)?)
    }

    async fn get_by_token_hash(&self, token_hash: &str) -> KeelResult<Option<RefreshSession>> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('session', $hash)")
            .bind(("hash", token_hash.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SessionRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| row.into_session(token_hash.to_string()))
            .transpose()?)
    }

    async fn rotate(
        &self,
        old_token_hash: &str,
        replacement: CreateSession,
    ) -> KeelResult<Option<RefreshSession>> {
        let mut result = match self
            .db
            .query(ROTATE)
            .bind(("old_hash", old_token_hash.to_string()))
            .bind(("new_hash", replacement.token_hash.clone()))
            .bind(("user_id", replacement.user_id.to_string()))
            .bind(("expires_at", replacement.expires_at))
            .bind(("created_at", replacement.created_at))
            .await
        {
            Ok(result) => result,
            Err(e) => return Ok(conflict_as_none(DbError::classify(e, "session"))?),
        };

        let mut errors: Vec<_> = result.take_errors().into_iter().collect();
        if errors.is_empty() {
            return Ok(Some(RefreshSession {
                token_hash: replacement.token_hash,
                user_id: replacement.user_id,
                expires_at: replacement.expires_at,
                created_at: replacement.created_at,
            }));
        }
        if errors.iter().any(|(_, e)| e.to_string().contains(CONSUMED)) {
            debug!("Rotation found no session to consume");
            return Ok(None);
        }
        // Statements skipped by the rollback report a generic error; the
        // statement that actually failed carries the cause.
        errors.sort_by_key(|(index, e)| (e.to_string().contains("not executed"), *index));
        let causes = errors
            .into_iter()
            .map(|(_, e)| DbError::classify(e, "session"));
        let mut first = None;
        for cause in causes {
            if let DbError::WriteConflict(message) = cause {
                debug!(%message, "Lost session rotation race");
                return Ok(None);
            }
            first.get_or_insert(cause);
        }
        Err(first
            .unwrap_or_else(|| DbError::Query("session rotation failed".into()))
            .into())
    }

    async fn delete(&self, token_hash: &str) -> KeelResult<Option<RefreshSession>> {
        Ok(self.consume(token_hash).await?)
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> KeelResult<u64> {
        let result = self
            .db
            .query("DELETE session WHERE user_id = $user_id RETURN BEFORE")
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(|e| DbError::classify(e, "session"))?;
        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "session"))?;

        let rows: Vec<SessionRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.len() as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> KeelResult<u64> {
        let result = self
            .db
            .query("DELETE session WHERE expires_at < $now RETURN BEFORE")
            .bind(("now", now))
            .await
            .map_err(|e| DbError::classify(e, "session"))?;
        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "session"))?;

        let rows: Vec<SessionRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.len() as u64)
    }

    async fn count_user_sessions(&self, user_id: Uuid) -> KeelResult<u64> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM session WHERE user_id = $user_id GROUP ALL")
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}
