//! SurrealDB implementation of [`RecoveryCodeRepository`].

use chrono::{DateTime, Utc};
use keel_core::error::KeelResult;
use keel_core::models::recovery::{CreateRecoveryCode, RecoveryCode};
use keel_core::repository::RecoveryCodeRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct RecoveryRow {
    user_id: String,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl RecoveryRow {
    fn into_code(self, code_hash: String) -> Result<RecoveryCode, DbError> {
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| DbError::Decode(format!("invalid user UUID: {e}")))?;
        Ok(RecoveryCode {
            code_hash,
            user_id,
            expires_at: self.expires_at,
            used_at: self.used_at,
            created_at: self.created_at,
        })
    }
}

const REPLACE: &str = "\
BEGIN TRANSACTION;
DELETE recovery_code WHERE user_id = $user_id AND used_at = NONE;
CREATE type::record('recovery_code', $hash) SET \
    user_id = $user_id, \
    expires_at = $expires_at, \
    used_at = NONE, \
    created_at = $created_at;
COMMIT TRANSACTION;";

#[derive(Clone)]
pub struct SurrealRecoveryCodeRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealRecoveryCodeRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first_row(
        rows: Vec<RecoveryRow>,
        code_hash: &str,
    ) -> Result<Option<RecoveryCode>, DbError> {
        rows.into_iter()
            .next()
            .map(|row| row.into_code(code_hash.to_string()))
            .transpose()
    }
}

impl<C: Connection> RecoveryCodeRepository for SurrealRecoveryCodeRepository<C> {
    async fn replace(&self, input: CreateRecoveryCode) -> KeelResult<RecoveryCode> {
        let mut result = self
            .db
            .query(REPLACE)
            .bind(("hash", input.code_hash.clone()))
            .bind(("user_id", input.user_id.to_string()))
            .bind(("expires_at", input.expires_at))
            .bind(("created_at", input.created_at))
            .await
            .map_err(|e| DbError::classify(e, "recovery_code"))?;

        let mut errors: Vec<_> = result.take_errors().into_iter().collect();
        errors.sort_by_key(|(index, _)| *index);
        if let Some((_, err)) = errors.into_iter().next() {
            return Err(DbError::classify(err, "recovery_code").into());
        }

        Ok(RecoveryCode {
            code_hash: input.code_hash,
            user_id: input.user_id,
            expires_at: input.expires_at,
            used_at: None,
            created_at: input.created_at,
        })
    }

    async fn find_redeemable(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> KeelResult<Option<RecoveryCode>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('recovery_code', $hash) \
                 WHERE used_at = NONE AND expires_at > $now",
            )
            .bind(("hash", code_hash.to_string()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RecoveryRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first_row(rows, code_hash)?)
    }

    async fn redeem(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> KeelResult<Option<RecoveryCode>> {
        let outcome = self
            .db
            .query(
                "UPDATE type::record('recovery_code', $hash) SET used_at = $now \
                 WHERE used_at = NONE AND expires_at > $now RETURN AFTER",
            )
            .bind(("hash", code_hash.to_string()))
            .bind(("now", now))
            .await
            .and_then(|result| result.check());

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                return match DbError::classify(e, "recovery_code") {
                    DbError::WriteConflict(message) => {
                        debug!(%message, "Lost recovery code race");
                        Ok(None)
                    }
                    other => Err(other.into()),
                };
            }
        };

        let rows: Vec<RecoveryRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first_row(rows, code_hash)?)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> KeelResult<u64> {
        let result = self
            .db
            .query("DELETE recovery_code WHERE expires_at < $now RETURN BEFORE")
            .bind(("now", now))
            .await
            .map_err(|e| DbError::classify(e, "recovery_code"))?;
        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "recovery_code"))?;

        let rows: Vec<RecoveryRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.len() as u64)
    }
}
