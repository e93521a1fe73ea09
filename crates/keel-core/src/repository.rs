//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Lookups that may legitimately
//! miss return `Option`; writes against a missing record fail with
//! [`KeelError::NotFound`](crate::error::KeelError::NotFound).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::KeelResult;
use crate::models::{
    audit::{AuditLogEntry, CreateAuditLogEntry},
    event::EventEnvelope,
    recovery::{CreateRecoveryCode, RecoveryCode},
    session::{CreateSession, RefreshSession},
    user::{CreateUser, Role, UpdateProfile, User},
};

pub const MAX_PAGE_SIZE: u64 = 200;

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    /// Caps `limit` at [`MAX_PAGE_SIZE`] and lifts zero to one.
    pub fn clamped(self) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Identity store
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the username is taken in any case.
    fn create(&self, input: CreateUser) -> impl Future<Output = KeelResult<User>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = KeelResult<User>> + Send;
    /// Case-insensitive exact match.
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = KeelResult<Option<User>>> + Send;
    fn update_profile(
        &self,
        id: Uuid,
        input: UpdateProfile,
    ) -> impl Future<Output = KeelResult<User>> + Send;
    /// Idempotent. Users are never deleted, only deactivated.
    fn set_active(&self, id: Uuid, active: bool) -> impl Future<Output = KeelResult<User>> + Send;
    fn set_role(&self, id: Uuid, role: Role) -> impl Future<Output = KeelResult<User>> + Send;
    fn set_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> impl Future<Output = KeelResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = KeelResult<PaginatedResult<User>>> + Send;
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

pub trait SessionRepository: Send + Sync {
    fn create(&self, input: CreateSession)
    -> impl Future<Output = KeelResult<RefreshSession>> + Send;
    fn get_by_token_hash(
        &self,
        token_hash: &str,
    ) -> impl Future<Output = KeelResult<Option<RefreshSession>>> + Send;
    /// Consume `old_token_hash` and store `replacement` in its place.
    ///
    /// Consume and insert commit as one transaction: of any number of
    /// concurrent callers holding the same hash, exactly one gets
    /// `Some`. The others get `None` and nothing is written for them.
    /// On error neither step takes effect.
    fn rotate(
        &self,
        old_token_hash: &str,
        replacement: CreateSession,
    ) -> impl Future<Output = KeelResult<Option<RefreshSession>>> + Send;
    /// Returns the removed session, `None` if it was already gone.
    fn delete(
        &self,
        token_hash: &str,
    ) -> impl Future<Output = KeelResult<Option<RefreshSession>>> + Send;
    /// Remove every session owned by `user_id`; returns how many.
    fn delete_user_sessions(&self, user_id: Uuid) -> impl Future<Output = KeelResult<u64>> + Send;
    /// Remove sessions with `expires_at < now`; returns how many.
    fn delete_expired(&self, now: DateTime<Utc>) -> impl Future<Output = KeelResult<u64>> + Send;
    fn count_user_sessions(&self, user_id: Uuid) -> impl Future<Output = KeelResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Recovery codes
// ---------------------------------------------------------------------------

pub trait RecoveryCodeRepository: Send + Sync {
    /// Store a new code and drop every unused code the user still holds.
    fn replace(
        &self,
        input: CreateRecoveryCode,
    ) -> impl Future<Output = KeelResult<RecoveryCode>> + Send;
    /// The code if it exists, is unused and `expires_at > now`.
    fn find_redeemable(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeelResult<Option<RecoveryCode>>> + Send;
    /// Mark a redeemable code used. Of concurrent callers, exactly one
    /// gets `Some`.
    fn redeem(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = KeelResult<Option<RecoveryCode>>> + Send;
    /// Remove codes with `expires_at < now`; returns how many.
    fn delete_expired(&self, now: DateTime<Utc>) -> impl Future<Output = KeelResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only)
// ---------------------------------------------------------------------------

/// Query filters for audit log entries.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub trait AuditLogRepository: Send + Sync {
    /// Append a new audit log entry. No update or delete operations exist.
    fn append(
        &self,
        input: CreateAuditLogEntry,
    ) -> impl Future<Output = KeelResult<AuditLogEntry>> + Send;
    /// Newest first.
    fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> impl Future<Output = KeelResult<PaginatedResult<AuditLogEntry>>> + Send;
}

// ---------------------------------------------------------------------------
// Event channel
// ---------------------------------------------------------------------------

/// Durable sink for identity events. Consumers are external.
pub trait EventChannel: Send + Sync + 'static {
    fn deliver(&self, envelope: EventEnvelope) -> impl Future<Output = KeelResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination {
            offset: 10,
            limit: 10_000,
        }
        .clamped();
        assert_eq!((p.offset, p.limit), (10, MAX_PAGE_SIZE));
        assert_eq!(Pagination { offset: 0, limit: 0 }.clamped().limit, 1);
    }
}
