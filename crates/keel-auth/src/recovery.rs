//! Password recovery by one-time code.
//!
//! A code is delivered to the user over the event channel, checked
//! without being spent, then spent by the reset that replaces the
//! password. A reset revokes every open session. Lookups by username
//! never reveal whether the account exists.

use std::sync::Arc;

use chrono::Duration;
use keel_core::models::audit::actions;
use keel_core::models::recovery::CreateRecoveryCode;
use keel_core::models::user::User;
use keel_core::repository::{
    AuditLogRepository, RecoveryCodeRepository, SessionRepository, UserRepository,
};
use keel_core::validation::{self, Violations};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::events::EventPublisher;
use crate::password;
use crate::service::SessionManager;

/// Delivery routes the client may offer for a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryOptions {
    pub messenger: bool,
}

/// Eight decimal digits.
pub fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..100_000_000);
    format!("{n:08}")
}

/// Storage key for a code. Binding the user id keeps two users who
/// happen to draw the same digits apart.
pub fn hash_code(user_id: Uuid, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct RecoveryService<U, S, A, R> {
    sessions: Arc<SessionManager<U, S, A>>,
    codes: R,
    events: EventPublisher,
}

impl<U, S, A, R> RecoveryService<U, S, A, R>
where
    U: UserRepository,
    S: SessionRepository,
    A: AuditLogRepository,
    R: RecoveryCodeRepository,
{
    pub fn new(sessions: Arc<SessionManager<U, S, A>>, codes: R, events: EventPublisher) -> Self {
        Self {
            sessions,
            codes,
            events,
        }
    }

    async fn active_user(&self, username: &str) -> AuthResult<Option<User>> {
        let user = self
            .sessions
            .store("find user", self.sessions.users().find_by_username(username))
            .await?;
        Ok(user.filter(|u| u.active))
    }

    pub async fn options(&self, username: &str) -> AuthResult<RecoveryOptions> {
        let user = self.active_user(username).await?;
        Ok(RecoveryOptions {
            messenger: user.is_some_and(|u| u.messenger_handle.is_some()),
        })
    }

    /// Issue a fresh code and queue it for delivery. Any earlier unused
    /// code stops working. Unknown or inactive usernames succeed
    /// silently.
    pub async fn init(&self, username: &str) -> AuthResult<()> {
        let Some(user) = self.active_user(username).await? else {
            debug!("Recovery requested for unknown or inactive username");
            return Ok(());
        };

        let code = generate_code();
        let now = self.sessions.clock().now();
        let ttl = self.sessions.config().recovery_code_ttl_secs;
        let expires_at = now + Duration::seconds(ttl as i64);
        self.sessions
            .store(
                "store recovery code",
                self.codes.replace(CreateRecoveryCode {
                    code_hash: hash_code(user.id, &code),
                    user_id: user.id,
                    expires_at,
                    created_at: now,
                }),
            )
            .await?;

        self.events.publish_recovery_code(&user, &code, expires_at);
        self.sessions
            .audit()
            .record(
                Some(user.id),
                actions::RECOVERY_INIT,
                "user",
                user.id.to_string(),
                json!({ "expiresAt": expires_at }),
            )
            .await;
        info!(user_id = %user.id, "Recovery code issued");
        Ok(())
    }

    /// Check a code without spending it.
    pub async fn verify(&self, username: &str, code: &str) -> AuthResult<()> {
        let user = self
            .active_user(username)
            .await?
            .ok_or(AuthError::InvalidRecoveryCode)?;
        let now = self.sessions.clock().now();
        self.sessions
            .store(
                "find recovery code",
                self.codes.find_redeemable(&hash_code(user.id, code), now),
            )
            .await?
            .ok_or(AuthError::InvalidRecoveryCode)?;
        Ok(())
    }

    /// Spend the code, replace the password and revoke every session.
    /// Returns how many sessions were revoked.
    pub async fn reset(&self, username: &str, code: &str, new_password: &str) -> AuthResult<u64> {
        let mut violations = Violations::new();
        violations.check(
            "newPassword",
            validation::password(new_password, self.sessions.config().min_password_length),
        );
        violations.into_result()?;

        let user = self
            .active_user(username)
            .await?
            .ok_or(AuthError::InvalidRecoveryCode)?;
        let now = self.sessions.clock().now();
        self.sessions
            .store(
                "redeem recovery code",
                self.codes.redeem(&hash_code(user.id, code), now),
            )
            .await?
            .ok_or(AuthError::InvalidRecoveryCode)?;

        let pepper = self.sessions.config().pepper.as_deref();
        let new_hash = password::hash_password(new_password, pepper)?;
        self.sessions
            .store(
                "set password",
                self.sessions.users().set_password_hash(user.id, &new_hash),
            )
            .await?;
        let revoked = self.sessions.revoke_all(Some(user.id), user.id).await?;

        self.sessions
            .audit()
            .record(
                Some(user.id),
                actions::PASSWORD_RESET,
                "user",
                user.id.to_string(),
                json!({ "revokedCount": revoked }),
            )
            .await;
        info!(user_id = %user.id, revoked, "Password reset");
        Ok(revoked)
    }

    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        let now = self.sessions.clock().now();
        self.sessions
            .store("sweep recovery codes", self.codes.delete_expired(now))
            .await
    }
}
