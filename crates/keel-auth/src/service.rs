//! Session manager: login, refresh rotation, logout and revocation.
//!
//! Per refresh token the lifecycle is `ACTIVE` → one of `ROTATED`,
//! `REVOKED` or `EXPIRED`, all terminal. Rotation consumes the old
//! record through [`SessionRepository::rotate`], so a replayed or
//! concurrently reused token observes [`AuthError::SessionNotFound`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use keel_core::clock::Clock;
use keel_core::error::{KeelError, KeelResult};
use keel_core::models::audit::actions;
use keel_core::models::session::CreateSession;
use keel_core::models::user::{Role, User};
use keel_core::repository::{AuditLogRepository, SessionRepository, UserRepository};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::password;
use crate::token::{self, TokenService};

/// Everything a client needs after login or refresh.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub user_id: Uuid,
    pub role: Role,
    /// Signed JWT access token.
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    /// Raw opaque refresh token (return to client, not stored).
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Audit target id for a session: a prefix of its token hash.
fn session_ref(token_hash: &str) -> String {
    token_hash.chars().take(16).collect()
}

/// Generic over repository implementations so that the auth layer
/// has no dependency on the database crate.
pub struct SessionManager<U, S, A> {
    users: U,
    sessions: S,
    audit: AuditTrail<A>,
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    storage_timeout: StdDuration,
}

impl<U, S, A> SessionManager<U, S, A>
where
    U: UserRepository,
    S: SessionRepository,
    A: AuditLogRepository,
{
    pub fn new(
        users: U,
        sessions: S,
        audit: A,
        tokens: Arc<TokenService>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        let storage_timeout = StdDuration::from_millis(config.storage_timeout_ms);
        Self {
            users,
            sessions,
            audit: AuditTrail::new(audit, clock.clone(), storage_timeout),
            tokens,
            clock,
            config,
            storage_timeout,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn users(&self) -> &U {
        &self.users
    }

    pub(crate) fn audit(&self) -> &AuditTrail<A> {
        &self.audit
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one storage call under the configured timeout. Raw storage
    /// failures and timeouts leave here as `ServiceUnavailable`; domain
    /// outcomes such as `NotFound` pass through untouched.
    pub(crate) async fn store<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = KeelResult<T>>,
    ) -> AuthResult<T> {
        match tokio::time::timeout(self.storage_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(KeelError::Database(message))) => {
                warn!(op, error = %message, "Storage call failed");
                Err(AuthError::unavailable(format!("{op} failed")))
            }
            Ok(Err(other)) => Err(other.into()),
            Err(_) => {
                warn!(op, timeout_ms = self.config.storage_timeout_ms, "Storage call timed out");
                Err(AuthError::unavailable(format!("{op} timed out")))
            }
        }
    }

    fn new_session(&self, user_id: Uuid) -> (String, CreateSession) {
        let raw = token::generate_refresh_token();
        let now = self.clock.now();
        let input = CreateSession {
            token_hash: token::hash_refresh_token(&raw),
            user_id,
            expires_at: now + Duration::seconds(self.config.refresh_token_lifetime_secs as i64),
            created_at: now,
        };
        (raw, input)
    }

    fn bundle(
        &self,
        user: &User,
        raw_refresh: String,
        session: &CreateSession,
    ) -> AuthResult<SessionTokens> {
        let access = self.tokens.issue(user)?;
        Ok(SessionTokens {
            user_id: user.id,
            role: user.role,
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: raw_refresh,
            refresh_expires_at: session.expires_at,
        })
    }

    /// Verify credentials and open a new session.
    ///
    /// Unknown usernames and wrong passwords both fail with
    /// `InvalidCredentials` after the same amount of hashing work.
    /// `AccountInactive` is only reported once the password matched.
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<SessionTokens> {
        let pepper = self.config.pepper.as_deref();

        let Some(user) = self
            .store("find user", self.users.find_by_username(username))
            .await?
        else {
            password::verify_decoy(password, pepper);
            debug!("Login attempt for unknown username");
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password, &user.password_hash, pepper)? {
            debug!(user_id = %user.id, "Login attempt with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.active {
            return Err(AuthError::AccountInactive);
        }

        self.open_session(&user, actions::LOGIN).await
    }

    /// Open a session for an already-authenticated user.
    pub(crate) async fn open_session(
        &self,
        user: &User,
        action: &str,
    ) -> AuthResult<SessionTokens> {
        let (raw, input) = self.new_session(user.id);
        let tokens = self.bundle(user, raw, &input)?;
        let reference = session_ref(&input.token_hash);

        self.store("create session", self.sessions.create(input))
            .await?;

        self.audit
            .record(Some(user.id), action, "session", reference, json!({}))
            .await;
        info!(user_id = %user.id, "Session opened");
        Ok(tokens)
    }

    /// Exchange a refresh token for a new token pair. The presented
    /// token is consumed whether or not the caller sees the result.
    pub async fn refresh(&self, raw_refresh_token: &str) -> AuthResult<SessionTokens> {
        let token_hash = token::hash_refresh_token(raw_refresh_token);

        let session = self
            .store("get session", self.sessions.get_by_token_hash(&token_hash))
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if session.is_expired(self.clock.now()) {
            if let Err(e) = self
                .store("delete session", self.sessions.delete(&token_hash))
                .await
            {
                warn!(error = %e, "Could not remove expired session");
            }
            return Err(AuthError::SessionExpired);
        }

        let user = match self.store("get user", self.users.get_by_id(session.user_id)).await {
            Ok(user) => user,
            Err(AuthError::Store(KeelError::NotFound { .. })) => {
                return Err(AuthError::SessionNotFound);
            }
            Err(e) => return Err(e),
        };
        if !user.active {
            if let Err(e) = self
                .store("delete session", self.sessions.delete(&token_hash))
                .await
            {
                warn!(user_id = %user.id, error = %e, "Could not remove session of inactive user");
            }
            return Err(AuthError::AccountInactive);
        }

        let (raw, replacement) = self.new_session(user.id);
        let tokens = self.bundle(&user, raw, &replacement)?;
        let reference = session_ref(&replacement.token_hash);

        if self
            .store("rotate session", self.sessions.rotate(&token_hash, replacement))
            .await?
            .is_none()
        {
            warn!(
                user_id = %user.id,
                session = %session_ref(&token_hash),
                "Refresh token reused after rotation"
            );
            return Err(AuthError::SessionNotFound);
        }

        self.audit
            .record(
                Some(user.id),
                actions::REFRESH,
                "session",
                reference,
                json!({ "replaces": session_ref(&token_hash) }),
            )
            .await;
        Ok(tokens)
    }

    /// Revoke one session. Absent sessions are not an error.
    pub async fn logout(&self, raw_refresh_token: &str) -> AuthResult<()> {
        let token_hash = token::hash_refresh_token(raw_refresh_token);
        let removed = self
            .store("delete session", self.sessions.delete(&token_hash))
            .await?;

        self.audit
            .record(
                removed.as_ref().map(|s| s.user_id),
                actions::LOGOUT,
                "session",
                session_ref(&token_hash),
                json!({ "revoked": removed.is_some() }),
            )
            .await;
        Ok(())
    }

    /// Delete every session owned by `user_id`.
    pub async fn revoke_all(&self, actor_id: Option<Uuid>, user_id: Uuid) -> AuthResult<u64> {
        self.store("get user", self.users.get_by_id(user_id)).await?;
        let revoked = self
            .store(
                "delete user sessions",
                self.sessions.delete_user_sessions(user_id),
            )
            .await?;

        self.audit
            .record(
                actor_id,
                actions::REVOKE_ALL,
                "user",
                user_id.to_string(),
                json!({ "revokedCount": revoked }),
            )
            .await;
        info!(user_id = %user_id, revoked, "Revoked all sessions");
        Ok(revoked)
    }

    /// Housekeeping pass over expired sessions.
    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        let now = self.clock.now();
        self.store("sweep sessions", self.sessions.delete_expired(now))
            .await
    }
}
