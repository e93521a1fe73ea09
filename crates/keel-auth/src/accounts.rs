//! Account lifecycle around the session manager: registration, profile
//! and role changes, activation, password changes, admin reads.

use std::sync::Arc;

use keel_core::models::audit::{AuditLogEntry, actions};
use keel_core::models::user::{CreateUser, Role, UpdateProfile, User};
use keel_core::repository::{
    AuditLogFilter, AuditLogRepository, PaginatedResult, Pagination, SessionRepository,
    UserRepository,
};
use keel_core::validation::{self, Violations};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::events::EventPublisher;
use crate::password;
use crate::service::{SessionManager, SessionTokens};

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub messenger_handle: Option<String>,
}

pub struct AccountService<U, S, A> {
    sessions: Arc<SessionManager<U, S, A>>,
    events: EventPublisher,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl<U, S, A> AccountService<U, S, A>
where
    U: UserRepository,
    S: SessionRepository,
    A: AuditLogRepository,
{
    pub fn new(sessions: Arc<SessionManager<U, S, A>>, events: EventPublisher) -> Self {
        Self { sessions, events }
    }

    pub fn sessions(&self) -> &Arc<SessionManager<U, S, A>> {
        &self.sessions
    }

    fn pepper(&self) -> Option<&str> {
        self.sessions.config().pepper.as_deref()
    }

    /// Create a member account and announce it. The announcement is
    /// queued, so registration succeeds even when nobody is listening.
    pub async fn register(&self, input: RegisterInput) -> AuthResult<User> {
        let phone = blank_to_none(input.phone);
        let messenger_handle = blank_to_none(input.messenger_handle);
        let min_len = self.sessions.config().min_password_length;

        let mut violations = Violations::new();
        violations
            .check("username", validation::username(&input.username))
            .check("password", validation::password(&input.password, min_len))
            .check("displayName", validation::display_name(&input.display_name))
            .check_optional("phone", phone.as_deref(), validation::phone)
            .check_optional(
                "messengerHandle",
                messenger_handle.as_deref(),
                validation::messenger_handle,
            );
        violations.into_result()?;

        let password_hash = password::hash_password(&input.password, self.pepper())?;
        let user = self
            .sessions
            .store(
                "create user",
                self.sessions.users().create(CreateUser {
                    username: input.username,
                    password_hash,
                    display_name: input.display_name.trim().to_string(),
                    phone,
                    messenger_handle,
                    role: Role::Member,
                }),
            )
            .await?;

        self.events.publish_registered(&user);
        self.sessions
            .audit()
            .record(
                Some(user.id),
                actions::USER_REGISTER,
                "user",
                user.id.to_string(),
                json!({ "username": user.username }),
            )
            .await;
        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Register and immediately open a session for the new account.
    pub async fn register_and_login(
        &self,
        input: RegisterInput,
    ) -> AuthResult<(User, SessionTokens)> {
        let user = self.register(input).await?;
        let tokens = self.sessions.open_session(&user, actions::LOGIN).await?;
        Ok((user, tokens))
    }

    pub async fn update_profile(
        &self,
        actor_id: Uuid,
        user_id: Uuid,
        mut fields: UpdateProfile,
    ) -> AuthResult<User> {
        fields.phone = fields.phone.map(blank_to_none);
        fields.messenger_handle = fields.messenger_handle.map(blank_to_none);

        let mut violations = Violations::new();
        if let Some(display_name) = &fields.display_name {
            violations.check("displayName", validation::display_name(display_name));
        }
        violations
            .check_optional(
                "phone",
                fields.phone.as_ref().and_then(|p| p.as_deref()),
                validation::phone,
            )
            .check_optional(
                "messengerHandle",
                fields.messenger_handle.as_ref().and_then(|m| m.as_deref()),
                validation::messenger_handle,
            );
        violations.into_result()?;

        let changed: Vec<&str> = [
            fields.display_name.is_some().then_some("displayName"),
            fields.phone.is_some().then_some("phone"),
            fields.messenger_handle.is_some().then_some("messengerHandle"),
        ]
        .into_iter()
        .flatten()
        .collect();

        let user = self
            .sessions
            .store("update user", self.sessions.users().update_profile(user_id, fields))
            .await?;
        self.sessions
            .audit()
            .record(
                Some(actor_id),
                actions::USER_UPDATE,
                "user",
                user_id.to_string(),
                json!({ "fields": changed }),
            )
            .await;
        Ok(user)
    }

    pub async fn change_role(&self, actor_id: Uuid, user_id: Uuid, role: Role) -> AuthResult<User> {
        let user = self
            .sessions
            .store("set role", self.sessions.users().set_role(user_id, role))
            .await?;
        self.sessions
            .audit()
            .record(
                Some(actor_id),
                actions::ROLE_CHANGE,
                "user",
                user_id.to_string(),
                json!({ "role": role }),
            )
            .await;
        info!(user_id = %user_id, role = %role, "Role changed");
        Ok(user)
    }

    /// Idempotent. Deactivation also revokes every open session.
    pub async fn set_active(
        &self,
        actor_id: Uuid,
        user_id: Uuid,
        active: bool,
    ) -> AuthResult<User> {
        let user = self
            .sessions
            .store("set active", self.sessions.users().set_active(user_id, active))
            .await?;
        if !active {
            self.sessions.revoke_all(Some(actor_id), user_id).await?;
        }
        let action = if active {
            actions::USER_ACTIVATE
        } else {
            actions::USER_DEACTIVATE
        };
        self.sessions
            .audit()
            .record(Some(actor_id), action, "user", user_id.to_string(), json!({}))
            .await;
        Ok(user)
    }

    /// Returns how many sessions were revoked by the change.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<u64> {
        let mut violations = Violations::new();
        violations.check(
            "newPassword",
            validation::password(new_password, self.sessions.config().min_password_length),
        );
        violations.into_result()?;

        let user = self
            .sessions
            .store("get user", self.sessions.users().get_by_id(user_id))
            .await?;
        if !password::verify_password(current_password, &user.password_hash, self.pepper())? {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = password::hash_password(new_password, self.pepper())?;
        self.sessions
            .store(
                "set password",
                self.sessions.users().set_password_hash(user_id, &new_hash),
            )
            .await?;
        let revoked = self.sessions.revoke_all(Some(user_id), user_id).await?;

        self.sessions
            .audit()
            .record(
                Some(user_id),
                actions::PASSWORD_CHANGE,
                "user",
                user_id.to_string(),
                json!({ "revokedCount": revoked }),
            )
            .await;
        Ok(revoked)
    }

    pub async fn get_user(&self, user_id: Uuid) -> AuthResult<User> {
        self.sessions
            .store("get user", self.sessions.users().get_by_id(user_id))
            .await
    }

    pub async fn list_users(&self, pagination: Pagination) -> AuthResult<PaginatedResult<User>> {
        self.sessions
            .store("list users", self.sessions.users().list(pagination))
            .await
    }

    pub async fn audit_log(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> AuthResult<PaginatedResult<AuditLogEntry>> {
        self.sessions
            .store("query audit", self.sessions.audit().query(filter, pagination))
            .await
    }
}
