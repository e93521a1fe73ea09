//! `/auth/*` endpoints.
//!
//! Session mutations run on a spawned task so they complete even if the
//! client disconnects mid-request.

use std::future::Future;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use keel_auth::{AuthError, AuthResult, RecoveryOptions, RegisterInput, SessionTokens};
use keel_core::models::audit::AuditLogEntry;
use keel_core::models::user::{Role, UpdateProfile, User};
use keel_core::repository::{AuditLogFilter, Pagination};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::cookies::REFRESH_COOKIE;
use crate::error::ApiError;
use crate::middleware::{Admin, Caller};
use crate::state::GatewayState;

async fn detached<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = AuthResult<T>> + Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| ApiError::Internal(format!("session task failed: {e}")))?
        .map_err(ApiError::from)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub messenger_handle: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// `null` clears a field, an absent key leaves it alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub messenger_handle: Option<Option<String>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl From<UpdateProfileRequest> for UpdateProfile {
    fn from(body: UpdateProfileRequest) -> Self {
        Self {
            display_name: body.display_name,
            phone: body.phone,
            messenger_handle: body.messenger_handle,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecoveryLookup {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct RecoveryCodeRequest {
    pub username: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResetRequest {
    pub username: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl PageQuery {
    fn pagination(&self) -> Pagination {
        let defaults = Pagination::default();
        Pagination {
            offset: self.offset.unwrap_or(defaults.offset),
            limit: self.limit.unwrap_or(defaults.limit),
        }
        .clamped()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub role: Role,
    pub access_expires_at: DateTime<Utc>,
}

impl From<&SessionTokens> for SessionResponse {
    fn from(tokens: &SessionTokens) -> Self {
        Self {
            user_id: tokens.user_id,
            role: tokens.role,
            access_expires_at: tokens.access_expires_at,
        }
    }
}

/// Public view of a user. The password hash never leaves the service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub messenger_handle: Option<String>,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            phone: user.phone,
            messenger_handle: user.messenger_handle,
            role: user.role,
            active: user.active,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokedResponse {
    pub revoked_count: u64,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// POST /auth/login
pub async fn login(
    State(state): State<GatewayState>,
    jar: CookieJar,
    WithRejection(Json(body), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.clone();
    let tokens =
        detached(async move { sessions.login(&body.username, &body.password).await }).await?;
    Ok((
        state.cookies.issue(jar, &tokens),
        Json(SessionResponse::from(&tokens)),
    ))
}

/// POST /auth/register
pub async fn register(
    State(state): State<GatewayState>,
    jar: CookieJar,
    WithRejection(Json(body), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let accounts = state.accounts.clone();
    let input = RegisterInput {
        username: body.username,
        password: body.password,
        display_name: body.display_name,
        phone: body.phone,
        messenger_handle: body.messenger_handle,
    };
    let (user, tokens) =
        detached(async move { accounts.register_and_login(input).await }).await?;
    Ok((
        StatusCode::CREATED,
        state.cookies.issue(jar, &tokens),
        Json(UserSummary::from(user)),
    ))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<GatewayState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let raw = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::SessionNotFound)?;
    let sessions = state.sessions.clone();
    let tokens = detached(async move { sessions.refresh(&raw).await }).await?;
    Ok((
        state.cookies.issue(jar, &tokens),
        Json(SessionResponse::from(&tokens)),
    ))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<GatewayState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(raw) = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
    {
        let sessions = state.sessions.clone();
        detached(async move { sessions.logout(&raw).await }).await?;
    }
    Ok((StatusCode::NO_CONTENT, state.cookies.clear(jar)))
}

/// POST /auth/revoke-all/{user_id}
pub async fn revoke_all(
    State(state): State<GatewayState>,
    Admin(admin): Admin,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<Json<RevokedResponse>, ApiError> {
    let actor = admin.user_id()?;
    let sessions = state.sessions.clone();
    let revoked_count =
        detached(async move { sessions.revoke_all(Some(actor), user_id).await }).await?;
    Ok(Json(RevokedResponse { revoked_count }))
}

/// POST /auth/password
pub async fn change_password(
    State(state): State<GatewayState>,
    caller: Caller,
    WithRejection(Json(body), _): WithRejection<Json<ChangePasswordRequest>, ApiError>,
) -> Result<StatusCode, ApiError> {
    let user_id = caller.user_id()?;
    let accounts = state.accounts.clone();
    detached(async move {
        accounts
            .change_password(user_id, &body.current_password, &body.new_password)
            .await
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me
pub async fn me(
    State(state): State<GatewayState>,
    caller: Caller,
) -> Result<Json<UserSummary>, ApiError> {
    let user = state.accounts.get_user(caller.user_id()?).await?;
    Ok(Json(user.into()))
}

/// PATCH /auth/me
pub async fn update_me(
    State(state): State<GatewayState>,
    caller: Caller,
    WithRejection(Json(body), _): WithRejection<Json<UpdateProfileRequest>, ApiError>,
) -> Result<Json<UserSummary>, ApiError> {
    let user_id = caller.user_id()?;
    let user = state
        .accounts
        .update_profile(user_id, user_id, body.into())
        .await?;
    Ok(Json(user.into()))
}

/// GET /auth/users
pub async fn list_users(
    State(state): State<GatewayState>,
    _admin: Admin,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, ApiError>,
) -> Result<Json<Page<UserSummary>>, ApiError> {
    let page = state.accounts.list_users(query.pagination()).await?;
    Ok(Json(Page {
        items: page.items.into_iter().map(UserSummary::from).collect(),
        total: page.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// PUT /auth/users/{user_id}/role
pub async fn change_role(
    State(state): State<GatewayState>,
    Admin(admin): Admin,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(body), _): WithRejection<Json<ChangeRoleRequest>, ApiError>,
) -> Result<Json<UserSummary>, ApiError> {
    let actor = admin.user_id()?;
    let user = state.accounts.change_role(actor, user_id, body.role).await?;
    Ok(Json(user.into()))
}

/// PUT /auth/users/{user_id}/active
pub async fn set_active(
    State(state): State<GatewayState>,
    Admin(admin): Admin,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(body), _): WithRejection<Json<SetActiveRequest>, ApiError>,
) -> Result<Json<UserSummary>, ApiError> {
    let actor = admin.user_id()?;
    let accounts = state.accounts.clone();
    let user =
        detached(async move { accounts.set_active(actor, user_id, body.active).await }).await?;
    Ok(Json(user.into()))
}

/// GET /auth/audit
pub async fn audit_log(
    State(state): State<GatewayState>,
    _admin: Admin,
    WithRejection(Query(query), _): WithRejection<Query<AuditQuery>, ApiError>,
) -> Result<Json<Page<AuditLogEntry>>, ApiError> {
    let pagination = PageQuery {
        offset: query.offset,
        limit: query.limit,
    }
    .pagination();
    let filter = AuditLogFilter {
        actor_id: query.actor_id,
        action: query.action,
        target_type: query.target_type,
        target_id: query.target_id,
        from: query.from,
        to: query.to,
    };
    let page = state.accounts.audit_log(filter, pagination).await?;
    Ok(Json(Page {
        items: page.items,
        total: page.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// GET /auth/recovery/options
pub async fn recovery_options(
    State(state): State<GatewayState>,
    WithRejection(Query(query), _): WithRejection<Query<RecoveryLookup>, ApiError>,
) -> Result<Json<RecoveryOptions>, ApiError> {
    Ok(Json(state.recovery.options(&query.username).await?))
}

/// POST /auth/recovery/init
///
/// Accepted whether or not the username exists.
pub async fn recovery_init(
    State(state): State<GatewayState>,
    WithRejection(Json(body), _): WithRejection<Json<RecoveryLookup>, ApiError>,
) -> Result<StatusCode, ApiError> {
    let recovery = state.recovery.clone();
    detached(async move { recovery.init(&body.username).await }).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /auth/recovery/verify
pub async fn recovery_verify(
    State(state): State<GatewayState>,
    WithRejection(Json(body), _): WithRejection<Json<RecoveryCodeRequest>, ApiError>,
) -> Result<StatusCode, ApiError> {
    state.recovery.verify(&body.username, &body.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/recovery/reset
pub async fn recovery_reset(
    State(state): State<GatewayState>,
    jar: CookieJar,
    WithRejection(Json(body), _): WithRejection<Json<RecoveryResetRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let recovery = state.recovery.clone();
    detached(async move {
        recovery
            .reset(&body.username, &body.code, &body.new_password)
            .await
    })
    .await?;
    Ok((StatusCode::NO_CONTENT, state.cookies.clear(jar)))
}
