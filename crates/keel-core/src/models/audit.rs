//! Audit log domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known audit action names.
pub mod actions {
    pub const LOGIN: &str = "login";
    pub const REFRESH: &str = "refresh";
    pub const LOGOUT: &str = "logout";
    pub const REVOKE_ALL: &str = "revoke_all";
    pub const USER_REGISTER: &str = "user.register";
    pub const USER_UPDATE: &str = "user.update";
    pub const USER_ACTIVATE: &str = "user.activate";
    pub const USER_DEACTIVATE: &str = "user.deactivate";
    pub const ROLE_CHANGE: &str = "role.change";
    pub const PASSWORD_CHANGE: &str = "password.change";
    pub const RECOVERY_INIT: &str = "recovery.init";
    pub const PASSWORD_RESET: &str = "password.reset";
}

/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAuditLogEntry {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    /// Always an object; `Value::Null` is stored as `{}`.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
