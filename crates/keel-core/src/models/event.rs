//! Identity lifecycle events handed to the durable outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const USER_REGISTERED_TOPIC: &str = "user.registered";
pub const RECOVERY_CODE_TOPIC: &str = "user.recovery_code";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub messenger_handle: Option<String>,
}

/// Carries a plain recovery code to the notification service, which
/// delivers it over the user's messenger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCodeIssued {
    pub user_id: Uuid,
    pub username: String,
    pub messenger_handle: Option<String>,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}
