//! Authentication configuration.

use chrono::{DateTime, Utc};
use keel_core::error::{KeelError, KeelResult};

/// Configuration for the token service, session manager and account
/// service.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// PEM-encoded Ed25519 private key for JWT signing.
    pub jwt_private_key_pem: String,
    /// PEM-encoded Ed25519 public key matching the signing key.
    pub jwt_public_key_pem: String,
    /// `kid` header written into every issued token.
    pub jwt_key_id: String,
    /// Public half of the key that signed tokens before the last rotation.
    pub previous_jwt_public_key_pem: Option<String>,
    pub previous_jwt_key_id: Option<String>,
    /// When the previous key stopped signing. Tokens carrying its `kid`
    /// are accepted until this instant plus the grace period.
    pub previous_key_retired_at: Option<DateTime<Utc>>,
    pub key_grace_period_secs: u64,
    /// Access token lifetime in seconds (default: 900 = 15 minutes).
    pub access_token_lifetime_secs: u64,
    /// Refresh session lifetime in seconds (default: 2_592_000 = 30 days).
    pub refresh_token_lifetime_secs: u64,
    /// Tolerated clock drift when checking `exp`.
    pub clock_skew_secs: u64,
    /// JWT issuer (`iss` claim).
    pub jwt_issuer: String,
    /// Optional pepper prepended to passwords before Argon2id.
    pub pepper: Option<String>,
    pub min_password_length: usize,
    /// Upper bound on any single storage call.
    pub storage_timeout_ms: u64,
    pub session_sweep_interval_secs: u64,
    /// Pending identity events held before new ones are dropped.
    pub event_queue_capacity: usize,
    /// How long a password recovery code stays redeemable.
    pub recovery_code_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_private_key_pem: String::new(),
            jwt_public_key_pem: String::new(),
            jwt_key_id: "primary".into(),
            previous_jwt_public_key_pem: None,
            previous_jwt_key_id: None,
            previous_key_retired_at: None,
            key_grace_period_secs: 900,
            access_token_lifetime_secs: 900,
            refresh_token_lifetime_secs: 2_592_000,
            clock_skew_secs: 30,
            jwt_issuer: "keel".into(),
            pepper: None,
            min_password_length: 8,
            storage_timeout_ms: 5_000,
            session_sweep_interval_secs: 3_600,
            event_queue_capacity: 1_024,
            recovery_code_ttl_secs: 900,
        }
    }
}

impl AuthConfig {
    /// Build from `KEEL_*` environment variables. Key material is read
    /// from the PEM files the variables point at.
    pub fn from_env() -> KeelResult<Self> {
        let defaults = Self::default();

        let previous_retired_at = optional_var("KEEL_JWT_PREVIOUS_RETIRED_AT")
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        KeelError::Config(format!("KEEL_JWT_PREVIOUS_RETIRED_AT: {e}"))
                    })
            })
            .transpose()?;

        Ok(Self {
            jwt_private_key_pem: read_pem("KEEL_JWT_PRIVATE_KEY_PATH")?,
            jwt_public_key_pem: read_pem("KEEL_JWT_PUBLIC_KEY_PATH")?,
            jwt_key_id: optional_var("KEEL_JWT_KEY_ID").unwrap_or(defaults.jwt_key_id),
            previous_jwt_public_key_pem: optional_var("KEEL_JWT_PREVIOUS_PUBLIC_KEY_PATH")
                .map(|_| read_pem("KEEL_JWT_PREVIOUS_PUBLIC_KEY_PATH"))
                .transpose()?,
            previous_jwt_key_id: optional_var("KEEL_JWT_PREVIOUS_KEY_ID"),
            previous_key_retired_at: previous_retired_at,
            key_grace_period_secs: parsed_var(
                "KEEL_JWT_KEY_GRACE_SECS",
                defaults.key_grace_period_secs,
            )?,
            access_token_lifetime_secs: parsed_var(
                "KEEL_ACCESS_TOKEN_TTL_SECS",
                defaults.access_token_lifetime_secs,
            )?,
            refresh_token_lifetime_secs: parsed_var(
                "KEEL_REFRESH_TOKEN_TTL_SECS",
                defaults.refresh_token_lifetime_secs,
            )?,
            clock_skew_secs: parsed_var("KEEL_CLOCK_SKEW_SECS", defaults.clock_skew_secs)?,
            jwt_issuer: optional_var("KEEL_JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            pepper: optional_var("KEEL_PASSWORD_PEPPER"),
            min_password_length: parsed_var(
                "KEEL_MIN_PASSWORD_LENGTH",
                defaults.min_password_length,
            )?,
            storage_timeout_ms: parsed_var("KEEL_STORAGE_TIMEOUT_MS", defaults.storage_timeout_ms)?,
            session_sweep_interval_secs: parsed_var(
                "KEEL_SESSION_SWEEP_SECS",
                defaults.session_sweep_interval_secs,
            )?,
            event_queue_capacity: parsed_var(
                "KEEL_EVENT_QUEUE_CAPACITY",
                defaults.event_queue_capacity,
            )?,
            recovery_code_ttl_secs: parsed_var(
                "KEEL_RECOVERY_CODE_TTL_SECS",
                defaults.recovery_code_ttl_secs,
            )?,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> KeelResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| KeelError::Config(format!("{name}: {e}"))),
        None => Ok(default),
    }
}

fn read_pem(name: &str) -> KeelResult<String> {
    let path = optional_var(name).ok_or_else(|| KeelError::Config(format!("{name} is not set")))?;
    std::fs::read_to_string(&path)
        .map_err(|e| KeelError::Config(format!("{name}: cannot read {path}: {e}")))
}
