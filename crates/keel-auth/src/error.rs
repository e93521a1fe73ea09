//! Authentication error types.

use keel_core::error::KeelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown username and wrong password both land here.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is inactive")]
    AccountInactive,

    #[error("session not found")]
    SessionNotFound,

    #[error("session has expired")]
    SessionExpired,

    #[error("token has expired")]
    TokenExpired,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Unknown, expired or already used recovery code.
    #[error("recovery code is invalid")]
    InvalidRecoveryCode,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Store(#[from] KeelError),
}

impl AuthError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        AuthError::Store(KeelError::ServiceUnavailable(message.into()))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
