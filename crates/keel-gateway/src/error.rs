//! # API Error Types
//!
//! Maps auth and store failures to HTTP statuses and problem bodies.
//! Storage and internal details are logged, never returned to the caller.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keel_auth::AuthError;
use keel_core::error::KeelError;
use thiserror::Error;

use crate::problem::ProblemDraft;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// No route table entry matches the path.
    #[error("no route for {0}")]
    NoRoute(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// The service locator does not know the backend.
    #[error("service {0} is not available")]
    ServiceUnresolved(String),

    #[error("upstream {service} failed: {message}")]
    Upstream { service: String, message: String },

    #[error("upstream {0} timed out")]
    UpstreamTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<KeelError> for ApiError {
    fn from(err: KeelError) -> Self {
        ApiError::Auth(AuthError::Store(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

const CREDENTIALS_REJECTED: &str = "Credentials rejected";

impl ApiError {
    pub fn draft(&self) -> ProblemDraft {
        match self {
            ApiError::Auth(err) => auth_draft(err),
            ApiError::NoRoute(path) => {
                ProblemDraft::new(StatusCode::NOT_FOUND, "not-found", "Not found")
                    .detail(format!("no route for {path}"))
            }
            ApiError::Unauthenticated => ProblemDraft::new(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication required",
            ),
            ApiError::BadRequest(detail) => {
                ProblemDraft::new(StatusCode::BAD_REQUEST, "bad-request", "Bad request")
                    .detail(detail.clone())
            }
            ApiError::PayloadTooLarge(_) => ProblemDraft::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload-too-large",
                "Payload too large",
            )
            .detail(self.to_string()),
            ApiError::ServiceUnresolved(_) => ProblemDraft::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "service-unavailable",
                "Service unavailable",
            )
            .detail(self.to_string()),
            ApiError::Upstream { service, .. } => {
                ProblemDraft::new(StatusCode::BAD_GATEWAY, "bad-gateway", "Bad gateway")
                    .detail(format!("upstream {service} could not be reached"))
            }
            ApiError::UpstreamTimeout(_) => ProblemDraft::new(
                StatusCode::GATEWAY_TIMEOUT,
                "gateway-timeout",
                "Gateway timeout",
            )
            .detail(self.to_string()),
            ApiError::Internal(_) => internal(),
        }
    }
}

fn internal() -> ProblemDraft {
    ProblemDraft::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "Internal server error",
    )
    .detail("an internal error occurred")
}

fn auth_draft(err: &AuthError) -> ProblemDraft {
    match err {
        AuthError::InvalidCredentials => ProblemDraft::new(
            StatusCode::UNAUTHORIZED,
            "invalid-credentials",
            CREDENTIALS_REJECTED,
        )
        .detail("invalid username or password"),
        AuthError::AccountInactive => ProblemDraft::new(
            StatusCode::FORBIDDEN,
            "account-inactive",
            CREDENTIALS_REJECTED,
        )
        .detail("account is inactive"),
        AuthError::SessionNotFound => ProblemDraft::new(
            StatusCode::UNAUTHORIZED,
            "session-not-found",
            "Session not found",
        )
        .detail("sign in again"),
        AuthError::SessionExpired => ProblemDraft::new(
            StatusCode::UNAUTHORIZED,
            "session-expired",
            "Session expired",
        )
        .detail("sign in again"),
        AuthError::TokenExpired => {
            ProblemDraft::new(StatusCode::UNAUTHORIZED, "token-expired", "Token expired")
        }
        AuthError::InvalidSignature | AuthError::MalformedToken(_) => {
            ProblemDraft::new(StatusCode::UNAUTHORIZED, "invalid-token", "Invalid token")
        }
        AuthError::InvalidRecoveryCode => ProblemDraft::new(
            StatusCode::BAD_REQUEST,
            "invalid-recovery-code",
            "Recovery code rejected",
        )
        .detail("the code is wrong, expired or already used"),
        AuthError::Forbidden(reason) => {
            ProblemDraft::new(StatusCode::FORBIDDEN, "forbidden", "Forbidden").detail(reason.clone())
        }
        AuthError::Crypto(_) => internal(),
        AuthError::Store(store) => store_draft(store),
    }
}

fn store_draft(err: &KeelError) -> ProblemDraft {
    match err {
        KeelError::Validation { message, fields } => {
            ProblemDraft::new(StatusCode::BAD_REQUEST, "validation", "Invalid request")
                .detail(message.clone())
                .errors(fields.clone())
        }
        KeelError::AlreadyExists { entity } => {
            ProblemDraft::new(StatusCode::CONFLICT, "conflict", "Conflict")
                .detail(format!("{entity} already exists"))
        }
        KeelError::NotFound { entity, .. } => {
            ProblemDraft::new(StatusCode::NOT_FOUND, "not-found", "Not found")
                .detail(format!("{entity} not found"))
        }
        KeelError::ServiceUnavailable(_) => ProblemDraft::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service-unavailable",
            "Service unavailable",
        )
        .detail("a backing store is temporarily unavailable, retry later"),
        KeelError::Database(_)
        | KeelError::Config(_)
        | KeelError::Crypto(_)
        | KeelError::Internal(_) => internal(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let draft = self.draft();
        if draft.status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!(error = %self, "service unavailable");
        } else if draft.status.is_server_error() {
            tracing::error!(error = %self, status = draft.status.as_u16(), "request failed");
        }
        draft.into_response()
    }
}
