//! Correlation id and authentication middleware, plus the extractors
//! handlers use to demand an authenticated caller.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use keel_auth::{AccessTokenClaims, AuthError};
use keel_core::models::user::Role;
use tracing::Instrument;
use uuid::Uuid;

use crate::cookies::ACCESS_COOKIE;
use crate::error::ApiError;
use crate::problem::ProblemDraft;
use crate::state::GatewayState;

pub static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation id of the current request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Attaches a correlation id to the request, the span and the response,
/// and finishes any problem body with the request path and that id.
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_owned);
    let id = match incoming {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request.headers_mut().insert(REQUEST_ID.clone(), value);
            }
            id
        }
    };
    let path = request.uri().path().to_owned();
    request.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %path,
    );
    let mut response = next.run(request).instrument(span).await;

    if let Some(draft) = response.extensions_mut().remove::<ProblemDraft>() {
        response = draft.render(Some(&path), Some(&id));
    }
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID.clone(), value);
    }
    response
}

/// Why a presented token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    BadSignature,
    Malformed,
}

impl From<TokenRejection> for AuthError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Expired => AuthError::TokenExpired,
            TokenRejection::BadSignature => AuthError::InvalidSignature,
            TokenRejection::Malformed => AuthError::MalformedToken("unreadable token".into()),
        }
    }
}

/// Outcome of looking for an access token on the request.
#[derive(Debug, Clone)]
pub enum Authentication {
    Anonymous,
    Authenticated(AccessTokenClaims),
    Rejected(TokenRejection),
}

impl Authentication {
    pub fn claims(&self) -> Option<&AccessTokenClaims> {
        match self {
            Authentication::Authenticated(claims) => Some(claims),
            _ => None,
        }
    }

    /// The claims, or the error a protected resource should answer with.
    pub fn require(&self) -> Result<&AccessTokenClaims, ApiError> {
        match self {
            Authentication::Authenticated(claims) => Ok(claims),
            Authentication::Anonymous => Err(ApiError::Unauthenticated),
            Authentication::Rejected(rejection) => Err(AuthError::from(*rejection).into()),
        }
    }
}

/// Prefers the `Authorization` header, falling back to the access cookie.
/// A header without the `Bearer` scheme is taken as the raw token.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_owned());
    }
    if let Some(raw) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(raw.to_owned());
    }
    CookieJar::from_headers(headers)
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
}

/// Verifies whatever access token the request carries and records the
/// outcome. Never rejects on its own; routes decide what they require.
pub async fn authenticate(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let outcome = match access_token(request.headers()) {
        None => Authentication::Anonymous,
        Some(token) => match state.sessions.tokens().verify(&token) {
            Ok(claims) => Authentication::Authenticated(claims),
            Err(err) => {
                tracing::debug!(error = %err, "access token rejected");
                Authentication::Rejected(match err {
                    AuthError::TokenExpired => TokenRejection::Expired,
                    AuthError::InvalidSignature => TokenRejection::BadSignature,
                    _ => TokenRejection::Malformed,
                })
            }
        },
    };
    request.extensions_mut().insert(outcome);
    next.run(request).await
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Caller(pub AccessTokenClaims);

impl Caller {
    pub fn user_id(&self) -> Result<Uuid, ApiError> {
        Ok(self.0.user_id()?)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Authentication>() {
            Some(auth) => Ok(Caller(auth.require()?.clone())),
            None => Err(ApiError::Unauthenticated),
        }
    }
}

/// An authenticated caller holding the administrator role.
#[derive(Debug, Clone)]
pub struct Admin(pub Caller);

impl<S: Send + Sync> FromRequestParts<S> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if caller.0.role != Role::Admin {
            return Err(AuthError::Forbidden("administrator role required".into()).into());
        }
        Ok(Admin(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_beats_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        headers.insert(header::COOKIE, HeaderValue::from_static("access=from-cookie"));
        assert_eq!(access_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn raw_authorization_value_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("abc.def.ghi"));
        assert_eq!(access_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn falls_back_to_access_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access=from-cookie"),
        );
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));

        let empty = HeaderMap::new();
        assert!(access_token(&empty).is_none());
    }

    #[test]
    fn rejected_tokens_fail_protected_resources() {
        let err = Authentication::Rejected(TokenRejection::Expired)
            .require()
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::TokenExpired)));
        assert!(matches!(
            Authentication::Anonymous.require().unwrap_err(),
            ApiError::Unauthenticated
        ));
    }
}
