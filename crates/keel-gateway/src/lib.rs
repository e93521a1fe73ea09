//! # keel-gateway: HTTP boundary
//!
//! | Path                              | Handler                 |
//! |-----------------------------------|-------------------------|
//! | `POST /auth/login`                | [`auth::login`]         |
//! | `POST /auth/register`             | [`auth::register`]      |
//! | `POST /auth/refresh`              | [`auth::refresh`]       |
//! | `POST /auth/logout`               | [`auth::logout`]        |
//! | `POST /auth/revoke-all/{userId}`  | [`auth::revoke_all`]    |
//! | `POST /auth/password`             | [`auth::change_password`] |
//! | `GET /auth/me`                    | [`auth::me`]            |
//! | `PATCH /auth/me`                  | [`auth::update_me`]     |
//! | `GET /auth/users`                 | [`auth::list_users`]    |
//! | `PUT /auth/users/{userId}/role`   | [`auth::change_role`]   |
//! | `PUT /auth/users/{userId}/active` | [`auth::set_active`]    |
//! | `GET /auth/audit`                 | [`auth::audit_log`]     |
//! | `GET /auth/recovery/options`      | [`auth::recovery_options`] |
//! | `POST /auth/recovery/init`        | [`auth::recovery_init`] |
//! | `POST /auth/recovery/verify`      | [`auth::recovery_verify`] |
//! | `POST /auth/recovery/reset`       | [`auth::recovery_reset`] |
//! | `GET /health`                     | liveness                |
//! | anything else                     | [`proxy::forward`]      |
//!
//! ## Middleware stack (outermost first)
//!
//! ```text
//! correlation → TraceLayer → authenticate → handler
//! ```

pub mod auth;
pub mod config;
pub mod cookies;
pub mod error;
pub mod locator;
pub mod middleware;
pub mod problem;
pub mod proxy;
pub mod routes;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

pub use config::GatewayConfig;
pub use locator::{ServiceLocator, StaticServiceLocator};
pub use routes::{RouteEntry, RouteTable};
pub use state::GatewayState;

/// Assemble the gateway router.
pub fn app(state: GatewayState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/revoke-all/{user_id}", post(auth::revoke_all))
        .route("/auth/password", post(auth::change_password))
        .route("/auth/me", get(auth::me).patch(auth::update_me))
        .route("/auth/users", get(auth::list_users))
        .route("/auth/users/{user_id}/role", put(auth::change_role))
        .route("/auth/users/{user_id}/active", put(auth::set_active))
        .route("/auth/audit", get(auth::audit_log))
        .route("/auth/recovery/options", get(auth::recovery_options))
        .route("/auth/recovery/init", post(auth::recovery_init))
        .route("/auth/recovery/verify", post(auth::recovery_verify))
        .route("/auth/recovery/reset", post(auth::recovery_reset));

    Router::new()
        .route("/health", get(health))
        .merge(auth_routes)
        .fallback(proxy::forward)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(middleware::correlation))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
