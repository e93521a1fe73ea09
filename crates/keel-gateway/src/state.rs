//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use keel_auth::{AccountService, RecoveryService, SessionManager};
use keel_core::error::{KeelError, KeelResult};
use keel_db::repository::{
    SurrealAuditLogRepository, SurrealRecoveryCodeRepository, SurrealSessionRepository,
    SurrealUserRepository,
};
use surrealdb::engine::any::Any;

use crate::config::GatewayConfig;
use crate::cookies::CookiePolicy;
use crate::locator::ServiceLocator;
use crate::routes::RouteTable;

pub type UserStore = SurrealUserRepository<Any>;
pub type SessionStore = SurrealSessionRepository<Any>;
pub type AuditStore = SurrealAuditLogRepository<Any>;
pub type RecoveryStore = SurrealRecoveryCodeRepository<Any>;
pub type Sessions = SessionManager<UserStore, SessionStore, AuditStore>;
pub type Accounts = AccountService<UserStore, SessionStore, AuditStore>;
pub type Recovery = RecoveryService<UserStore, SessionStore, AuditStore, RecoveryStore>;

#[derive(Clone)]
pub struct GatewayState {
    pub sessions: Arc<Sessions>,
    pub accounts: Arc<Accounts>,
    pub recovery: Arc<Recovery>,
    pub routes: Arc<RouteTable>,
    pub locator: Arc<dyn ServiceLocator>,
    pub http: reqwest::Client,
    pub cookies: CookiePolicy,
    pub config: Arc<GatewayConfig>,
}

impl GatewayState {
    pub fn new(
        accounts: Arc<Accounts>,
        recovery: Arc<Recovery>,
        locator: Arc<dyn ServiceLocator>,
        config: GatewayConfig,
    ) -> KeelResult<Self> {
        let routes = RouteTable::new(config.routes.clone())?;
        // Redirects are the caller's business, not ours.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_millis(config.upstream_timeout_ms))
            .build()
            .map_err(|e| KeelError::Config(format!("http client: {e}")))?;
        let sessions = accounts.sessions().clone();
        let cookies = CookiePolicy::new(&config, sessions.config());
        Ok(Self {
            sessions,
            accounts,
            recovery,
            routes: Arc::new(routes),
            locator,
            http,
            cookies,
            config: Arc::new(config),
        })
    }
}
