//! keel server: identity, sessions and the API gateway in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use keel_auth::{
    AccountService, AuthConfig, EventPublisher, RecoveryService, SessionManager, TokenService,
    spawn_sweeper,
};
use keel_core::clock::{Clock, SystemClock};
use keel_db::repository::{
    SurrealAuditLogRepository, SurrealEventOutbox, SurrealRecoveryCodeRepository,
    SurrealSessionRepository, SurrealUserRepository,
};
use keel_db::{DbConfig, DbManager};
use keel_gateway::{GatewayConfig, GatewayState, StaticServiceLocator};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keel=info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    tracing::info!("Starting keel server...");

    let db_config = DbConfig::from_env().context("database configuration")?;
    let auth_config = AuthConfig::from_env().context("auth configuration")?;
    let gateway_config = GatewayConfig::from_env().context("gateway configuration")?;

    let db = DbManager::connect(&db_config)
        .await
        .context("connecting to SurrealDB")?;
    keel_db::run_migrations(db.client())
        .await
        .context("applying schema migrations")?;
    let client = db.client().clone();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens = Arc::new(
        TokenService::new(&auth_config, clock.clone()).context("loading signing keys")?,
    );
    let sweep_every = Duration::from_secs(auth_config.session_sweep_interval_secs);
    let queue_capacity = auth_config.event_queue_capacity;

    let sessions = Arc::new(SessionManager::new(
        SurrealUserRepository::with_clock(client.clone(), clock.clone()),
        SurrealSessionRepository::new(client.clone()),
        SurrealAuditLogRepository::new(client.clone()),
        tokens,
        clock.clone(),
        auth_config,
    ));
    let (events, event_worker) =
        EventPublisher::spawn(SurrealEventOutbox::new(client.clone()), queue_capacity, clock);
    let accounts = Arc::new(AccountService::new(sessions.clone(), events.clone()));
    let recovery = Arc::new(RecoveryService::new(
        sessions.clone(),
        SurrealRecoveryCodeRepository::new(client),
        events,
    ));
    let sweepers = [
        spawn_sweeper(sessions, sweep_every),
        spawn_sweeper(recovery.clone(), sweep_every),
    ];

    let listen_addr = gateway_config.listen_addr;
    let locator = Arc::new(StaticServiceLocator::new(gateway_config.services.clone()));
    let state = GatewayState::new(accounts, recovery, locator, gateway_config)
        .context("building gateway state")?;
    let app = keel_gateway::app(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    tracing::info!(%listen_addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    for sweeper in &sweepers {
        sweeper.abort();
    }
    // The router owned the last publisher; give the worker a moment to drain.
    if tokio::time::timeout(Duration::from_secs(5), event_worker).await.is_err() {
        tracing::warn!("Event worker did not drain before shutdown");
    }
    tracing::info!("keel server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
