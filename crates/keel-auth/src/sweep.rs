//! Periodic removal of expired sessions and recovery codes.

use std::sync::Arc;
use std::time::Duration;

use keel_core::repository::{
    AuditLogRepository, RecoveryCodeRepository, SessionRepository, UserRepository,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::AuthResult;
use crate::recovery::RecoveryService;
use crate::service::SessionManager;

/// A store whose records lapse and need clearing out.
pub trait Sweep: Send + Sync + 'static {
    /// Used in log lines.
    const KIND: &'static str;

    /// Remove lapsed records; returns how many.
    fn sweep(&self) -> impl Future<Output = AuthResult<u64>> + Send;
}

impl<U, S, A> Sweep for SessionManager<U, S, A>
where
    U: UserRepository + 'static,
    S: SessionRepository + 'static,
    A: AuditLogRepository + 'static,
{
    const KIND: &'static str = "sessions";

    async fn sweep(&self) -> AuthResult<u64> {
        self.sweep_expired().await
    }
}

impl<U, S, A, R> Sweep for RecoveryService<U, S, A, R>
where
    U: UserRepository + 'static,
    S: SessionRepository + 'static,
    A: AuditLogRepository + 'static,
    R: RecoveryCodeRepository + 'static,
{
    const KIND: &'static str = "recovery codes";

    async fn sweep(&self) -> AuthResult<u64> {
        self.sweep_expired().await
    }
}

/// Run [`Sweep::sweep`] every `every`, starting one period from now.
/// Abort the handle to stop.
pub fn spawn_sweeper<T: Sweep>(target: Arc<T>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match target.sweep().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, kind = T::KIND, "Swept expired records"),
                Err(e) => warn!(kind = T::KIND, error = %e, "Sweep failed"),
            }
        }
    })
}
