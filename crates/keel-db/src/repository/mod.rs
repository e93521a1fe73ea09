//! SurrealDB repository implementations.

mod audit;
mod outbox;
mod recovery;
mod session;
mod user;

pub use audit::SurrealAuditLogRepository;
pub use outbox::SurrealEventOutbox;
pub use recovery::SurrealRecoveryCodeRepository;
pub use session::SurrealSessionRepository;
pub use user::SurrealUserRepository;

use surrealdb_types::SurrealValue;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub total: u64,
}
