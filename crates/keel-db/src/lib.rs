//! keel storage: SurrealDB connection management and the store
//! implementations behind the `keel-core` repository traits.
//!
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema bootstrap ([`run_migrations`])
//! - Identity, session, recovery, audit and outbox stores ([`repository`])

mod connection;
mod error;
pub mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use schema::{run_migrations, schema_v1, schema_v2};
