//! Database-specific error types and conversions.

use keel_core::error::KeelError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt row: {0}")]
    Decode(String),

    #[error("Duplicate {entity}")]
    Duplicate { entity: String },

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

impl DbError {
    /// Sort a failed statement into unique-index violations, transaction
    /// conflicts and everything else.
    pub(crate) fn classify(err: surrealdb::Error, entity: &str) -> Self {
        let message = err.to_string();
        if message.contains("already contains") {
            DbError::Duplicate {
                entity: entity.to_string(),
            }
        } else if message.to_ascii_lowercase().contains("conflict") {
            DbError::WriteConflict(message)
        } else {
            DbError::Query(message)
        }
    }
}

impl From<DbError> for KeelError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => KeelError::NotFound { entity, id },
            DbError::Duplicate { entity } => KeelError::AlreadyExists { entity },
            other => KeelError::Database(other.to_string()),
        }
    }
}
