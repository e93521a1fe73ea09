//! Schema definitions and migration runner for SurrealDB.
//!
//! Tables are SCHEMAFULL. UUIDs are stored as strings and enums as
//! strings with ASSERT constraints.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "identity_and_sessions",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        name: "recovery_codes",
        sql: SCHEMA_V2,
    },
];

// -----------------------------------------------------------------------
// Schema v1
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Users. Record id is the user UUID. Never deleted.
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD username ON TABLE user TYPE string;
DEFINE FIELD username_key ON TABLE user TYPE string;
DEFINE FIELD password_hash ON TABLE user TYPE string;
DEFINE FIELD display_name ON TABLE user TYPE string;
DEFINE FIELD phone ON TABLE user TYPE option<string>;
DEFINE FIELD messenger_handle ON TABLE user TYPE option<string>;
DEFINE FIELD active ON TABLE user TYPE bool DEFAULT true;
DEFINE FIELD role ON TABLE user TYPE string \
    ASSERT $value IN ['ROLE_USER', 'ROLE_ORGANIZER', 'ROLE_ADMIN'];
DEFINE FIELD created_at ON TABLE user TYPE datetime;
DEFINE FIELD updated_at ON TABLE user TYPE datetime;
DEFINE INDEX idx_user_username_key ON TABLE user \
    COLUMNS username_key UNIQUE;

-- =======================================================================
-- Refresh sessions. Record id is the SHA-256 of the refresh token.
-- =======================================================================
DEFINE TABLE session SCHEMAFULL;
DEFINE FIELD user_id ON TABLE session TYPE string;
DEFINE FIELD expires_at ON TABLE session TYPE datetime;
DEFINE FIELD created_at ON TABLE session TYPE datetime;
DEFINE INDEX idx_session_user ON TABLE session COLUMNS user_id;
DEFINE INDEX idx_session_expiry ON TABLE session COLUMNS expires_at;

-- =======================================================================
-- Audit log (append-only)
-- =======================================================================
DEFINE TABLE audit_log SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD actor_id ON TABLE audit_log TYPE option<string>;
DEFINE FIELD action ON TABLE audit_log TYPE string;
DEFINE FIELD target_type ON TABLE audit_log TYPE string;
DEFINE FIELD target_id ON TABLE audit_log TYPE string;
DEFINE FIELD payload ON TABLE audit_log TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD created_at ON TABLE audit_log TYPE datetime;
DEFINE INDEX idx_audit_time ON TABLE audit_log COLUMNS created_at;
DEFINE INDEX idx_audit_actor ON TABLE audit_log COLUMNS actor_id;
DEFINE INDEX idx_audit_target ON TABLE audit_log \
    COLUMNS target_type, target_id;

-- =======================================================================
-- Event outbox, drained by downstream consumers.
-- =======================================================================
DEFINE TABLE outbox SCHEMAFULL;
DEFINE FIELD topic ON TABLE outbox TYPE string;
DEFINE FIELD payload ON TABLE outbox TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD created_at ON TABLE outbox TYPE datetime;
DEFINE INDEX idx_outbox_time ON TABLE outbox COLUMNS created_at;
";

// -----------------------------------------------------------------------
// Schema v2
// -----------------------------------------------------------------------

const SCHEMA_V2: &str = "\
-- =======================================================================
-- Password recovery codes. Record id is SHA-256 of user id and code.
-- =======================================================================
DEFINE TABLE recovery_code SCHEMAFULL;
DEFINE FIELD user_id ON TABLE recovery_code TYPE string;
DEFINE FIELD expires_at ON TABLE recovery_code TYPE datetime;
DEFINE FIELD used_at ON TABLE recovery_code TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE recovery_code TYPE datetime;
DEFINE INDEX idx_recovery_user ON TABLE recovery_code COLUMNS user_id;
DEFINE INDEX idx_recovery_expiry ON TABLE recovery_code COLUMNS expires_at;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "failed to record v{}: {}",
                    migration.version, e,
                ))
            })?;
    }

    Ok(())
}

/// Raw DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}

/// Raw DDL for version 2.
pub fn schema_v2() -> &'static str {
    SCHEMA_V2
}
