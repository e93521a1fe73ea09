//! SurrealDB implementation of [`UserRepository`].
//!
//! Case-insensitive uniqueness is enforced by a UNIQUE index on the
//! lowercase `username_key` column, so two racing registrations for
//! `Alice` and `alice` cannot both commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_core::clock::{Clock, SystemClock};
use keel_core::error::KeelResult;
use keel_core::models::user::{CreateUser, Role, UpdateProfile, User, username_key};
use keel_core::repository::{PaginatedResult, Pagination, UserRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::CountRow;
use crate::error::DbError;

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct UserRow {
    username: String,
    password_hash: String,
    display_name: String,
    phone: Option<String>,
    messenger_handle: Option<String>,
    active: bool,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct UserRowWithId {
    record_id: String,
    username: String,
    password_hash: String,
    display_name: String,
    phone: Option<String>,
    messenger_handle: Option<String>,
    active: bool,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, id: Uuid) -> Result<User, DbError> {
        Ok(User {
            id,
            username: self.username,
            password_hash: self.password_hash,
            display_name: self.display_name,
            phone: self.phone,
            messenger_handle: self.messenger_handle,
            active: self.active,
            role: self.role.parse::<Role>().map_err(DbError::Decode)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl UserRowWithId {
    fn try_into_user(self) -> Result<User, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::Decode(format!("invalid user UUID: {e}")))?;
        UserRow {
            username: self.username,
            password_hash: self.password_hash,
            display_name: self.display_name,
            phone: self.phone,
            messenger_handle: self.messenger_handle,
            active: self.active,
            role: self.role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_user(id)
    }
}

/// SurrealDB implementation of the User repository.
#[derive(Clone)]
pub struct SurrealUserRepository<C: Connection> {
    db: Surreal<C>,
    clock: Arc<dyn Clock>,
}

impl<C: Connection> SurrealUserRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    /// Timestamps written by this repository come from `clock`.
    pub fn with_clock(db: Surreal<C>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl<C: Connection> UserRepository for SurrealUserRepository<C> {
    async fn create(&self, input: CreateUser) -> KeelResult<User> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let now = self.clock.now();

        let result = self
            .db
            .query(
                "CREATE type::record('user', $id) SET \
                 username = $username, username_key = $username_key, \
                 password_hash = $password_hash, \
                 display_name = $display_name, \
                 phone = $phone, messenger_handle = $messenger_handle, \
                 active = true, role = $role, \
                 created_at = $now, updated_at = $now",
            )
            .bind(("id", id_str.clone()))
            .bind(("username_key", username_key(&input.username)))
            .bind(("username", input.username))
            .bind(("password_hash", input.password_hash))
            .bind(("display_name", input.display_name))
            .bind(("phone", input.phone))
            .bind(("messenger_handle", input.messenger_handle))
            .bind(("role", input.role.as_str().to_string()))
            .bind(("now", now))
            .await
            .map_err(|e| DbError::classify(e, "user"))?;

        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "user"))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: id_str,
        })?;

        Ok(row.into_user(id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> KeelResult<User> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('user', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: id_str,
        })?;

        Ok(row.into_user(id)?)
    }

    async fn find_by_username(&self, username: &str) -> KeelResult<Option<User>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM user \
                 WHERE username_key = $username_key LIMIT 1",
            )
            .bind(("username_key", username_key(username)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_user()?)),
            None => Ok(None),
        }
    }

    async fn update_profile(&self, id: Uuid, input: UpdateProfile) -> KeelResult<User> {
        if input.is_empty() {
            return self.get_by_id(id).await;
        }
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.display_name.is_some() {
            sets.push("display_name = $display_name");
        }
        if input.phone.is_some() {
            sets.push("phone = $phone");
        }
        if input.messenger_handle.is_some() {
            sets.push("messenger_handle = $messenger_handle");
        }
        sets.push("updated_at = $now");

        let query = format!(
            "UPDATE type::record('user', $id) SET {}",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .bind(("now", self.clock.now()));

        if let Some(display_name) = input.display_name {
            builder = builder.bind(("display_name", display_name));
        }
        if let Some(phone) = input.phone {
            // Some(None) clears the field.
            builder = builder.bind(("phone", phone));
        }
        if let Some(handle) = input.messenger_handle {
            builder = builder.bind(("messenger_handle", handle));
        }

        let result = builder.await.map_err(|e| DbError::classify(e, "user"))?;
        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "user"))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: id_str,
        })?;

        Ok(row.into_user(id)?)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> KeelResult<User> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('user', $id) SET \
                 active = $active, updated_at = $now",
            )
            .bind(("id", id_str.clone()))
            .bind(("active", active))
            .bind(("now", self.clock.now()))
            .await
            .map_err(|e| DbError::classify(e, "user"))?;
        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "user"))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: id_str,
        })?;

        Ok(row.into_user(id)?)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> KeelResult<User> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('user', $id) SET \
                 role = $role, updated_at = $now",
            )
            .bind(("id", id_str.clone()))
            .bind(("role", role.as_str().to_string()))
            .bind(("now", self.clock.now()))
            .await
            .map_err(|e| DbError::classify(e, "user"))?;
        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "user"))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: id_str,
        })?;

        Ok(row.into_user(id)?)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> KeelResult<()> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('user', $id) SET \
                 password_hash = $password_hash, updated_at = $now",
            )
            .bind(("id", id_str.clone()))
            .bind(("password_hash", password_hash.to_string()))
            .bind(("now", self.clock.now()))
            .await
            .map_err(|e| DbError::classify(e, "user"))?;
        let mut result = result
            .check()
            .map_err(|e| DbError::classify(e, "user"))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return Err(DbError::NotFound {
                entity: "user".into(),
                id: id_str,
            }
            .into());
        }
        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> KeelResult<PaginatedResult<User>> {
        let pagination = pagination.clamped();

        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM user GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM user \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_user())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
