//! Integration tests for the identity store using in-memory SurrealDB.

use std::sync::Arc;

use chrono::Duration;
use keel_core::clock::{Clock, ManualClock};
use keel_core::error::KeelError;
use keel_core::models::user::{CreateUser, Role, UpdateProfile};
use keel_core::repository::{Pagination, UserRepository};
use keel_db::repository::SurrealUserRepository;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};

async fn setup() -> (SurrealUserRepository<Db>, Arc<ManualClock>) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keel_db::run_migrations(&db).await.unwrap();
    let clock = Arc::new(ManualClock::default());
    (SurrealUserRepository::with_clock(db, clock.clone()), clock)
}

fn candidate(username: &str) -> CreateUser {
    CreateUser {
        username: username.into(),
        password_hash: "$argon2id$placeholder".into(),
        display_name: "Alice Liddell".into(),
        phone: Some("+79991234567".into()),
        messenger_handle: None,
        role: Role::Member,
    }
}

#[tokio::test]
async fn create_and_get_user() {
    let (repo, clock) = setup().await;

    let user = repo.create(candidate("alice")).await.unwrap();
    assert_eq!(user.username, "alice");
    assert_eq!(user.role, Role::Member);
    assert!(user.active);
    assert_eq!(user.created_at, clock.now());

    let fetched = repo.get_by_id(user.id).await.unwrap();
    assert_eq!(fetched.id, user.id);
    assert_eq!(fetched.phone.as_deref(), Some("+79991234567"));
}

#[tokio::test]
async fn username_is_unique_ignoring_case() {
    let (repo, _) = setup().await;

    repo.create(candidate("alice")).await.unwrap();
    let err = repo.create(candidate("ALICE")).await.unwrap_err();
    assert!(
        matches!(err, KeelError::AlreadyExists { ref entity } if entity == "user"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn find_by_username_ignores_case() {
    let (repo, _) = setup().await;

    let user = repo.create(candidate("Alice")).await.unwrap();
    let found = repo.find_by_username("aLiCe").await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(found.username, "Alice");

    assert!(repo.find_by_username("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn update_profile_merges_only_supplied_fields() {
    let (repo, clock) = setup().await;
    let user = repo.create(candidate("alice")).await.unwrap();

    clock.advance(Duration::minutes(5));
    let updated = repo
        .update_profile(
            user.id,
            UpdateProfile {
                messenger_handle: Some(Some("@alice_rafts".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.display_name, "Alice Liddell");
    assert_eq!(updated.phone.as_deref(), Some("+79991234567"));
    assert_eq!(updated.messenger_handle.as_deref(), Some("@alice_rafts"));
    assert_eq!(updated.updated_at, user.created_at + Duration::minutes(5));

    let cleared = repo
        .update_profile(
            user.id,
            UpdateProfile {
                phone: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(cleared.phone.is_none());
    assert_eq!(cleared.messenger_handle.as_deref(), Some("@alice_rafts"));
}

#[tokio::test]
async fn update_profile_of_missing_user_is_not_found() {
    let (repo, _) = setup().await;

    let err = repo
        .update_profile(
            uuid::Uuid::new_v4(),
            UpdateProfile {
                display_name: Some("Nobody".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn set_active_is_idempotent() {
    let (repo, _) = setup().await;
    let user = repo.create(candidate("alice")).await.unwrap();

    assert!(!repo.set_active(user.id, false).await.unwrap().active);
    assert!(!repo.set_active(user.id, false).await.unwrap().active);
    assert!(repo.set_active(user.id, true).await.unwrap().active);
}

#[tokio::test]
async fn role_and_password_updates() {
    let (repo, _) = setup().await;
    let user = repo.create(candidate("alice")).await.unwrap();

    let promoted = repo.set_role(user.id, Role::Organizer).await.unwrap();
    assert_eq!(promoted.role, Role::Organizer);

    repo.set_password_hash(user.id, "$argon2id$new").await.unwrap();
    let fetched = repo.get_by_id(user.id).await.unwrap();
    assert_eq!(fetched.password_hash, "$argon2id$new");

    let err = repo
        .set_password_hash(uuid::Uuid::new_v4(), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::NotFound { .. }));
}

#[tokio::test]
async fn list_users_paginates() {
    let (repo, clock) = setup().await;
    for name in ["anna", "boris", "clara"] {
        repo.create(candidate(name)).await.unwrap();
        clock.advance(Duration::seconds(1));
    }

    let page = repo
        .list(Pagination {
            offset: 1,
            limit: 1,
        })
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].username, "boris");
}
