//! Integration tests for the session store using in-memory SurrealDB.

use chrono::{Duration, Utc};
use keel_core::models::session::CreateSession;
use keel_core::repository::SessionRepository;
use keel_db::repository::SurrealSessionRepository;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> SurrealSessionRepository<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keel_db::run_migrations(&db).await.unwrap();
    SurrealSessionRepository::new(db)
}

fn session(hash: &str, user_id: Uuid, ttl: Duration) -> CreateSession {
    let now = Utc::now();
    CreateSession {
        token_hash: hash.into(),
        user_id,
        expires_at: now + ttl,
        created_at: now,
    }
}

#[tokio::test]
async fn create_and_lookup_by_hash() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();

    let created = repo
        .create(session("aa11", user_id, Duration::days(30)))
        .await
        .unwrap();
    assert_eq!(created.token_hash, "aa11");

    let found = repo.get_by_token_hash("aa11").await.unwrap().unwrap();
    assert_eq!(found.user_id, user_id);
    assert!(repo.get_by_token_hash("bb22").await.unwrap().is_none());
}

#[tokio::test]
async fn rotate_consumes_old_session_once() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();
    repo.create(session("old", user_id, Duration::days(30)))
        .await
        .unwrap();

    let rotated = repo
        .rotate("old", session("new", user_id, Duration::days(30)))
        .await
        .unwrap();
    assert_eq!(rotated.unwrap().token_hash, "new");
    assert!(repo.get_by_token_hash("old").await.unwrap().is_none());

    let replay = repo
        .rotate("old", session("newer", user_id, Duration::days(30)))
        .await
        .unwrap();
    assert!(replay.is_none());
    assert!(repo.get_by_token_hash("newer").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotations_have_one_winner() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();
    repo.create(session("shared", user_id, Duration::days(30)))
        .await
        .unwrap();

    let contenders: Vec<_> = (0..8)
        .map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.rotate("shared", session(&format!("from-{i}"), user_id, Duration::days(30)))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in contenders {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(repo.count_user_sessions(user_id).await.unwrap(), 1);
}

#[tokio::test]
async fn failed_rotation_keeps_the_old_session() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();
    repo.create(session("old", user_id, Duration::days(30)))
        .await
        .unwrap();
    repo.create(session("taken", user_id, Duration::days(30)))
        .await
        .unwrap();

    let result = repo
        .rotate("old", session("taken", user_id, Duration::days(30)))
        .await;

    assert!(result.is_err(), "got {result:?}");
    assert!(repo.get_by_token_hash("old").await.unwrap().is_some());
    assert_eq!(repo.count_user_sessions(user_id).await.unwrap(), 2);

    // The untouched session can still be rotated afterwards.
    let retried = repo
        .rotate("old", session("fresh", user_id, Duration::days(30)))
        .await
        .unwrap();
    assert_eq!(retried.unwrap().token_hash, "fresh");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();
    repo.create(session("gone", user_id, Duration::days(1)))
        .await
        .unwrap();

    let first = repo.delete("gone").await.unwrap();
    assert_eq!(first.unwrap().user_id, user_id);
    assert!(repo.delete("gone").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_user_sessions_counts_and_scopes() {
    let repo = setup().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    for hash in ["a1", "a2", "a3"] {
        repo.create(session(hash, alice, Duration::days(1)))
            .await
            .unwrap();
    }
    repo.create(session("b1", bob, Duration::days(1)))
        .await
        .unwrap();

    assert_eq!(repo.delete_user_sessions(alice).await.unwrap(), 3);
    assert_eq!(repo.count_user_sessions(alice).await.unwrap(), 0);
    assert_eq!(repo.count_user_sessions(bob).await.unwrap(), 1);
    assert_eq!(repo.delete_user_sessions(alice).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_expired_removes_only_past_sessions() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();
    repo.create(session("stale", user_id, Duration::seconds(-10)))
        .await
        .unwrap();
    repo.create(session("fresh", user_id, Duration::hours(1)))
        .await
        .unwrap();

    assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 1);
    assert!(repo.get_by_token_hash("stale").await.unwrap().is_none());
    assert!(repo.get_by_token_hash("fresh").await.unwrap().is_some());
    // A second sweep over the same window is a no-op.
    assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 0);
}
