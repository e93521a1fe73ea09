//! Integration tests for the recovery code store using in-memory SurrealDB.

use chrono::{Duration, Utc};
use keel_core::models::recovery::CreateRecoveryCode;
use keel_core::repository::RecoveryCodeRepository;
use keel_db::repository::SurrealRecoveryCodeRepository;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> SurrealRecoveryCodeRepository<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keel_db::run_migrations(&db).await.unwrap();
    SurrealRecoveryCodeRepository::new(db)
}

fn code(hash: &str, user_id: Uuid, ttl: Duration) -> CreateRecoveryCode {
    let now = Utc::now();
    CreateRecoveryCode {
        code_hash: hash.into(),
        user_id,
        expires_at: now + ttl,
        created_at: now,
    }
}

#[tokio::test]
async fn redeem_marks_code_used_once() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();
    repo.replace(code("c1", user_id, Duration::minutes(15)))
        .await
        .unwrap();

    let now = Utc::now();
    assert!(repo.find_redeemable("c1", now).await.unwrap().is_some());

    let redeemed = repo.redeem("c1", now).await.unwrap().unwrap();
    assert_eq!(redeemed.user_id, user_id);
    assert!(redeemed.used_at.is_some());

    assert!(repo.redeem("c1", now).await.unwrap().is_none());
    assert!(repo.find_redeemable("c1", now).await.unwrap().is_none());
}

#[tokio::test]
async fn expired_and_unknown_codes_are_not_redeemable() {
    let repo = setup().await;
    let user_id = Uuid::new_v4();
    repo.replace(code("stale", user_id, Duration::seconds(-1)))
        .await
        .unwrap();

    let now = Utc::now();
    assert!(repo.find_redeemable("stale", now).await.unwrap().is_none());
    assert!(repo.redeem("stale", now).await.unwrap().is_none());
    assert!(repo.redeem("never-issued", now).await.unwrap().is_none());
}

#[tokio::test]
async fn replace_drops_earlier_unused_codes() {
    let repo = setup().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    repo.replace(code("a1", alice, Duration::minutes(15)))
        .await
        .unwrap();
    repo.replace(code("b1", bob, Duration::minutes(15)))
        .await
        .unwrap();
    repo.replace(code("a2", alice, Duration::minutes(15)))
        .await
        .unwrap();

    let now = Utc::now();
    assert!(repo.find_redeemable("a1", now).await.unwrap().is_none());
    assert!(repo.find_redeemable("a2", now).await.unwrap().is_some());
    assert!(repo.find_redeemable("b1", now).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_expired_keeps_live_codes() {
    let repo = setup().await;
    repo.replace(code("old", Uuid::new_v4(), Duration::seconds(-10)))
        .await
        .unwrap();
    repo.replace(code("live", Uuid::new_v4(), Duration::minutes(15)))
        .await
        .unwrap();

    assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 1);
    assert!(repo.find_redeemable("live", Utc::now()).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redeem_has_one_winner() {
    let repo = setup().await;
    repo.replace(code("race", Uuid::new_v4(), Duration::minutes(15)))
        .await
        .unwrap();

    let now = Utc::now();
    let contenders: Vec<_> = (0..6)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.redeem("race", now).await })
        })
        .collect();

    let mut winners = 0;
    for handle in contenders {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
