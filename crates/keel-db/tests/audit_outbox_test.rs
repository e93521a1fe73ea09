//! Integration tests for the audit log and event outbox.

use chrono::{Duration, Utc};
use keel_core::models::audit::{CreateAuditLogEntry, actions};
use keel_core::models::event::EventEnvelope;
use keel_core::repository::{AuditLogFilter, AuditLogRepository, EventChannel, Pagination};
use keel_db::repository::{SurrealAuditLogRepository, SurrealEventOutbox};
use serde_json::json;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keel_db::run_migrations(&db).await.unwrap();
    db
}

fn entry(actor: Option<Uuid>, action: &str, target: &str, minutes_ago: i64) -> CreateAuditLogEntry {
    CreateAuditLogEntry {
        actor_id: actor,
        action: action.into(),
        target_type: "user".into(),
        target_id: target.into(),
        payload: serde_json::Value::Null,
        created_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

#[tokio::test]
async fn append_stores_payload_object() {
    let repo = SurrealAuditLogRepository::new(setup().await);
    let actor = Uuid::new_v4();

    let written = repo
        .append(CreateAuditLogEntry {
            payload: json!({"role": "ROLE_ADMIN"}),
            ..entry(Some(actor), actions::ROLE_CHANGE, "u-1", 0)
        })
        .await
        .unwrap();
    assert_eq!(written.actor_id, Some(actor));
    assert_eq!(written.payload["role"], "ROLE_ADMIN");

    let bare = repo
        .append(entry(None, actions::LOGOUT, "u-1", 0))
        .await
        .unwrap();
    assert!(bare.actor_id.is_none());
    assert_eq!(bare.payload, json!({}));
}

#[tokio::test]
async fn list_filters_and_orders_newest_first() {
    let repo = SurrealAuditLogRepository::new(setup().await);
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    repo.append(entry(Some(alice), actions::LOGIN, "a", 30)).await.unwrap();
    repo.append(entry(Some(alice), actions::REFRESH, "a", 20)).await.unwrap();
    repo.append(entry(Some(bob), actions::LOGIN, "b", 10)).await.unwrap();

    let by_actor = repo
        .list(
            AuditLogFilter {
                actor_id: Some(alice),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_actor.total, 2);
    assert_eq!(by_actor.items[0].action, actions::REFRESH);
    assert_eq!(by_actor.items[1].action, actions::LOGIN);

    let logins = repo
        .list(
            AuditLogFilter {
                action: Some(actions::LOGIN.into()),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(logins.total, 2);

    let recent = repo
        .list(
            AuditLogFilter {
                from: Some(Utc::now() - Duration::minutes(15)),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(recent.total, 1);
    assert_eq!(recent.items[0].actor_id, Some(bob));

    let page = repo
        .list(AuditLogFilter::default(), Pagination { offset: 2, limit: 10 })
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].target_id, "a");
}

#[tokio::test]
async fn outbox_keeps_delivered_events() {
    let outbox = SurrealEventOutbox::new(setup().await);

    outbox
        .deliver(EventEnvelope {
            topic: "user.registered".into(),
            payload: json!({"userId": "42", "username": "alice"}),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let events = outbox.recent("user.registered", 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["username"], "alice");
}
