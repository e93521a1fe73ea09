//! Integration tests for the session manager.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use keel_auth::{AuthError, SessionManager, TokenService};
use keel_core::clock::Clock;
use keel_core::error::{KeelError, KeelResult};
use keel_core::models::audit::actions;
use keel_core::models::session::{CreateSession, RefreshSession};
use keel_core::models::user::Role;
use keel_core::repository::{AuditLogFilter, SessionRepository, UserRepository};
use keel_db::repository::{SurrealAuditLogRepository, SurrealUserRepository};
use uuid::Uuid;

#[tokio::test]
async fn login_issues_access_and_refresh_tokens() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;

    let tokens = h.manager.login("alice", PASSWORD).await.unwrap();

    assert_eq!(tokens.user_id, alice.id);
    assert_eq!(tokens.role, Role::Member);
    let claims = h.manager.tokens().verify(&tokens.access_token).unwrap();
    assert_eq!(claims.sub, alice.id.to_string());
    assert_eq!(claims.role, Role::Member);
    assert_eq!(tokens.refresh_expires_at, h.clock.now() + Duration::hours(1));
    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 1);
}

#[tokio::test]
async fn login_ignores_username_case() {
    let h = Harness::new().await;
    h.register("alice").await;
    assert!(h.manager.login("ALICE", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn wrong_password_and_unknown_user_fail_identically() {
    let h = Harness::new().await;
    h.register("alice").await;

    let wrong = h.manager.login("alice", "wrong-pw").await.unwrap_err();
    let ghost = h.manager.login("ghost", "anything").await.unwrap_err();

    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert!(matches!(ghost, AuthError::InvalidCredentials));
    assert_eq!(wrong.to_string(), ghost.to_string());
}

#[tokio::test]
async fn inactive_account_is_refused_only_with_correct_password() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    h.accounts.set_active(alice.id, alice.id, false).await.unwrap();

    assert!(matches!(
        h.manager.login("alice", "wrong-pw").await.unwrap_err(),
        AuthError::InvalidCredentials
    ));
    assert!(matches!(
        h.manager.login("alice", PASSWORD).await.unwrap_err(),
        AuthError::AccountInactive
    ));
}

#[tokio::test]
async fn refresh_rotates_the_session() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    let first = h.manager.login("alice", PASSWORD).await.unwrap();

    h.clock.advance(Duration::minutes(10));
    let second = h.manager.refresh(&first.refresh_token).await.unwrap();

    assert_ne!(second.refresh_token, first.refresh_token);
    assert_ne!(second.access_token, first.access_token);
    assert_eq!(second.refresh_expires_at, h.clock.now() + Duration::hours(1));
    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 1);
}

#[tokio::test]
async fn replayed_refresh_token_is_not_found() {
    let h = Harness::new().await;
    h.register("alice").await;
    let first = h.manager.login("alice", PASSWORD).await.unwrap();

    let second = h.manager.refresh(&first.refresh_token).await.unwrap();
    let replay = h.manager.refresh(&first.refresh_token).await.unwrap_err();

    assert!(matches!(replay, AuthError::SessionNotFound));
    // The legitimate successor still works.
    assert!(h.manager.refresh(&second.refresh_token).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_has_exactly_one_winner() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    let login = h.manager.login("alice", PASSWORD).await.unwrap();

    let contenders: Vec<_> = (0..8)
        .map(|_| {
            let manager = h.manager.clone();
            let token = login.refresh_token.clone();
            tokio::spawn(async move { manager.refresh(&token).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in contenders {
        outcomes.push(handle.await.unwrap());
    }
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let not_found = outcomes
        .iter()
        .filter(|r| matches!(r, Err(AuthError::SessionNotFound)))
        .count();
    assert_eq!((successes, not_found), (1, 7));
    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 1);
}

#[tokio::test]
async fn refresh_for_deactivated_user_drops_the_session() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    let tokens = h.manager.login("alice", PASSWORD).await.unwrap();
    // Flip the flag in storage so the session survives deactivation.
    let users = SurrealUserRepository::with_clock(h.db.clone(), h.clock.clone());
    users.set_active(alice.id, false).await.unwrap();

    let err = h.manager.refresh(&tokens.refresh_token).await.unwrap_err();

    assert!(matches!(err, AuthError::AccountInactive), "got {err:?}");
    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 0);
}

#[tokio::test]
async fn deactivated_refresh_reports_inactive_when_cleanup_fails() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    let tokens = h.manager.login("alice", PASSWORD).await.unwrap();
    let clock: Arc<dyn Clock> = h.clock.clone();
    let users = SurrealUserRepository::with_clock(h.db.clone(), clock.clone());
    users.set_active(alice.id, false).await.unwrap();

    let config = test_config();
    let manager = SessionManager::new(
        users,
        UndeletableSessions(h.sessions()),
        SurrealAuditLogRepository::new(h.db.clone()),
        Arc::new(TokenService::new(&config, clock.clone()).unwrap()),
        clock,
        config,
    );

    let err = manager.refresh(&tokens.refresh_token).await.unwrap_err();

    assert!(matches!(err, AuthError::AccountInactive), "got {err:?}");
    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 1);
}

#[tokio::test]
async fn expired_session_is_rejected_and_removed() {
    let h = Harness::new().await;
    h.register("alice").await;
    let login = h.manager.login("alice", PASSWORD).await.unwrap();

    h.clock.advance(Duration::hours(1) + Duration::seconds(1));
    let err = h.manager.refresh(&login.refresh_token).await.unwrap_err();

    assert!(matches!(err, AuthError::SessionExpired));
    let hash = keel_auth::token::hash_refresh_token(&login.refresh_token);
    assert!(h.sessions().get_by_token_hash(&hash).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_refresh_token_is_not_found() {
    let h = Harness::new().await;
    assert!(matches!(
        h.manager.refresh("never-issued").await.unwrap_err(),
        AuthError::SessionNotFound
    ));
}

#[tokio::test]
async fn logout_is_idempotent() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    let login = h.manager.login("alice", PASSWORD).await.unwrap();

    h.manager.logout(&login.refresh_token).await.unwrap();
    h.manager.logout(&login.refresh_token).await.unwrap();

    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 0);
    assert!(matches!(
        h.manager.refresh(&login.refresh_token).await.unwrap_err(),
        AuthError::SessionNotFound
    ));
}

#[tokio::test]
async fn revoke_all_kills_every_session_of_the_user() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    let bob = h.register("bob").await;
    let a1 = h.manager.login("alice", PASSWORD).await.unwrap();
    let a2 = h.manager.login("alice", PASSWORD).await.unwrap();
    let b1 = h.manager.login("bob", PASSWORD).await.unwrap();

    let revoked = h.manager.revoke_all(Some(bob.id), alice.id).await.unwrap();

    assert_eq!(revoked, 2);
    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 0);
    for token in [&a1.refresh_token, &a2.refresh_token] {
        assert!(matches!(
            h.manager.refresh(token).await.unwrap_err(),
            AuthError::SessionNotFound
        ));
    }
    assert!(h.manager.refresh(&b1.refresh_token).await.is_ok());

    let revocations = h
        .actions_for(AuditLogFilter {
            action: Some(actions::REVOKE_ALL.into()),
            ..Default::default()
        })
        .await;
    assert_eq!(revocations.len(), 1);
}

#[tokio::test]
async fn revoke_all_for_unknown_user_is_not_found() {
    let h = Harness::new().await;
    let err = h.manager.revoke_all(None, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AuthError::Store(KeelError::NotFound { .. })));
}

#[tokio::test]
async fn session_operations_are_audited() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    let login = h.manager.login("alice", PASSWORD).await.unwrap();
    h.clock.advance(Duration::seconds(1));
    let refreshed = h.manager.refresh(&login.refresh_token).await.unwrap();
    h.clock.advance(Duration::seconds(1));
    h.manager.logout(&refreshed.refresh_token).await.unwrap();

    let trail = h
        .actions_for(AuditLogFilter {
            actor_id: Some(alice.id),
            target_type: Some("session".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(trail, [actions::LOGOUT, actions::REFRESH, actions::LOGIN]);
}

#[tokio::test]
async fn sweep_removes_only_expired_sessions() {
    let h = Harness::new().await;
    let alice = h.register("alice").await;
    h.manager.login("alice", PASSWORD).await.unwrap();
    h.clock.advance(Duration::minutes(45));
    let fresh = h.manager.login("alice", PASSWORD).await.unwrap();
    h.clock.advance(Duration::minutes(30));

    assert_eq!(h.manager.sweep_expired().await.unwrap(), 1);
    assert_eq!(h.manager.sweep_expired().await.unwrap(), 0);
    assert_eq!(h.sessions().count_user_sessions(alice.id).await.unwrap(), 1);
    assert!(h.manager.refresh(&fresh.refresh_token).await.is_ok());
}

#[tokio::test]
async fn audit_failure_does_not_block_login() {
    let db = memory_db().await;
    let clock: Arc<dyn Clock> = start_clock();
    let config = test_config();
    let users = SurrealUserRepository::with_clock(db.clone(), clock.clone());
    users
        .create(keel_core::models::user::CreateUser {
            username: "alice".into(),
            password_hash: keel_auth::password::hash_password(PASSWORD, None).unwrap(),
            display_name: "Alice".into(),
            phone: None,
            messenger_handle: None,
            role: Role::Member,
        })
        .await
        .unwrap();

    let manager = SessionManager::new(
        users,
        keel_db::repository::SurrealSessionRepository::new(db.clone()),
        BrokenAudit,
        Arc::new(TokenService::new(&config, clock.clone()).unwrap()),
        clock,
        config,
    );

    let tokens = manager.login("alice", PASSWORD).await.unwrap();
    manager.refresh(&tokens.refresh_token).await.unwrap();
}

/// A session store that refuses to delete single sessions.
struct UndeletableSessions(Sessions);

impl SessionRepository for UndeletableSessions {
    async fn create(&self, input: CreateSession) -> KeelResult<RefreshSession> {
        self.0.create(input).await
    }
    async fn get_by_token_hash(&self, hash: &str) -> KeelResult<Option<RefreshSession>> {
        self.0.get_by_token_hash(hash).await
    }
    async fn rotate(&self, old: &str, new: CreateSession) -> KeelResult<Option<RefreshSession>> {
        self.0.rotate(old, new).await
    }
    async fn delete(&self, _: &str) -> KeelResult<Option<RefreshSession>> {
        Err(KeelError::Database("session store is read-only".into()))
    }
    async fn delete_user_sessions(&self, user_id: Uuid) -> KeelResult<u64> {
        self.0.delete_user_sessions(user_id).await
    }
    async fn delete_expired(&self, now: chrono::DateTime<chrono::Utc>) -> KeelResult<u64> {
        self.0.delete_expired(now).await
    }
    async fn count_user_sessions(&self, user_id: Uuid) -> KeelResult<u64> {
        self.0.count_user_sessions(user_id).await
    }
}

/// A session store whose every call hangs.
struct StalledSessions;

impl SessionRepository for StalledSessions {
    async fn create(&self, _: CreateSession) -> KeelResult<RefreshSession> {
        std::future::pending().await
    }
    async fn get_by_token_hash(&self, _: &str) -> KeelResult<Option<RefreshSession>> {
        std::future::pending().await
    }
    async fn rotate(&self, _: &str, _: CreateSession) -> KeelResult<Option<RefreshSession>> {
        std::future::pending().await
    }
    async fn delete(&self, _: &str) -> KeelResult<Option<RefreshSession>> {
        std::future::pending().await
    }
    async fn delete_user_sessions(&self, _: Uuid) -> KeelResult<u64> {
        std::future::pending().await
    }
    async fn delete_expired(&self, _: chrono::DateTime<chrono::Utc>) -> KeelResult<u64> {
        std::future::pending().await
    }
    async fn count_user_sessions(&self, _: Uuid) -> KeelResult<u64> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stalled_storage_reports_service_unavailable() {
    let db = memory_db().await;
    let clock: Arc<dyn Clock> = start_clock();
    let config = keel_auth::AuthConfig {
        storage_timeout_ms: 50,
        ..test_config()
    };
    let manager = SessionManager::new(
        SurrealUserRepository::with_clock(db.clone(), clock.clone()),
        StalledSessions,
        SurrealAuditLogRepository::new(db.clone()),
        Arc::new(TokenService::new(&config, clock.clone()).unwrap()),
        clock,
        config,
    );

    let err = manager.refresh("some-token").await.unwrap_err();
    assert!(
        matches!(err, AuthError::Store(KeelError::ServiceUnavailable(_))),
        "got {err:?}"
    );
    let err = manager.logout("some-token").await.unwrap_err();
    assert!(matches!(err, AuthError::Store(KeelError::ServiceUnavailable(_))));
}
