//! Integration tests for the authorization core.
//!
//! These tests drive the engine, stores, bootstrapper and gateway together.

use std::sync::Arc;
use wordhoard_authz::config::EngineConfig;
use wordhoard_authz::error::ErrorCode;
use wordhoard_authz::gateway::{
    AuthorizationGateway, CallerIdentity, GatewayOutcome, MethodPermissionMap, UnmappedPolicy,
};
use wordhoard_authz::rbac::{
    Bootstrapper, FileStore, MemoryStore, PolicyEngine, PolicyRule, PolicyStore, Subject,
};

// ============================================================================
// Test Utilities
// ============================================================================

async fn engine_with(store: Arc<dyn PolicyStore>) -> PolicyEngine {
    PolicyEngine::load(store, &EngineConfig::default())
        .await
        .unwrap()
}

async fn bootstrapped() -> Arc<PolicyEngine> {
    let engine = engine_with(Arc::new(MemoryStore::new())).await;
    Bootstrapper::builtin().run(&engine).await.unwrap();
    Arc::new(engine)
}

fn rule(subject: &str, resource: &str, action: &str) -> PolicyRule {
    PolicyRule::parse(subject, resource, action).unwrap()
}

// ============================================================================
// Decision Scenarios
// ============================================================================

#[tokio::test]
async fn test_user_role_scenario() {
    let engine = bootstrapped().await;

    // Already granted by the catalog, so adding again changes nothing.
    assert!(!engine.add_policy(rule("r:user", "course", "read")).await.unwrap());
    assert!(engine.assign_role(42, "user").await.unwrap());

    let user = Subject::user(42);
    assert!(engine.check(&user, "course", "read").await.unwrap());
    assert!(!engine.check(&user, "course", "delete").await.unwrap());
    assert!(engine.check(&user, "question", "answer").await.unwrap());
}

#[tokio::test]
async fn test_content_manager_inherits_user_grants() {
    let engine = bootstrapped().await;
    engine.assign_role(7, "content_manager").await.unwrap();

    let manager = Subject::user(7);
    assert!(engine.check(&manager, "course", "delete").await.unwrap());
    assert!(engine.check(&manager, "progress", "update").await.unwrap());
    assert!(!engine.check(&manager, "policy", "manage").await.unwrap());
}

#[tokio::test]
async fn test_admin_allows_everything_and_revocation_takes_effect() {
    let engine = bootstrapped().await;
    engine.assign_role(1, "admin").await.unwrap();

    let admin = Subject::user(1);
    assert!(engine.check(&admin, "policy", "manage").await.unwrap());
    assert!(engine.check(&admin, "anything", "at_all").await.unwrap());

    assert!(engine.revoke_role(1, "admin").await.unwrap());
    assert!(!engine.check(&admin, "policy", "manage").await.unwrap());
}

#[tokio::test]
async fn test_unknown_subject_is_denied() {
    let engine = bootstrapped().await;
    assert!(!engine.check(&Subject::user(404), "course", "read").await.unwrap());
    assert!(!engine
        .check(&Subject::role("ghost"), "course", "read")
        .await
        .unwrap());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");

    {
        let engine = engine_with(Arc::new(FileStore::new(&path))).await;
        let report = Bootstrapper::builtin().run(&engine).await.unwrap();
        assert!(!report.is_noop());
        engine.assign_role(42, "user").await.unwrap();
    }

    let engine = engine_with(Arc::new(FileStore::new(&path))).await;
    assert!(engine
        .check(&Subject::user(42), "course", "read")
        .await
        .unwrap());

    // A second bootstrap against the restored state changes nothing.
    let report = Bootstrapper::builtin().run(&engine).await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_failed_save_keeps_change_in_memory() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone()).await;
    store.set_fail_saves(true);

    let err = engine
        .add_policy(rule("r:user", "course", "read"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PersistUnconfirmed);
    assert_eq!(err.applied(), Some(true));

    engine.assign_role(42, "user").await.unwrap_err();
    assert!(engine
        .check(&Subject::user(42), "course", "read")
        .await
        .unwrap());
    assert!(store.snapshot().is_empty());

    store.set_fail_saves(false);
    engine.persist().await.unwrap();
    assert_eq!(store.snapshot().rules.len(), 1);
    assert_eq!(store.snapshot().role_edges.len(), 1);
}

// ============================================================================
// Gateway
// ============================================================================

#[tokio::test]
async fn test_gateway_over_bootstrapped_engine() {
    let engine = bootstrapped().await;
    engine.assign_role(42, "user").await.unwrap();
    engine.assign_role(1, "admin").await.unwrap();

    let gateway = AuthorizationGateway::new(
        engine,
        MethodPermissionMap::with_defaults().unwrap(),
        UnmappedPolicy::FailClosed,
    );
    let user = Some(CallerIdentity::new(42));
    let admin = Some(CallerIdentity::new(1));

    let ctx = gateway
        .authorize("/wordhoard.v1.WordService/GetWord", user)
        .await
        .unwrap();
    assert_eq!(ctx.outcome, GatewayOutcome::Allowed);

    let err = gateway
        .authorize("/wordhoard.v1.PolicyAdmin/AddPolicy", user)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    assert!(gateway
        .authorize("/wordhoard.v1.PolicyAdmin/AddPolicy", admin)
        .await
        .is_ok());

    let ctx = gateway
        .authorize("/wordhoard.v1.AuthService/Login", None)
        .await
        .unwrap();
    assert_eq!(ctx.outcome, GatewayOutcome::Whitelisted);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checks_during_mutations_see_consistent_state() {
    let engine = bootstrapped().await;
    let mut handles = Vec::new();

    for id in 100..132u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.assign_role(id, "user").await.unwrap();
            let allowed = engine
                .check(&Subject::user(id), "word", "read")
                .await
                .unwrap();
            engine.revoke_role(id, "user").await.unwrap();
            allowed
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert!(engine.users_with_role("user").await.unwrap().is_empty());
}
