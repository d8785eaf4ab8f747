//! Request pipeline: bearer injection, 401 recovery, 403 sign-out, passthrough.

use super::harness::{FakeBackend, RefreshScript, TestClient, TEST_TIMEOUT};
use crate::{AuthError, SessionStatus, SESSION_EXPIRED_MESSAGE};
use futures::future::join_all;
use guelp_config::Config;
use guelp_storage::MemoryStorage;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::timeout;

fn backend() -> Arc<FakeBackend> {
    let backend = FakeBackend::new();
    backend.add_user("user-1", &[("STUDENT", &["view_courses"])]);
    backend
}

fn assert_expired(test: &TestClient) {
    assert_eq!(test.session().status(), SessionStatus::Unauthenticated);
    assert!(test.session().tokens().is_none());
    assert!(test.stored_snapshot().is_none());
    assert_eq!(
        test.session().last_error().as_deref(),
        Some(SESSION_EXPIRED_MESSAGE)
    );
}

#[tokio::test]
async fn test_requests_carry_current_access_token() {
    let test = TestClient::signed_in(backend()).await;

    let body: Value = test.client.api.get_json("/courses").await.unwrap();
    assert_eq!(body["path"], "/courses");

    let call = test.backend.calls().pop().unwrap();
    assert_eq!(call.path, "/courses");
    assert_eq!(call.bearer, test.session().access_token());
    assert!(!call.retried);
}

#[tokio::test]
async fn test_post_json_sends_body_with_token() {
    let test = TestClient::signed_in(backend()).await;

    let body: Value = test
        .client
        .api
        .post_json("/notes", &json!({ "text": "hello" }))
        .await
        .unwrap();
    assert_eq!(body["ok"], true);
    test.client.api.delete("/notes/1").await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_refreshes_and_retries_once() {
    let test = TestClient::signed_in(backend()).await;
    let before = test.session().tokens().unwrap();
    test.backend.expire_access_tokens();

    let response = test.client.api.get("/courses").await.unwrap();
    assert!(response.is_success());

    assert_eq!(test.backend.refresh_calls(), 1);
    assert_eq!(test.backend.calls_to("/courses"), 2);

    let after = test.session().tokens().unwrap();
    assert_ne!(after.access_token, before.access_token);
    assert_ne!(after.refresh_token, before.refresh_token);

    let retry = test.backend.calls().pop().unwrap();
    assert!(retry.retried);
    assert_eq!(retry.bearer.as_deref(), Some(after.access_token.as_str()));

    let stored = test.stored_snapshot().unwrap();
    assert_eq!(stored.access_token, after.access_token);
    assert_eq!(stored.refresh_token, after.refresh_token);
    assert_eq!(test.session().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_two_sequential_refreshes_in_one_session() {
    let test = TestClient::signed_in(backend()).await;
    let initial = test.session().tokens().unwrap();

    test.backend.expire_access_tokens();
    test.client.api.get("/courses").await.unwrap();
    let first = test.session().tokens().unwrap();

    test.backend.expire_access_tokens();
    test.client.api.get("/courses").await.unwrap();
    let second = test.session().tokens().unwrap();

    assert_eq!(test.backend.refresh_calls(), 2);
    assert_ne!(first.access_token, initial.access_token);
    assert_ne!(second.access_token, first.access_token);
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(test.stored_snapshot().unwrap().access_token, second.access_token);
    assert_eq!(test.session().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_reused_refresh_token_is_exchanged_again_after_expiry() {
    let backend = backend();
    backend.script_refresh(RefreshScript::Reissue);
    let test = TestClient::signed_in(backend).await;
    let refresh_token = test.session().tokens().unwrap().refresh_token;

    test.backend.expire_access_tokens();
    test.client.api.get("/courses").await.unwrap();
    let first = test.session().tokens().unwrap();
    assert_eq!(first.refresh_token, refresh_token);

    test.backend.expire_access_tokens();
    let response = test.client.api.get("/courses").await.unwrap();
    assert!(response.is_success());

    let second = test.session().tokens().unwrap();
    assert_eq!(test.backend.refresh_calls(), 2);
    assert_ne!(second.access_token, first.access_token);
    assert_eq!(second.refresh_token, refresh_token);
    assert_eq!(test.session().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_missing_refresh_endpoint_signs_out() {
    let backend = backend();
    backend.script_refresh(RefreshScript::Respond {
        status: 404,
        body: json!({ "detail": "not found" }),
    });
    let test = TestClient::signed_in(backend).await;
    test.backend.expire_access_tokens();

    let err = test.client.api.get("/courses").await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
    assert_eq!(test.backend.calls_to("/courses"), 1);
    assert_expired(&test);
}

#[tokio::test]
async fn test_failed_refresh_signs_out() {
    let backend = backend();
    backend.script_refresh(RefreshScript::Respond {
        status: 401,
        body: json!({ "detail": "refresh token revoked" }),
    });
    let test = TestClient::signed_in(backend).await;
    test.backend.expire_access_tokens();

    let err = test.client.api.get("/courses").await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
    assert_expired(&test);
}

#[tokio::test]
async fn test_unauthorized_without_refresh_token_signs_out() {
    let backend = backend();
    let test = TestClient::new(backend.clone());
    let mut snapshot = backend.snapshot_for("user-1", &["STUDENT"]);
    snapshot.refresh_token = None;
    test.seed(&snapshot);

    if let crate::BootstrapOutcome::Restored { hydration } =
        test.session().bootstrap().await.unwrap()
    {
        timeout(TEST_TIMEOUT, hydration).await.unwrap().unwrap().unwrap();
    } else {
        panic!("expected a restored session");
    }
    backend.expire_access_tokens();

    let err = test.client.api.get("/courses").await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
    assert_eq!(backend.refresh_calls(), 0);
    assert_expired(&test);
}

#[tokio::test]
async fn test_forbidden_signs_out_without_retry() {
    let backend = backend();
    backend.forbid("/admin/users");
    let test = TestClient::signed_in(backend).await;

    let err = test.client.api.get("/admin/users").await.unwrap_err();
    assert!(matches!(err, AuthError::Forbidden));
    assert_eq!(err.status(), Some(403));
    assert_eq!(test.backend.calls_to("/admin/users"), 1);
    assert_eq!(test.backend.refresh_calls(), 0);
    assert_expired(&test);
}

#[tokio::test]
async fn test_retried_request_still_unauthorized_keeps_session() {
    let backend = backend();
    backend.always_unauthorized("/reports");
    let test = TestClient::signed_in(backend).await;

    let err = test.client.api.get("/reports").await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
    assert_eq!(test.backend.calls_to("/reports"), 2);
    assert_eq!(test.backend.refresh_calls(), 1);

    assert_eq!(test.session().status(), SessionStatus::Authenticated);
    assert!(test.session().last_error().is_none());
    assert!(test.stored_snapshot().is_some());
}

#[tokio::test]
async fn test_other_errors_pass_through() {
    let backend = backend();
    backend.fail("/grades", 500);
    backend.fail("/missing", 404);
    let test = TestClient::signed_in(backend).await;

    let err = test.client.api.get("/grades").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(err.is_transient());

    let err = test.client.api.get("/missing").await.unwrap_err();
    assert!(matches!(err, AuthError::HttpStatus { status: 404, .. }));

    assert_eq!(test.backend.calls_to("/grades"), 1);
    assert_eq!(test.backend.refresh_calls(), 0);
    assert_eq!(test.session().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_transport_failure_passes_through() {
    let test = TestClient::signed_in(backend()).await;
    test.backend.set_offline(true);

    let err = test.client.api.get("/courses").await.unwrap_err();
    assert!(matches!(err, AuthError::Transport(_)));
    assert!(err.is_transient());
    assert_eq!(test.session().status(), SessionStatus::Authenticated);
    assert!(test.stored_snapshot().is_some());
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let test = TestClient::signed_in(backend()).await;
    test.backend.expire_access_tokens();
    test.backend.refresh_gate.close();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let api = test.client.api.clone();
            tokio::spawn(async move { api.get(&format!("/courses/{i}")).await })
        })
        .collect();

    test.backend.wait_for_calls("/auth/refresh", 1).await;
    assert!(test.client.api.coordinator().is_refreshing());
    test.backend.refresh_gate.release();

    let results = timeout(TEST_TIMEOUT, join_all(handles)).await.unwrap();
    for result in results {
        assert!(result.unwrap().unwrap().is_success());
    }

    assert_eq!(test.backend.refresh_calls(), 1);
    assert_eq!(test.client.api.coordinator().attempts(), 1);
    assert!(!test.client.api.coordinator().is_refreshing());

    let current = test.session().access_token();
    let retries: Vec<_> = test
        .backend
        .calls()
        .into_iter()
        .filter(|c| c.retried)
        .collect();
    assert_eq!(retries.len(), 5);
    assert!(retries.iter().all(|c| c.bearer == current));
}

#[tokio::test]
async fn test_concurrent_requests_fail_together_when_refresh_fails() {
    let backend = backend();
    backend.script_refresh(RefreshScript::Respond {
        status: 500,
        body: json!({ "detail": "refresh unavailable" }),
    });
    let test = TestClient::signed_in(backend).await;
    test.backend.expire_access_tokens();
    test.backend.refresh_gate.close();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let api = test.client.api.clone();
            tokio::spawn(async move { api.get("/courses").await })
        })
        .collect();

    test.backend.wait_for_calls("/auth/refresh", 1).await;
    test.backend.refresh_gate.release();

    let results = timeout(TEST_TIMEOUT, join_all(handles)).await.unwrap();
    for result in results {
        assert!(matches!(result.unwrap(), Err(AuthError::Unauthorized)));
    }
    assert_eq!(test.backend.refresh_calls(), 1);
    assert_expired(&test);
}

#[tokio::test]
async fn test_refresh_disabled_signs_out_on_unauthorized() {
    let config = Config {
        refresh_enabled: false,
        ..Config::default()
    };
    let test = TestClient::with_config(backend(), Arc::new(MemoryStorage::new()), &config);
    test.session().bootstrap().await.unwrap();
    test.session().sign_in("user@guelp.test", "secret").await.unwrap();
    test.backend.expire_access_tokens();

    let err = test.client.api.get("/courses").await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
    assert_eq!(test.backend.refresh_calls(), 0);
    assert!(!test.client.api.coordinator().is_enabled());
    assert_expired(&test);
}

#[tokio::test]
async fn test_request_without_session_leaves_no_error() {
    let test = TestClient::new(backend());
    test.session().bootstrap().await.unwrap();

    let err = test.client.api.get("/courses").await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));

    let call = test.backend.calls().pop().unwrap();
    assert!(call.bearer.is_none());
    assert_eq!(test.backend.refresh_calls(), 0);
    assert_eq!(test.session().status(), SessionStatus::Unauthenticated);
    assert!(test.session().last_error().is_none());
}

#[tokio::test]
async fn test_stale_rejection_does_not_end_newer_session() {
    let test = TestClient::signed_in(backend()).await;
    let old = test.session().credentials();

    test.session().sign_out().await.unwrap();
    test.session().sign_in("user@guelp.test", "secret").await.unwrap();

    assert!(!test.session().force_sign_out(old.epoch).await);
    assert_eq!(test.session().status(), SessionStatus::Authenticated);
    assert!(test.stored_snapshot().is_some());

    let current = test.session().credentials();
    assert!(test.session().force_sign_out(current.epoch).await);
    assert_expired(&test);
}
