//! Integration tests for login, token reuse, refresh, and single-flight
//! renewal against a mock provider.

mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::*;
use vacbridge_core::auth::{LoginCredentials, SessionSource, SessionStatus};
use vacbridge_core::models::TokenKind;
use vacbridge_core::Error;

// ============================================================================
// Reuse and configuration
// ============================================================================

#[tokio::test]
async fn test_stored_unexpired_token_is_reused_without_network() {
    let h = Harness::start().await;
    h.store_valid_token("stored-token");

    let session = h.session(password_credentials());
    let status = session.check_login().await.expect("check_login");

    assert_eq!(status, SessionStatus::Active);
    assert_eq!(session.session().map(|s| s.source), Some(SessionSource::Reused));
    assert_eq!(session.bearer().await.expect("bearer"), "stored-token");
    assert_eq!(h.total_requests().await, 0);
}

#[tokio::test]
async fn test_email_without_password_is_configuration_error() {
    let h = Harness::start().await;
    let session = h.session(LoginCredentials {
        email: Some("me@example.com".to_string()),
        password: Some(String::new()),
        ..LoginCredentials::default()
    });

    let err = session.check_login().await.expect_err("must fail");
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(h.total_requests().await, 0);
}

#[tokio::test]
async fn test_password_without_email_is_configuration_error() {
    let h = Harness::start().await;
    let session = h.session(LoginCredentials {
        password: Some("pw".to_string()),
        oauth_code: Some("code".to_string()),
        ..LoginCredentials::default()
    });

    let err = session.check_login().await.expect_err("must fail");
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn test_no_credentials_and_no_token_is_configuration_error() {
    let h = Harness::start().await;
    let session = h.session(LoginCredentials::default());

    let err = session.check_login().await.expect_err("must fail");
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(session.status(), SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn test_corrupt_token_file_forces_fresh_login() {
    let h = Harness::start().await;
    std::fs::write(h.store().path(TokenKind::Primary), "{{{").expect("write");

    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("fresh")))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(password_credentials());
    session.check_login().await.expect("check_login");
    assert_eq!(session.bearer().await.expect("bearer"), "fresh");
}

// ============================================================================
// Login flows
// ============================================================================

#[tokio::test]
async fn test_password_sign_in_persists_token() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .and(body_partial_json(json!({
            "user": {
                "email": "me@example.com",
                "application": { "app_id": "test-app-id" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("signed-in")))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(password_credentials());
    session.check_login().await.expect("check_login");

    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(session.session().map(|s| s.source), Some(SessionSource::Password));

    let stored = h.store().load_primary().expect("load").expect("stored");
    assert_eq!(stored.access_token, "signed-in");
    assert_eq!(stored.account.as_deref(), Some("me@example.com"));
}

#[tokio::test]
async fn test_explicit_sign_in_replaces_stored_token() {
    let h = Harness::start().await;
    h.store_valid_token("stored-token");

    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("explicit")))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(password_credentials());
    let signed_in = session.sign_in().await.expect("sign in");

    assert_eq!(signed_in.source, SessionSource::Password);
    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(h.requests_to(REFRESH_PATH).await, 0);
    assert_eq!(
        h.store().load_primary().expect("load").map(|t| t.access_token),
        Some("explicit".to_string())
    );
}

#[tokio::test]
async fn test_sign_in_without_credentials_is_configuration_error() {
    let h = Harness::start().await;
    let session = h.session(LoginCredentials::default());

    let err = session.sign_in().await.expect_err("must fail");
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(h.total_requests().await, 0);
}

#[tokio::test]
async fn test_oauth_code_login_stores_both_records() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path(OAUTH_TOKEN_PATH))
        .and(body_partial_json(json!({
            "grant_type": "authorization_code",
            "code": "auth-code",
            "code_verifier": "verifier",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "idp-access",
            "refresh_token": "idp-refresh",
            "id_token": "idp-id-token",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_SIGN_IN_PATH))
        .and(body_partial_json(json!({ "token": "idp-id-token" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("from-oauth")))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(LoginCredentials {
        oauth_code: Some("auth-code".to_string()),
        oauth_code_verifier: Some("verifier".to_string()),
        ..LoginCredentials::default()
    });
    session.check_login().await.expect("check_login");

    assert_eq!(session.session().map(|s| s.source), Some(SessionSource::OAuthCode));
    assert_eq!(session.bearer().await.expect("bearer"), "from-oauth");

    let store = h.store();
    assert!(store.load_primary().expect("load").is_some());
    let oauth = store.load_oauth().expect("load").expect("oauth stored");
    assert_eq!(oauth.refresh_token(), Some("idp-refresh"));
}

#[tokio::test]
async fn test_password_takes_precedence_over_oauth_code() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("pw")))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(OAUTH_TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&h.server)
        .await;

    let session = h.session(LoginCredentials {
        oauth_code: Some("auth-code".to_string()),
        ..password_credentials()
    });
    session.check_login().await.expect("check_login");
    assert_eq!(session.session().map(|s| s.source), Some(SessionSource::Password));
}
fn oauth_code_credentials() -> LoginCredentials {
    LoginCredentials {
        oauth_code: Some("auth-code".to_string()),
        ..LoginCredentials::default()
    }
}

async fn mount_rejected_primary_refresh(h: &Harness) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
}

#[tokio::test]
async fn test_oauth_account_renews_through_stored_oauth_refresh() {
    let h = Harness::start().await;
    h.store_expired_token();
    h.store_oauth_record("idp-refresh");
    mount_rejected_primary_refresh(&h).await;

    Mock::given(method("POST"))
        .and(path(OAUTH_TOKEN_PATH))
        .and(body_partial_json(json!({
            "grant_type": "refresh_token",
            "refresh_token": "idp-refresh",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "idp-access-2",
            "id_token": "renewed-id-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(OAUTH_TOKEN_PATH))
        .and(body_partial_json(json!({ "grant_type": "authorization_code" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_SIGN_IN_PATH))
        .and(body_partial_json(json!({ "token": "renewed-id-token" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("via-oauth-refresh")))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(oauth_code_credentials());
    session.check_login().await.expect("check_login");

    assert_eq!(session.bearer().await.expect("bearer"), "via-oauth-refresh");
    assert_eq!(session.session().map(|s| s.source), Some(SessionSource::OAuthCode));
    assert!(h.request_bodies().await.iter().all(|b| !b.contains("auth-code")));

    // The provider omitted a new refresh token, so the old one is kept.
    let oauth = h.store().load_oauth().expect("load").expect("oauth stored");
    assert_eq!(oauth.id_token.as_deref(), Some("renewed-id-token"));
    assert_eq!(oauth.refresh_token(), Some("idp-refresh"));
}

#[tokio::test]
async fn test_rejected_oauth_refresh_falls_back_to_code_exchange() {
    let h = Harness::start().await;
    h.store_expired_token();
    h.store_oauth_record("revoked-refresh");
    mount_rejected_primary_refresh(&h).await;

    Mock::given(method("POST"))
        .and(path(OAUTH_TOKEN_PATH))
        .and(body_partial_json(json!({ "grant_type": "refresh_token" })))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(OAUTH_TOKEN_PATH))
        .and(body_partial_json(json!({
            "grant_type": "authorization_code",
            "code": "auth-code",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "idp-access-3",
            "refresh_token": "idp-refresh-3",
            "id_token": "code-id-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_SIGN_IN_PATH))
        .and(body_partial_json(json!({ "token": "code-id-token" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("via-code")))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(oauth_code_credentials());
    session.check_login().await.expect("check_login");

    assert_eq!(session.bearer().await.expect("bearer"), "via-code");
    let oauth = h.store().load_oauth().expect("load").expect("oauth stored");
    assert_eq!(oauth.refresh_token(), Some("idp-refresh-3"));
}

// ============================================================================
// Refresh and fallback
// ============================================================================

#[tokio::test]
async fn test_expired_stored_token_is_refreshed() {
    let h = Harness::start().await;
    h.store_expired_token();

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_partial_json(json!({ "user": { "refresh_token": "stored-refresh" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("refreshed")))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("unused")))
        .expect(0)
        .mount(&h.server)
        .await;

    let session = h.session(password_credentials());
    session.check_login().await.expect("check_login");

    assert_eq!(session.session().map(|s| s.source), Some(SessionSource::Refreshed));
    assert_eq!(
        h.store().load_primary().expect("load").map(|t| t.access_token),
        Some("refreshed".to_string())
    );
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_password_login() {
    let h = Harness::start().await;
    h.store_expired_token();

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("relogged")))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(password_credentials());
    session.check_login().await.expect("check_login");
    assert_eq!(session.bearer().await.expect("bearer"), "relogged");
}

#[tokio::test]
async fn test_exhausted_renewal_expires_session() {
    let h = Harness::start().await;
    h.store_expired_token();

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;

    let session = h.session(password_credentials());
    let err = session.check_login().await.expect_err("must fail");
    assert!(err.is_authentication());
    assert_eq!(session.status(), SessionStatus::Expired);

    // Fails fast afterwards, no further exchanges.
    let err = session.bearer().await.expect_err("expired");
    assert!(err.is_authentication());
    assert_eq!(h.total_requests().await, 2);
}

#[tokio::test]
async fn test_transport_failure_during_renewal_is_retryable() {
    let h = Harness::start().await;
    h.store_expired_token();

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("second-try")))
        .mount(&h.server)
        .await;

    let session = h.session(password_credentials());
    let err = session.check_login().await.expect_err("server unavailable");
    assert!(err.is_transport());
    assert_ne!(session.status(), SessionStatus::Expired);

    session.check_login().await.expect("retry succeeds");
    assert_eq!(session.bearer().await.expect("bearer"), "second-try");
}

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let h = Harness::start().await;
    let session = h.active_session().await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(auth_body("shared"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    session.invalidate("stored-token");

    let callers: Vec<_> = (0..10)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.bearer().await })
        })
        .collect();

    for caller in callers {
        let token = caller.await.expect("join").expect("bearer");
        assert_eq!(token, "shared");
    }
    assert_eq!(h.requests_to(REFRESH_PATH).await, 1);
    assert_eq!(session.status(), SessionStatus::Active);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() {
    let h = Harness::start().await;
    h.store_valid_token("stored-token");
    let session = h.session(password_credentials());
    session.check_login().await.expect("reuse");

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .respond_with(ResponseTemplate::new(403).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&h.server)
        .await;

    session.invalidate("stored-token");

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.bearer().await })
        })
        .collect();

    for caller in callers {
        let err = caller.await.expect("join").expect_err("all fail");
        assert!(err.is_authentication());
    }
    assert_eq!(session.status(), SessionStatus::Expired);
}

#[tokio::test]
async fn test_with_auth_renews_once_on_unauthorized() {
    let h = Harness::start().await;
    let session = h.active_session().await;

    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("authorization", "auth_token stored-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("authorization", "auth_token renewed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices_body(&[DSN])))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("renewed")))
        .expect(1)
        .mount(&h.server)
        .await;

    let client = h.client();
    let devices = session
        .with_auth(|token| {
            let client = client.clone();
            async move { client.list_devices(&token).await }
        })
        .await
        .expect("devices");
    assert_eq!(devices.len(), 1);
}

#[tokio::test]
async fn test_sign_out_clears_both_records() {
    let h = Harness::start().await;
    let session = h.active_session().await;
    std::fs::write(h.store().path(TokenKind::OAuth), "{}").expect("write");

    session.sign_out().expect("sign out");

    assert_eq!(session.status(), SessionStatus::Unauthenticated);
    assert!(!h.store().path(TokenKind::Primary).exists());
    assert!(!h.store().path(TokenKind::OAuth).exists());
    assert!(session.bearer().await.is_err());
}
