//! Common test utilities for integration tests.
//!
//! A `Harness` owns a `wiremock::MockServer` standing in for every provider
//! service plus a temp directory holding the token files.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vacbridge_core::api::{ApiClient, Endpoints};
use vacbridge_core::auth::{CredentialStore, LoginCredentials, SessionManager};
use vacbridge_core::cache::DeviceStateCache;
use vacbridge_core::config::AppIdentity;
use vacbridge_core::models::{property, OAuthToken, PrimaryToken};
use vacbridge_core::Config;

pub const DSN: &str = "AC000W000000001";
pub const OTHER_DSN: &str = "AC000W000000002";

pub const SIGN_IN_PATH: &str = "/users/sign_in.json";
pub const REFRESH_PATH: &str = "/users/refresh_token.json";
pub const TOKEN_SIGN_IN_PATH: &str = "/api/v1/token_sign_in";
pub const OAUTH_TOKEN_PATH: &str = "/oauth/token";
pub const DEVICES_PATH: &str = "/apiv1/devices.json";

pub fn properties_path(dsn: &str) -> String {
    format!("/apiv1/dsns/{}/properties.json", dsn)
}

pub fn datapoint_path(dsn: &str, name: &str) -> String {
    format!("/apiv1/dsns/{}/properties/{}/datapoints.json", dsn, name)
}

pub struct Harness {
    pub server: MockServer,
    pub dir: TempDir,
}

impl Harness {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn app() -> AppIdentity {
        AppIdentity {
            app_id: "test-app-id".to_string(),
            app_secret: "test-app-secret".to_string(),
            oauth_client_id: "test-client-id".to_string(),
            oauth_redirect_uri: "vacbridge://callback".to_string(),
        }
    }

    pub fn config(&self) -> Config {
        Config {
            dsns: vec![DSN.to_string()],
            debounce_ms: 50,
            polling_interval_ms: 60_000,
            request_timeout_secs: 5,
            state_dir: Some(self.dir.path().to_path_buf()),
            endpoints: Some(Endpoints::single_host(&self.server.uri())),
            app: Self::app(),
            ..Config::default()
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(
            Endpoints::single_host(&self.server.uri()),
            Self::app(),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    pub fn store(&self) -> CredentialStore {
        let config = self.config();
        CredentialStore::new(
            config.primary_token_path().expect("primary path"),
            config.oauth_token_path().expect("oauth path"),
        )
    }

    pub fn session(&self, credentials: LoginCredentials) -> SessionManager {
        SessionManager::new(self.client(), self.store(), credentials)
    }

    /// A session already active on a stored, unexpired token.
    pub async fn active_session(&self) -> SessionManager {
        self.store_valid_token("stored-token");
        let session = self.session(LoginCredentials::default());
        session.check_login().await.expect("reuse stored token");
        session
    }

    pub fn cache(&self, session: &SessionManager) -> Arc<DeviceStateCache> {
        DeviceStateCache::new(
            self.client(),
            session.clone(),
            Duration::from_millis(50),
            property::POLLED,
        )
    }

    pub fn store_valid_token(&self, access: &str) {
        self.store()
            .save_primary(&PrimaryToken {
                access_token: access.to_string(),
                refresh_token: "stored-refresh".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(12),
                account: Some("me@example.com".to_string()),
            })
            .expect("save token");
    }

    pub fn store_expired_token(&self) {
        self.store()
            .save_primary(&PrimaryToken {
                access_token: "expired-token".to_string(),
                refresh_token: "stored-refresh".to_string(),
                expires_at: Utc::now() - ChronoDuration::hours(1),
                account: Some("me@example.com".to_string()),
            })
            .expect("save token");
    }

    /// A stored identity provider record left by an earlier code login.
    pub fn store_oauth_record(&self, refresh: &str) {
        self.store()
            .save_oauth(&OAuthToken {
                access_token: "idp-access".to_string(),
                refresh_token: Some(refresh.to_string()),
                id_token: Some("stale-id-token".to_string()),
                expires_at: Utc::now() - ChronoDuration::hours(1),
                token_type: Some("Bearer".to_string()),
                scope: None,
            })
            .expect("save oauth");
    }

    /// Bodies of every request the server has seen, as text.
    pub async fn request_bodies(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }

    /// Number of requests the server has seen for `request_path`.
    pub async fn requests_to(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }

    pub async fn total_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .len()
    }

    pub async fn mount_properties(&self, dsn: &str, props: &[(&str, Value)]) {
        Mock::given(method("GET"))
            .and(path(properties_path(dsn)))
            .respond_with(ResponseTemplate::new(200).set_body_json(properties_body(props)))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_devices(&self, dsns: &[&str]) {
        Mock::given(method("GET"))
            .and(path(DEVICES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(devices_body(dsns)))
            .mount(&self.server)
            .await;
    }
}

pub fn auth_body(access: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": format!("{}-refresh", access),
        "expires_in": 86400,
        "role": "EndUser",
    })
}

pub fn properties_body(props: &[(&str, Value)]) -> Value {
    Value::Array(
        props
            .iter()
            .map(|(name, value)| {
                json!({
                    "property": {
                        "type": "Property",
                        "name": name,
                        "base_type": "integer",
                        "read_only": true,
                        "value": value,
                        "data_updated_at": "2026-10-16T08:00:00Z",
                    }
                })
            })
            .collect(),
    )
}

pub fn devices_body(dsns: &[&str]) -> Value {
    Value::Array(
        dsns.iter()
            .enumerate()
            .map(|(i, dsn)| {
                json!({
                    "device": {
                        "product_name": format!("Vacuum {}", i + 1),
                        "model": "AY001MRT1",
                        "dsn": dsn,
                        "oem_model": "RV1001AE",
                        "connection_status": "Online",
                    }
                })
            })
            .collect(),
    )
}

pub fn password_credentials() -> LoginCredentials {
    LoginCredentials {
        email: Some("me@example.com".to_string()),
        password: Some("correct horse".to_string()),
        ..LoginCredentials::default()
    }
}
