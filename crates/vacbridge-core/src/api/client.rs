//! API client for the provider's user and device services.
//!
//! The client is stateless with respect to authentication: every
//! authenticated call takes the bearer token as an argument, so it can
//! never act on a credential the session manager has already replaced.

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AppIdentity;
use crate::models::{DeviceIdentity, OAuthToken, PrimaryToken};

use super::{ApiError, Endpoints};

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 86_400;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceEnvelope {
    device: DeviceResponse,
}

#[derive(Debug, Deserialize)]
struct DeviceResponse {
    dsn: String,
    model: Option<String>,
    oem_model: Option<String>,
    product_name: Option<String>,
}

impl DeviceResponse {
    fn into_identity(self) -> DeviceIdentity {
        DeviceIdentity {
            dsn: self.dsn,
            model: self.oem_model.or(self.model),
            name: self.product_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PropertyEnvelope {
    property: PropertyResponse,
}

#[derive(Debug, Deserialize)]
struct PropertyResponse {
    name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Serialize)]
struct DatapointRequest<'a> {
    datapoint: DatapointValue<'a>,
}

#[derive(Debug, Serialize)]
struct DatapointValue<'a> {
    value: &'a Value,
}

/// API client for the provider.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    endpoints: Endpoints,
    app: AppIdentity,
}

impl ApiClient {
    /// Create a client whose every request is bounded by `timeout`.
    pub fn new(endpoints: Endpoints, app: AppIdentity, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::from_reqwest)?;

        Ok(Self {
            client,
            endpoints,
            app,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn app(&self) -> &AppIdentity {
        &self.app
    }

    // ===== Authentication =====

    /// Exchange email and password for a primary token.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<PrimaryToken, ApiError> {
        let body = json!({
            "user": {
                "email": email,
                "password": password,
                "application": {
                    "app_id": self.app.app_id,
                    "app_secret": self.app.app_secret,
                }
            }
        });
        let request = self.client.post(self.endpoints.sign_in_url()).json(&body);
        let auth: AuthResponse = Self::send_json(request).await?;
        debug!("Password sign-in succeeded");
        Ok(auth.into_primary(Some(email.to_string())))
    }

    /// Trade a refresh token for a new primary token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        account: Option<String>,
    ) -> Result<PrimaryToken, ApiError> {
        let body = json!({ "user": { "refresh_token": refresh_token } });
        let request = self.client.post(self.endpoints.refresh_url()).json(&body);
        let auth: AuthResponse = Self::send_json(request).await?;
        debug!("Primary token refreshed");
        Ok(auth.into_primary(account))
    }

    /// Exchange an identity provider id token for a primary token.
    pub async fn token_sign_in(&self, id_token: &str) -> Result<PrimaryToken, ApiError> {
        let body = json!({
            "app_id": self.app.app_id,
            "app_secret": self.app.app_secret,
            "token": id_token,
        });
        let request = self.client.post(self.endpoints.token_sign_in_url()).json(&body);
        let auth: AuthResponse = Self::send_json(request).await?;
        debug!("Token sign-in succeeded");
        Ok(auth.into_primary(None))
    }

    /// Redeem an OAuth authorization code at the identity provider.
    pub async fn exchange_oauth_code(
        &self,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<OAuthToken, ApiError> {
        let mut body = json!({
            "grant_type": "authorization_code",
            "client_id": self.app.oauth_client_id,
            "code": code,
            "redirect_uri": self.app.oauth_redirect_uri,
        });
        if let Some(verifier) = verifier {
            body["code_verifier"] = Value::String(verifier.to_string());
        }
        let request = self.client.post(self.endpoints.oauth_token_url()).json(&body);
        let oauth: OAuthResponse = Self::send_json(request).await?;
        debug!("OAuth authorization code redeemed");
        Ok(oauth.into_token(None))
    }

    /// Refresh the identity provider token. The provider may omit a new
    /// refresh token, in which case the old one stays valid.
    pub async fn refresh_oauth(&self, refresh_token: &str) -> Result<OAuthToken, ApiError> {
        let body = json!({
            "grant_type": "refresh_token",
            "client_id": self.app.oauth_client_id,
            "refresh_token": refresh_token,
        });
        let request = self.client.post(self.endpoints.oauth_token_url()).json(&body);
        let oauth: OAuthResponse = Self::send_json(request).await?;
        debug!("OAuth token refreshed");
        Ok(oauth.into_token(Some(refresh_token)))
    }

    // ===== Devices =====

    /// List every device registered to the account.
    pub async fn list_devices(&self, token: &str) -> Result<Vec<DeviceIdentity>, ApiError> {
        let request = self
            .client
            .get(self.endpoints.devices_url())
            .headers(Self::auth_headers(token)?);
        let devices: Vec<DeviceEnvelope> = Self::send_json(request).await?;
        debug!(count = devices.len(), "Device list received");
        Ok(devices.into_iter().map(|d| d.device.into_identity()).collect())
    }

    /// Fetch the named properties of one device.
    ///
    /// Only properties the provider reports are returned; a requested name
    /// the device does not have is simply absent.
    pub async fn get_properties(
        &self,
        token: &str,
        dsn: &str,
        names: &[&str],
    ) -> Result<Vec<(String, Value)>, ApiError> {
        let query: Vec<(&str, &str)> = names.iter().map(|n| ("names[]", *n)).collect();
        let request = self
            .client
            .get(self.endpoints.properties_url(dsn))
            .headers(Self::auth_headers(token)?)
            .query(&query);
        let properties: Vec<PropertyEnvelope> = Self::send_json(request).await?;
        debug!(dsn = %dsn, count = properties.len(), "Properties received");
        Ok(properties
            .into_iter()
            .map(|p| (p.property.name, p.property.value))
            .collect())
    }

    /// Write one property value. Acknowledged once the provider accepts the
    /// datapoint, not when the device acts on it.
    pub async fn set_property(
        &self,
        token: &str,
        dsn: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), ApiError> {
        let body = DatapointRequest {
            datapoint: DatapointValue { value },
        };
        let request = self
            .client
            .post(self.endpoints.datapoint_url(dsn, name))
            .headers(Self::auth_headers(token)?)
            .json(&body);
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        Self::check_response(response).await?;
        debug!(dsn = %dsn, property = name, "Property write acknowledged");
        Ok(())
    }

    // ===== Helpers =====

    fn auth_headers(token: &str) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(&format!("auth_token {}", token))
            .map_err(|_| ApiError::InvalidResponse("token is not a valid header value".into()))?;
        headers.insert(header::AUTHORIZATION, value);
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let response = Self::check_response(response).await?;
        let text = response.text().await.map_err(ApiError::from_reqwest)?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

impl AuthResponse {
    fn into_primary(self, account: Option<String>) -> PrimaryToken {
        PrimaryToken::new(
            self.access_token,
            self.refresh_token,
            self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            account,
        )
    }
}

impl OAuthResponse {
    fn into_token(self, previous_refresh: Option<&str>) -> OAuthToken {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        OAuthToken {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            id_token: self.id_token,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(lifetime),
            token_type: self.token_type,
            scope: self.scope,
        }
    }
}
