//! Session management: token reuse, refresh, and re-login.
//!
//! The session moves through
//! `Unauthenticated → Authenticating → Active → Refreshing → Active | Expired`.
//!
//! Every renewal (initial login, refresh, fallback re-login) runs as a
//! single shared future. Callers that find the credential unusable while a
//! renewal is in flight await that same future, so a burst of expired
//! callers costs one network exchange and all of them see one outcome.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, ErrorCategory};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{OAuthToken, PrimaryToken, TokenKind};

use super::CredentialStore;

/// Login inputs as configured, before they are resolved into a method.
#[derive(Clone, Default)]
pub struct LoginCredentials {
    pub email: Option<String>,
    pub password: Option<String>,
    pub oauth_code: Option<String>,
    pub oauth_code_verifier: Option<String>,
}

impl LoginCredentials {
    pub fn from_config(config: &Config) -> Self {
        Self {
            email: config.email.clone(),
            password: config.password.clone(),
            oauth_code: config.oauth_code.clone(),
            oauth_code_verifier: config.oauth_code_verifier.clone(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// How to obtain a fresh credential when nothing stored is usable.
#[derive(Clone, PartialEq, Eq)]
pub enum LoginMethod {
    Password { email: String, password: String },
    OAuthCode { code: String, verifier: Option<String> },
}

impl std::fmt::Debug for LoginMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginMethod::Password { email, .. } => {
                f.debug_struct("Password").field("email", email).finish_non_exhaustive()
            }
            LoginMethod::OAuthCode { .. } => f.debug_struct("OAuthCode").finish_non_exhaustive(),
        }
    }
}

impl LoginMethod {
    /// Resolve the configured inputs into at most one login method.
    ///
    /// A complete email/password pair wins over an OAuth code. Half a pair
    /// is rejected even when a code is also present.
    pub fn resolve(credentials: &LoginCredentials) -> Result<Option<Self>> {
        let email = non_empty(&credentials.email);
        let password = non_empty(&credentials.password);
        let code = non_empty(&credentials.oauth_code);

        match (email, password, code) {
            (Some(email), Some(password), _) => Ok(Some(LoginMethod::Password { email, password })),
            (Some(_), None, _) => Err(Error::Configuration(
                "email is set but password is empty".into(),
            )),
            (None, Some(_), _) => Err(Error::Configuration(
                "password is set but email is empty".into(),
            )),
            (None, None, Some(code)) => Ok(Some(LoginMethod::OAuthCode {
                code,
                verifier: non_empty(&credentials.oauth_code_verifier),
            })),
            (None, None, None) => Ok(None),
        }
    }

    fn source(&self) -> SessionSource {
        match self {
            LoginMethod::Password { .. } => SessionSource::Password,
            LoginMethod::OAuthCode { .. } => SessionSource::OAuthCode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    Authenticating,
    Active,
    Refreshing,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    Password,
    OAuthCode,
    Refreshed,
    Reused,
}

/// The credential currently in use.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: PrimaryToken,
    pub source: SessionSource,
    pub established_at: DateTime<Utc>,
}

impl Session {
    fn new(token: PrimaryToken, source: SessionSource) -> Self {
        Self {
            token,
            source,
            established_at: Utc::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.token.is_expired()
    }
}

type Renewal = Shared<BoxFuture<'static, Result<Session>>>;

struct SessionState {
    status: SessionStatus,
    session: Option<Session>,
    /// The provider rejected the current token before its expiry.
    rejected: bool,
    method: Option<LoginMethod>,
    inflight: Option<Renewal>,
}

struct SessionInner {
    client: ApiClient,
    store: CredentialStore,
    credentials: LoginCredentials,
    state: Mutex<SessionState>,
}

/// Owner of the live session. Clone is cheap; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(client: ApiClient, store: CredentialStore, credentials: LoginCredentials) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client,
                store,
                credentials,
                state: Mutex::new(SessionState {
                    status: SessionStatus::Unauthenticated,
                    session: None,
                    rejected: false,
                    method: None,
                    inflight: None,
                }),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock_state().status
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.lock_state().session.clone()
    }

    /// Establish a session at startup.
    ///
    /// An unexpired stored token is reused without touching the network.
    /// Otherwise the configured login method is required; the stored
    /// refresh token, if any, is tried before a full login.
    pub async fn check_login(&self) -> Result<SessionStatus> {
        let method = LoginMethod::resolve(&self.inner.credentials)?;

        let renewal = {
            let mut state = self.inner.lock_state();
            state.method = method.clone();

            if state.status == SessionStatus::Active && !state.rejected {
                if let Some(session) = state.session.as_ref().filter(|s| s.is_valid()) {
                    debug!(source = ?session.source, "Session already active");
                    return Ok(SessionStatus::Active);
                }
            }

            let stored = match self.inner.store.load_primary() {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Stored token unreadable, ignoring it");
                    None
                }
            };

            match stored {
                Some(token) if !token.is_expired() => {
                    info!("Reusing stored token");
                    state.session = Some(Session::new(token, SessionSource::Reused));
                    state.status = SessionStatus::Active;
                    state.rejected = false;
                    return Ok(SessionStatus::Active);
                }
                Some(token) => {
                    debug!("Stored token expired");
                    if state.session.is_none() {
                        state.session = Some(Session::new(token, SessionSource::Reused));
                    }
                }
                None => {}
            }

            if method.is_none() {
                return Err(Error::Configuration(
                    "no usable stored token: configure email and password, or an OAuth code"
                        .into(),
                ));
            }

            self.inner.start_renewal(&mut state, true)
        };

        renewal.await?;
        Ok(SessionStatus::Active)
    }

    /// Sign in with the configured login method, ignoring any stored token.
    ///
    /// The new token is persisted. A renewal already in flight is joined
    /// rather than duplicated.
    pub async fn sign_in(&self) -> Result<Session> {
        let method = LoginMethod::resolve(&self.inner.credentials)?.ok_or_else(|| {
            Error::Configuration("sign in needs email and password, or an OAuth code".into())
        })?;

        let renewal = {
            let mut state = self.inner.lock_state();
            state.method = Some(method);
            self.inner.start_renewal(&mut state, false)
        };
        renewal.await
    }

    /// A bearer token that is valid right now, renewing it if needed.
    pub async fn bearer(&self) -> Result<String> {
        let renewal = {
            let mut state = self.inner.lock_state();
            match state.status {
                SessionStatus::Unauthenticated => {
                    return Err(Error::Authentication("not signed in".into()));
                }
                SessionStatus::Expired => {
                    return Err(Error::Authentication(
                        "session expired and could not be renewed".into(),
                    ));
                }
                _ => {}
            }

            let usable = state
                .session
                .as_ref()
                .filter(|s| s.is_valid() && !state.rejected && state.inflight.is_none())
                .map(|s| s.token.access_token.clone());
            match usable {
                Some(token) => return Ok(token),
                None => self.inner.start_renewal(&mut state, true),
            }
        };

        renewal.await.map(|session| session.token.access_token)
    }

    /// Record that the provider rejected `token`.
    ///
    /// Ignored when the session has already moved on to a different token.
    pub fn invalidate(&self, token: &str) {
        let mut state = self.inner.lock_state();
        let current = state
            .session
            .as_ref()
            .map(|s| s.token.access_token == token)
            .unwrap_or(false);
        if current && !state.rejected {
            debug!("Active token rejected by provider");
            state.rejected = true;
        }
    }

    /// Run an authenticated call, renewing once and retrying once if the
    /// provider rejects the credential.
    pub async fn with_auth<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let token = self.bearer().await?;
        match op(token.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if e.category() == ErrorCategory::Authentication => {
                warn!(error = %e, "Authenticated call rejected, renewing session");
                self.invalidate(&token);
                let token = self.bearer().await?;
                op(token).await.map_err(Error::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forget the session and both stored tokens.
    pub fn sign_out(&self) -> Result<()> {
        {
            let mut state = self.inner.lock_state();
            state.session = None;
            state.rejected = false;
            state.status = SessionStatus::Unauthenticated;
        }
        self.inner.store.clear(TokenKind::Primary)?;
        self.inner.store.clear(TokenKind::OAuth)?;
        info!("Signed out");
        Ok(())
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the in-flight renewal or start one. Caller holds the state lock.
    ///
    /// With `try_refresh` unset the stored refresh token is skipped and the
    /// configured login method is used directly.
    fn start_renewal(self: &Arc<Self>, state: &mut SessionState, try_refresh: bool) -> Renewal {
        if let Some(ref inflight) = state.inflight {
            return inflight.clone();
        }

        let previous_status = state.status;
        state.status = if try_refresh
            && state.session.is_some()
            && previous_status != SessionStatus::Expired
        {
            SessionStatus::Refreshing
        } else {
            SessionStatus::Authenticating
        };
        debug!(status = ?state.status, "Starting session renewal");

        let inner = Arc::clone(self);
        let previous = if try_refresh {
            state.session.clone()
        } else {
            None
        };
        let method = state.method.clone();
        let fallback_status = match previous_status {
            SessionStatus::Expired | SessionStatus::Unauthenticated => previous_status,
            _ => SessionStatus::Active,
        };

        let renewal = async move {
            let outcome = inner.renew(previous, method).await;
            inner.finish_renewal(outcome, fallback_status)
        }
        .boxed()
        .shared();

        state.inflight = Some(renewal.clone());
        renewal
    }

    fn finish_renewal(&self, outcome: Result<Session>, fallback_status: SessionStatus) -> Result<Session> {
        let mut state = self.lock_state();
        state.inflight = None;

        match outcome {
            Ok(session) => {
                info!(source = ?session.source, "Session active");
                state.session = Some(session.clone());
                state.rejected = false;
                state.status = SessionStatus::Active;
                Ok(session)
            }
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Session renewal interrupted, will retry on next call");
                state.status = fallback_status;
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Session renewal failed");
                state.status = SessionStatus::Expired;
                Err(e)
            }
        }
    }

    /// Refresh once, then fall back to a full login.
    async fn renew(&self, previous: Option<Session>, method: Option<LoginMethod>) -> Result<Session> {
        if let Some(previous) = previous.filter(|s| s.token.has_refresh_token()) {
            match self
                .client
                .refresh_token(&previous.token.refresh_token, previous.token.account.clone())
                .await
            {
                Ok(token) => {
                    self.persist_primary(&token);
                    return Ok(Session::new(token, SessionSource::Refreshed));
                }
                Err(e) => {
                    let err = Error::from(e);
                    if err.is_transport() {
                        return Err(err);
                    }
                    warn!(error = %err, "Token refresh rejected, falling back to full login");
                }
            }
        }

        let method = method.ok_or_else(|| {
            Error::Authentication("token refresh failed and no login credentials are configured".into())
        })?;
        let token = self.login(&method).await?;
        self.persist_primary(&token);
        Ok(Session::new(token, method.source()))
    }

    async fn login(&self, method: &LoginMethod) -> Result<PrimaryToken> {
        match method {
            LoginMethod::Password { email, password } => {
                if self.client.app().app_id.is_empty() {
                    return Err(Error::Configuration("app.app_id is not configured".into()));
                }
                info!(email = %email, "Signing in with password");
                Ok(self.client.sign_in(email, password).await?)
            }
            LoginMethod::OAuthCode { code, verifier } => {
                if self.client.app().oauth_client_id.is_empty() {
                    return Err(Error::Configuration(
                        "app.oauth_client_id is not configured".into(),
                    ));
                }
                let oauth = match self.stored_oauth_refresh().await {
                    Some(oauth) => oauth,
                    None => {
                        info!("Redeeming OAuth authorization code");
                        let oauth = self
                            .client
                            .exchange_oauth_code(code, verifier.as_deref())
                            .await?;
                        if let Err(e) = self.store.save_oauth(&oauth) {
                            warn!(error = %e, "Failed to persist OAuth token");
                        }
                        oauth
                    }
                };
                let id_token = oauth.id_token.as_deref().ok_or_else(|| {
                    Error::Protocol("identity provider returned no id token".into())
                })?;
                Ok(self.client.token_sign_in(id_token).await?)
            }
        }
    }

    /// Refresh the stored OAuth token, if there is one with a refresh token.
    ///
    /// Authorization codes are single use, so after the first login this is
    /// the only way back in without user interaction.
    async fn stored_oauth_refresh(&self) -> Option<OAuthToken> {
        let stored = match self.store.load_oauth() {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(error = %e, "Stored OAuth token unreadable, ignoring it");
                return None;
            }
        };
        let refresh = stored.refresh_token()?.to_string();

        match self.client.refresh_oauth(&refresh).await {
            Ok(oauth) => {
                if let Err(e) = self.store.save_oauth(&oauth) {
                    warn!(error = %e, "Failed to persist OAuth token");
                }
                Some(oauth)
            }
            Err(e) => {
                warn!(error = %e, "OAuth refresh failed, redeeming authorization code instead");
                None
            }
        }
    }

    fn persist_primary(&self, token: &PrimaryToken) {
        if let Err(e) = self.store.save_primary(token) {
            warn!(error = %e, "Failed to persist primary token");
        }
    }
}
