//! Persisted credential records.
//!
//! Two kinds are stored independently: the provider's own bearer token
//! (`PrimaryToken`) and the identity provider token obtained through the
//! OAuth authorization-code flow (`OAuthToken`). Both are opaque to
//! everything except the session manager.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Treat tokens as expired this long before the provider would.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Primary,
    OAuth,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Primary => "primary",
            TokenKind::OAuth => "oauth",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// Account the token was issued for (email, or the OAuth subject).
    pub account: Option<String>,
}

impl PrimaryToken {
    pub fn new(
        access_token: String,
        refresh_token: String,
        expires_in_secs: i64,
        account: Option<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            account,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRecord {
    Primary(PrimaryToken),
    OAuth(OAuthToken),
}

impl CredentialRecord {
    pub fn kind(&self) -> TokenKind {
        match self {
            CredentialRecord::Primary(_) => TokenKind::Primary,
            CredentialRecord::OAuth(_) => TokenKind::OAuth,
        }
    }
}
