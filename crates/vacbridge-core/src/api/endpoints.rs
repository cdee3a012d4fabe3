//! Provider endpoint sets per region.

use serde::{Deserialize, Serialize};

/// Which provider data center the account lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Us,
    Eu,
}

impl Region {
    pub fn from_europe_flag(europe: bool) -> Self {
        if europe {
            Region::Eu
        } else {
            Region::Us
        }
    }

    pub fn endpoints(self) -> Endpoints {
        match self {
            Region::Us => Endpoints {
                user_base: "https://user-field.aylanetworks.com".to_string(),
                device_base: "https://ads-field.aylanetworks.com".to_string(),
                oauth_base: "https://login.sharkninja.com".to_string(),
            },
            Region::Eu => Endpoints {
                user_base: "https://user-field-eu.aylanetworks.com".to_string(),
                device_base: "https://ads-eu.aylanetworks.com".to_string(),
                oauth_base: "https://logineu.sharkninja.com".to_string(),
            },
        }
    }
}

/// Base URLs for one provider deployment.
///
/// Overridable from configuration so the client can be pointed at a
/// private deployment or a local mock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub user_base: String,
    pub device_base: String,
    pub oauth_base: String,
}

impl Endpoints {
    /// All three services behind one base URL (mock servers, proxies).
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            user_base: base.clone(),
            device_base: base.clone(),
            oauth_base: base,
        }
    }

    pub(crate) fn sign_in_url(&self) -> String {
        format!("{}/users/sign_in.json", self.user_base)
    }

    pub(crate) fn refresh_url(&self) -> String {
        format!("{}/users/refresh_token.json", self.user_base)
    }

    pub(crate) fn token_sign_in_url(&self) -> String {
        format!("{}/api/v1/token_sign_in", self.user_base)
    }

    pub(crate) fn oauth_token_url(&self) -> String {
        format!("{}/oauth/token", self.oauth_base)
    }

    pub(crate) fn devices_url(&self) -> String {
        format!("{}/apiv1/devices.json", self.device_base)
    }

    pub(crate) fn properties_url(&self, dsn: &str) -> String {
        format!("{}/apiv1/dsns/{}/properties.json", self.device_base, dsn)
    }

    pub(crate) fn datapoint_url(&self, dsn: &str, property: &str) -> String {
        format!(
            "{}/apiv1/dsns/{}/properties/{}/datapoints.json",
            self.device_base, dsn, property
        )
    }
}
