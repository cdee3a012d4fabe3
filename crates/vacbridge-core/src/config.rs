//! Bridge configuration.
//!
//! Everything the core consumes from its host: account credentials, the
//! devices to manage, region, polling cadence, and where the two token
//! files live. Loaded from `~/.config/vacbridge/config.json` by default,
//! with secrets optionally supplied through environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::{Endpoints, Region};
use crate::error::{Error, Result};

/// Application name used for config/state directory paths
const APP_NAME: &str = "vacbridge";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Token file names inside the state directory
const PRIMARY_TOKEN_FILE: &str = "vacbridge_token.json";
const OAUTH_TOKEN_FILE: &str = "vacbridge_oauth.json";

const DEFAULT_POLLING_INTERVAL_MS: u64 = 30_000;
const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Application identity the provider expects on sign-in calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppIdentity {
    pub app_id: String,
    pub app_secret: String,
    pub oauth_client_id: String,
    pub oauth_redirect_uri: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub email: Option<String>,
    pub password: Option<String>,
    pub oauth_code: Option<String>,
    pub oauth_code_verifier: Option<String>,
    pub dsns: Vec<String>,
    pub europe: bool,
    pub invert_docked: bool,
    pub polling_interval_ms: u64,
    pub debounce_ms: u64,
    pub request_timeout_secs: u64,
    pub state_dir: Option<PathBuf>,
    pub endpoints: Option<Endpoints>,
    pub app: AppIdentity,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            email: None,
            password: None,
            oauth_code: None,
            oauth_code_verifier: None,
            dsns: Vec::new(),
            europe: false,
            invert_docked: false,
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            state_dir: None,
            endpoints: None,
            app: AppIdentity::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("email", &self.email)
            .field("password", &redact(&self.password))
            .field("oauth_code", &redact(&self.oauth_code))
            .field("dsns", &self.dsns)
            .field("europe", &self.europe)
            .field("invert_docked", &self.invert_docked)
            .field("polling_interval_ms", &self.polling_interval_ms)
            .field("debounce_ms", &self.debounce_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("state_dir", &self.state_dir)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load from an explicit path. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path()?)
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Configuration("Could not find config directory".into()))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(email) = lookup("VACBRIDGE_EMAIL") {
            self.email = Some(email);
        }
        if let Some(password) = lookup("VACBRIDGE_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(code) = lookup("VACBRIDGE_OAUTH_CODE") {
            self.oauth_code = Some(code);
        }
        if let Some(verifier) = lookup("VACBRIDGE_OAUTH_CODE_VERIFIER") {
            self.oauth_code_verifier = Some(verifier);
        }
        if let Some(dsns) = lookup("VACBRIDGE_DSNS") {
            self.dsns = dsns
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling_interval_ms == 0 {
            return Err(Error::Configuration(
                "polling_interval_ms must be a positive integer".into(),
            ));
        }
        if self.debounce_ms == 0 {
            return Err(Error::Configuration(
                "debounce_ms must be a positive integer".into(),
            ));
        }
        if self.debounce_ms >= self.polling_interval_ms {
            return Err(Error::Configuration(format!(
                "debounce_ms ({}) must be shorter than polling_interval_ms ({})",
                self.debounce_ms, self.polling_interval_ms
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Configuration(
                "request_timeout_secs must be a positive integer".into(),
            ));
        }
        Ok(())
    }

    pub fn region(&self) -> Region {
        Region::from_europe_flag(self.europe)
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
            .clone()
            .unwrap_or_else(|| self.region().endpoints())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.state_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::Configuration("Could not find data directory".into()))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn primary_token_path(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join(PRIMARY_TOKEN_FILE))
    }

    pub fn oauth_token_path(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join(OAUTH_TOKEN_FILE))
    }
}
