//! The owned runtime context a host drives.
//!
//! A host calls `Bridge::init` once, takes the change event stream, starts
//! polling, and hands out `Vacuum` facades. `shutdown` stops the timer and
//! any scheduled refresh; nothing else keeps running afterwards.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::ApiClient;
use crate::auth::{CredentialStore, LoginCredentials, SessionManager, SessionStatus};
use crate::cache::DeviceStateCache;
use crate::config::Config;
use crate::device::Vacuum;
use crate::error::{Error, Result};
use crate::models::{property, ChangeEvent};

pub struct Bridge {
    config: Config,
    session: SessionManager,
    cache: Arc<DeviceStateCache>,
    vacuums: Vec<Vacuum>,
    poller: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Validate configuration, sign in, and discover the configured devices.
    pub async fn init(config: Config) -> Result<Self> {
        config.validate()?;

        let client = ApiClient::new(
            config.endpoints(),
            config.app.clone(),
            config.request_timeout(),
        )
        .map_err(Error::from)?;
        let store = CredentialStore::new(config.primary_token_path()?, config.oauth_token_path()?);
        let session = SessionManager::new(
            client.clone(),
            store,
            LoginCredentials::from_config(&config),
        );

        session.check_login().await?;

        let cache = DeviceStateCache::new(
            client.clone(),
            session.clone(),
            config.debounce_window(),
            property::POLLED,
        );
        let identities = cache.discover(&config.dsns).await?;

        let vacuums = identities
            .into_iter()
            .map(|identity| {
                Vacuum::new(
                    identity,
                    client.clone(),
                    session.clone(),
                    Arc::clone(&cache),
                    config.invert_docked,
                )
            })
            .collect::<Vec<_>>();

        info!(devices = vacuums.len(), "Bridge initialized");
        Ok(Self {
            config,
            session,
            cache,
            vacuums,
            poller: None,
        })
    }

    pub fn vacuums(&self) -> &[Vacuum] {
        &self.vacuums
    }

    pub fn vacuum(&self, dsn: &str) -> Option<&Vacuum> {
        self.vacuums.iter().find(|v| v.dsn() == dsn)
    }

    pub fn session_status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn cache(&self) -> &Arc<DeviceStateCache> {
        &self.cache
    }

    /// The change event stream. Can be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChangeEvent>> {
        self.cache.take_events()
    }

    /// Start the polling timer. Calling it again is a no-op.
    pub fn start_polling(&mut self) {
        if self.poller.is_some() {
            return;
        }
        self.poller = Some(self.cache.schedule_polling(self.config.polling_interval()));
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    pub fn shutdown(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.cache.cancel_pending();
        info!("Bridge shut down");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        // Scheduled runs hold their own handle on the cache.
        self.cache.cancel_pending();
    }
}
