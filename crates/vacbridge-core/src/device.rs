//! Typed view of one robot vacuum.
//!
//! Reads come from the state cache and never block on the network.
//! Commands are acknowledged by the provider and return; the device acts
//! on them in its own time and the new state shows up on a later poll.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::api::ApiClient;
use crate::auth::SessionManager;
use crate::cache::DeviceStateCache;
use crate::error::Result;
use crate::models::vacuum::value_as_i64;
use crate::models::{property, ChangeEvent, DeviceIdentity, OperatingMode, PowerMode};

#[derive(Clone)]
pub struct Vacuum {
    identity: DeviceIdentity,
    client: ApiClient,
    session: SessionManager,
    cache: Arc<DeviceStateCache>,
    invert_docked: bool,
}

impl Vacuum {
    pub fn new(
        identity: DeviceIdentity,
        client: ApiClient,
        session: SessionManager,
        cache: Arc<DeviceStateCache>,
        invert_docked: bool,
    ) -> Self {
        Self {
            identity,
            client,
            session,
            cache,
            invert_docked,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn dsn(&self) -> &str {
        &self.identity.dsn
    }

    fn cached(&self, name: &str) -> Option<Value> {
        self.cache.get(&self.identity.dsn, name).map(|p| p.value)
    }

    fn cached_i64(&self, name: &str) -> Option<i64> {
        self.cached(name).as_ref().and_then(value_as_i64)
    }

    // ===== Reads =====

    /// Docked state, honoring the configured polarity inversion.
    pub fn is_docked(&self) -> Option<bool> {
        self.cached_i64(property::DOCKED_STATUS)
            .map(|raw| (raw != 0) != self.invert_docked)
    }

    pub fn is_charging(&self) -> Option<bool> {
        self.cached_i64(property::CHARGING_STATUS).map(|raw| raw != 0)
    }

    pub fn operating_mode(&self) -> Option<OperatingMode> {
        self.cached(property::OPERATING_MODE)
            .as_ref()
            .and_then(OperatingMode::from_value)
    }

    pub fn power_mode(&self) -> Option<PowerMode> {
        self.cached(property::POWER_MODE)
            .as_ref()
            .and_then(PowerMode::from_value)
    }

    pub fn is_active(&self) -> Option<bool> {
        self.operating_mode().map(OperatingMode::is_active)
    }

    pub fn is_paused(&self) -> Option<bool> {
        self.operating_mode().map(|m| m == OperatingMode::Pause)
    }

    /// Battery percentage, clamped to 0..=100.
    pub fn battery_level(&self) -> Option<u8> {
        self.cached_i64(property::BATTERY_CAPACITY)
            .map(|level| level.clamp(0, 100) as u8)
    }

    /// Provider error code; `None` while the device reports no error.
    pub fn error_code(&self) -> Option<i64> {
        self.cached_i64(property::ERROR_CODE).filter(|code| *code != 0)
    }

    // ===== Refresh =====

    /// Schedule a debounced refresh.
    pub fn request_refresh(&self) {
        self.cache.request_refresh(&self.identity.dsn);
    }

    /// Fetch the polled properties right now.
    pub async fn refresh(&self) -> Result<Vec<ChangeEvent>> {
        self.cache.refresh_polled(&self.identity.dsn).await
    }

    // ===== Commands =====

    pub async fn send_home(&self) -> Result<()> {
        self.set_operating_mode(OperatingMode::Return).await
    }

    pub async fn set_active(&self, active: bool) -> Result<()> {
        let mode = if active {
            OperatingMode::Start
        } else {
            OperatingMode::Stop
        };
        self.set_operating_mode(mode).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        let mode = if paused {
            OperatingMode::Pause
        } else {
            OperatingMode::Start
        };
        self.set_operating_mode(mode).await
    }

    pub async fn set_operating_mode(&self, mode: OperatingMode) -> Result<()> {
        info!(dsn = %self.identity.dsn, mode = ?mode, "Setting operating mode");
        self.command(property::SET_OPERATING_MODE, Value::from(mode.code()))
            .await
    }

    pub async fn set_power_mode(&self, mode: PowerMode) -> Result<()> {
        info!(dsn = %self.identity.dsn, mode = ?mode, "Setting power mode");
        self.command(property::SET_POWER_MODE, Value::from(mode.code()))
            .await
    }

    /// Write a property, then mark its read counterpart stale and schedule
    /// a refresh so the cache catches up with the command.
    async fn command(&self, name: &str, value: Value) -> Result<()> {
        let client = &self.client;
        let dsn = self.identity.dsn.as_str();
        let value = &value;
        self.session
            .with_auth(|token| async move { client.set_property(&token, dsn, name, value).await })
            .await?;

        let stale: Vec<&str> = property::read_counterpart(name).into_iter().collect();
        self.cache.invalidate(dsn, &stale);
        Ok(())
    }
}
