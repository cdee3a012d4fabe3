//! Per-device state cache with debounced polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::auth::SessionManager;
use crate::error::{Error, Result};
use crate::models::{ChangeEvent, DeviceIdentity, DeviceSnapshot, PropertyValue};

use super::Debouncer;

struct ManagedDevice {
    snapshot: Mutex<DeviceSnapshot>,
    /// Held for the whole fetch-and-apply, so one device never has two
    /// fetches in flight.
    fetch_lock: tokio::sync::Mutex<()>,
    debouncer: Debouncer,
}

impl ManagedDevice {
    fn snapshot(&self) -> MutexGuard<'_, DeviceSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where change events go. Nothing is queued until a host takes the
/// stream, and nothing after it hangs up.
enum EventSink {
    Untaken,
    Open(mpsc::UnboundedSender<ChangeEvent>),
    Closed,
}

pub struct DeviceStateCache {
    client: ApiClient,
    session: SessionManager,
    debounce_window: Duration,
    polled: Vec<String>,
    devices: RwLock<HashMap<String, Arc<ManagedDevice>>>,
    events: Mutex<EventSink>,
}

impl DeviceStateCache {
    /// `polled` is the property set fetched on every scheduled refresh.
    pub fn new(
        client: ApiClient,
        session: SessionManager,
        debounce_window: Duration,
        polled: &[&str],
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            session,
            debounce_window,
            polled: polled.iter().map(|p| p.to_string()).collect(),
            devices: RwLock::new(HashMap::new()),
            events: Mutex::new(EventSink::Untaken),
        })
    }

    fn events(&self) -> MutexGuard<'_, EventSink> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The change event stream. Can be taken once; changes observed before
    /// it is taken are not replayed.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChangeEvent>> {
        let mut sink = self.events();
        match *sink {
            EventSink::Untaken => {
                let (tx, rx) = mpsc::unbounded_channel();
                *sink = EventSink::Open(tx);
                Some(rx)
            }
            EventSink::Open(_) | EventSink::Closed => None,
        }
    }

    fn publish(&self, events: &[ChangeEvent]) {
        let mut sink = self.events();
        let hung_up = match *sink {
            EventSink::Open(ref tx) => events.iter().any(|e| tx.send(e.clone()).is_err()),
            EventSink::Untaken | EventSink::Closed => false,
        };
        if hung_up {
            debug!("Change event receiver dropped");
            *sink = EventSink::Closed;
        }
    }

    // ===== Discovery =====

    /// Match the configured serial numbers against the account's devices
    /// and start tracking the ones that exist.
    ///
    /// With nothing configured there is nothing to manage and no request
    /// is made.
    pub async fn discover(&self, configured: &[String]) -> Result<Vec<DeviceIdentity>> {
        if configured.is_empty() {
            info!("No devices configured");
            return Ok(Vec::new());
        }

        let client = &self.client;
        let listed = self
            .session
            .with_auth(|token| async move { client.list_devices(&token).await })
            .await?;

        let mut found = Vec::new();
        for dsn in configured {
            match listed.iter().find(|d| d.dsn.eq_ignore_ascii_case(dsn)) {
                Some(identity) => found.push(identity.clone()),
                None => warn!(dsn = %dsn, "Configured device not found on account"),
            }
        }

        for identity in &found {
            info!(dsn = %identity.dsn, name = identity.display_name(), "Managing device");
            self.track(identity.clone());
        }
        Ok(found)
    }

    /// Start tracking a device. Existing snapshots are kept.
    pub fn track(&self, identity: DeviceIdentity) {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices.entry(identity.dsn.clone()).or_insert_with(|| {
            Arc::new(ManagedDevice {
                snapshot: Mutex::new(DeviceSnapshot::new(identity)),
                fetch_lock: tokio::sync::Mutex::new(()),
                debouncer: Debouncer::new(self.debounce_window),
            })
        });
    }

    fn device(&self, dsn: &str) -> Result<Arc<ManagedDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dsn)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("device {} is not managed", dsn)))
    }

    fn all_devices(&self) -> Vec<(String, Arc<ManagedDevice>)> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(dsn, device)| (dsn.clone(), Arc::clone(device)))
            .collect()
    }

    pub fn dsns(&self) -> Vec<String> {
        let mut dsns: Vec<String> = self.all_devices().into_iter().map(|(dsn, _)| dsn).collect();
        dsns.sort();
        dsns
    }

    pub fn identity(&self, dsn: &str) -> Option<DeviceIdentity> {
        self.device(dsn).ok().map(|d| d.snapshot().identity().clone())
    }

    // ===== Reads =====

    /// Last cached value. Never touches the network.
    pub fn get(&self, dsn: &str, property: &str) -> Option<PropertyValue> {
        self.device(dsn).ok()?.snapshot().get(property).cloned()
    }

    pub fn snapshot(&self, dsn: &str) -> Option<DeviceSnapshot> {
        self.device(dsn).ok().map(|d| d.snapshot().clone())
    }

    // ===== Refresh =====

    /// Fetch `properties` now and return the changes observed.
    ///
    /// Either every fetched value is applied or, on failure, nothing is:
    /// the snapshot keeps its last good state and no events are emitted.
    pub async fn refresh(&self, dsn: &str, properties: &[&str]) -> Result<Vec<ChangeEvent>> {
        let device = self.device(dsn)?;
        let _in_flight = device.fetch_lock.lock().await;

        let client = &self.client;
        let fetched: Vec<(String, Value)> = match self
            .session
            .with_auth(|token| async move { client.get_properties(&token, dsn, properties).await })
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(dsn = %dsn, error = %e, "Refresh failed, keeping cached state");
                return Err(e);
            }
        };

        let events = device.snapshot().apply(fetched);
        debug!(dsn = %dsn, changes = events.len(), "Refresh applied");

        self.publish(&events);
        Ok(events)
    }

    /// Refresh the polled property set of one device.
    pub async fn refresh_polled(&self, dsn: &str) -> Result<Vec<ChangeEvent>> {
        let properties: Vec<&str> = self.polled.iter().map(String::as_str).collect();
        self.refresh(dsn, &properties).await
    }

    /// Refresh every managed device, logging failures.
    pub async fn refresh_all(&self) {
        let dsns = self.dsns();
        let results =
            futures::future::join_all(dsns.iter().map(|dsn| self.refresh_polled(dsn))).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        debug!(devices = dsns.len(), failures, "Refresh cycle complete");
    }

    /// Schedule a debounced refresh of one device.
    pub fn request_refresh(self: &Arc<Self>, dsn: &str) {
        let device = match self.device(dsn) {
            Ok(device) => device,
            Err(e) => {
                warn!(error = %e, "Refresh requested for unknown device");
                return;
            }
        };
        let cache = Arc::clone(self);
        let dsn = dsn.to_string();
        device.debouncer.trigger(move || async move {
            // Failure is already logged; the next tick retries.
            let _ = cache.refresh_polled(&dsn).await;
        });
    }

    pub fn request_refresh_all(self: &Arc<Self>) {
        for dsn in self.dsns() {
            self.request_refresh(&dsn);
        }
    }

    /// Mark properties stale after a command and schedule a refresh.
    ///
    /// The old values stay readable until the refresh lands.
    pub fn invalidate(self: &Arc<Self>, dsn: &str, properties: &[&str]) {
        if let Ok(device) = self.device(dsn) {
            device.snapshot().mark_stale(properties);
        }
        self.request_refresh(dsn);
    }

    /// Trigger a debounced refresh of every device on each tick.
    ///
    /// Ticks and manual requests landing in one window share a fetch. A
    /// device keeps being fetched even if requests never pause, since the
    /// debouncer caps how long a run can be pushed back.
    pub fn schedule_polling(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Polling started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.request_refresh_all();
            }
        })
    }

    /// Drop every scheduled refresh that has not started.
    pub fn cancel_pending(&self) {
        for (_, device) in self.all_devices() {
            device.debouncer.cancel();
        }
    }

    pub fn has_pending_refresh(&self, dsn: &str) -> bool {
        self.device(dsn)
            .map(|d| d.debouncer.is_pending())
            .unwrap_or(false)
    }
}
