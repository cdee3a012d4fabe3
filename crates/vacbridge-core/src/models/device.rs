//! Cached device state and the change events derived from it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed identity of a device, set at discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub dsn: String,
    pub model: Option<String>,
    pub name: Option<String>,
}

impl DeviceIdentity {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.dsn)
    }
}

/// Last fetched value of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    /// Set after a command touched the property; cleared by the next fetch.
    pub stale: bool,
}

/// One observed transition of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub dsn: String,
    pub property: String,
    /// `None` the first time the property is seen.
    pub previous: Option<Value>,
    pub current: Value,
}

#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    identity: DeviceIdentity,
    properties: HashMap<String, PropertyValue>,
}

impl DeviceSnapshot {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            properties: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn dsn(&self) -> &str {
        &self.identity.dsn
    }

    pub fn get(&self, property: &str) -> Option<&PropertyValue> {
        self.properties.get(property)
    }

    pub fn properties(&self) -> &HashMap<String, PropertyValue> {
        &self.properties
    }

    /// Store freshly fetched values and return one event per actual change.
    ///
    /// Every fetched entry gets a new timestamp and loses its stale mark;
    /// only entries whose value differs from the cached one produce events.
    pub fn apply(&mut self, fetched: Vec<(String, Value)>) -> Vec<ChangeEvent> {
        let now = Utc::now();
        let mut events = Vec::new();

        for (name, value) in fetched {
            let previous = self.properties.get(&name).map(|p| p.value.clone());
            if previous.as_ref() != Some(&value) {
                events.push(ChangeEvent {
                    dsn: self.identity.dsn.clone(),
                    property: name.clone(),
                    previous,
                    current: value.clone(),
                });
            }
            self.properties.insert(
                name,
                PropertyValue {
                    value,
                    updated_at: now,
                    stale: false,
                },
            );
        }

        events
    }

    /// Mark properties as no longer trustworthy without dropping their value.
    pub fn mark_stale(&mut self, names: &[&str]) {
        for name in names {
            if let Some(entry) = self.properties.get_mut(*name) {
                entry.stale = true;
            }
        }
    }
}
