//! Service container used to inject collaborators into records.
//!
//! Records built through a store already carry their store, site settings
//! and event bus. Records built directly with [`RestModel::create`] pull
//! whatever is missing from a [`Container`]: either one passed explicitly
//! or the process-wide [`default_container`].
//!
//! [`RestModel::create`]: crate::RestModel::create

use crate::types::*;
use dashmap::DashMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Name the store is registered under
pub const STORE_SERVICE: &str = "service:store";
/// Name the site settings are registered under
pub const SITE_SETTINGS_SERVICE: &str = "site-settings:main";
/// Name the application event bus is registered under
pub const APP_EVENTS_SERVICE: &str = "service:appEvents";

const APP_EVENTS_CAPACITY: usize = 64;

lazy_static! {
    static ref DEFAULT_CONTAINER: Container = Container::new();
}

/// The ambient container used when no explicit one is given
pub fn default_container() -> &'static Container {
    &DEFAULT_CONTAINER
}

/// Name-keyed registry of shared services
#[derive(Default)]
pub struct Container {
    services: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one under the same name
    pub fn register<T: Any + Send + Sync>(&self, name: &str, service: T) {
        self.services.insert(name.to_string(), Arc::new(service));
    }

    /// Look a service up by name. Returns `None` when nothing is registered
    /// under `name` or the registered value is not a `T`.
    pub fn lookup<T: Any + Clone + Send + Sync>(&self, name: &str) -> Option<T> {
        self.services
            .get(name)
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    /// Like [`lookup`](Self::lookup), but a missing service is an error
    pub fn require<T: Any + Clone + Send + Sync>(&self, name: &str) -> RestResult<T> {
        self.lookup(name).ok_or_else(|| {
            tracing::error!(service = name, "service lookup failed");
            RestError::MissingService {
                name: name.to_string(),
            }
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.services.remove(name).is_some()
    }

    /// Names of all registered services
    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Read-only site configuration as delivered by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteSettings {
    values: Properties,
}

impl SiteSettings {
    pub fn new(values: Properties) -> Self {
        Self { values }
    }

    /// Parse settings from a JSON object
    pub fn from_json(json: Value) -> RestResult<Self> {
        match json {
            Value::Object(values) => Ok(Self { values }),
            other => Err(RestError::ValidationError(format!(
                "site settings must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }
}

/// An event published on the application bus
#[derive(Debug, Clone, PartialEq)]
pub struct AppEvent {
    pub name: String,
    pub payload: Value,
}

/// Broadcast bus for application-wide notifications
#[derive(Debug, Clone)]
pub struct AppEvents {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for AppEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl AppEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(APP_EVENTS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Returns how many subscribers received it; an
    /// event nobody listens to is dropped.
    pub fn trigger(&self, name: impl Into<String>, payload: Value) -> usize {
        let event = AppEvent {
            name: name.into(),
            payload,
        };
        tracing::trace!(event = %event.name, "app event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
