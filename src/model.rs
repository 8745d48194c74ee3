//! Client-side records backed by a REST store.
//!
//! A [`RestModel`] is a bag of JSON properties that knows its resource kind,
//! whether the server has seen it yet, and whether a save is in flight.
//! Per-kind behavior (payload normalization, default properties, lifecycle
//! hooks) lives in an implementation of the [`Model`] trait.
//!
//! ## Example
//!
//! ```no_run
//! use rest_model::{Model, ModelArgs, Properties, RestModel, RestResult};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Topic;
//!
//! impl Model for Topic {
//!     fn create_properties(&self, record: &RestModel) -> RestResult<Properties> {
//!         Ok(record.properties())
//!     }
//!
//!     fn update_properties(&self, record: &RestModel) -> RestResult<Properties> {
//!         let mut props = Properties::new();
//!         props.insert("title".into(), record.get("title").unwrap_or_default());
//!         Ok(props)
//!     }
//! }
//!
//! # async fn run() -> RestResult<()> {
//! let topic = RestModel::create(
//!     Arc::new(Topic),
//!     ModelArgs::new("topic").with_property("title", json!("Hello")),
//! )?;
//! let saved = topic.save(None).await?;
//! assert!(saved.target.is_created());
//! # Ok(())
//! # }
//! ```

use crate::container::{
    default_container, AppEvents, Container, SiteSettings, APP_EVENTS_SERVICE,
    SITE_SETTINGS_SERVICE, STORE_SERVICE,
};
use crate::store::Store;
use crate::types::*;
use crate::utils::StringValidator;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// App event triggered when an update response carried no attributes
pub const UPDATE_ATTRIBUTES_WARNING: &str = "rest-model:update-attributes";

/// Per-kind behavior of a record.
///
/// `update_properties` must be provided. `create_properties` has a default
/// that always fails, so kinds that can be created must override it too.
/// Hooks run while the save guard is held.
pub trait Model: Send + Sync {
    /// Normalize a server payload (or initial arguments) before it is merged
    fn munge(&self, json: Properties) -> Properties {
        json
    }

    /// Properties sent when creating a record and none were given
    fn create_properties(&self, _record: &RestModel) -> RestResult<Properties> {
        Err(RestError::contract_violation(
            "You must overwrite `create_properties()` before saving a record",
        ))
    }

    /// Properties sent when updating a record and none were given
    fn update_properties(&self, record: &RestModel) -> RestResult<Properties>;

    /// Inspect or rewrite outgoing creation properties. An error aborts the save.
    fn before_create(&self, _record: &RestModel, _props: &mut Properties) -> RestResult<()> {
        Ok(())
    }

    fn after_create(&self, _record: &RestModel, _body: &SaveBody) {}

    /// Inspect or rewrite outgoing update properties. An error aborts the save.
    fn before_update(&self, _record: &RestModel, _props: &mut Properties) -> RestResult<()> {
        Ok(())
    }

    fn after_update(&self, _record: &RestModel, _body: &SaveBody) {}
}

/// A model with no kind-specific behavior. Updates send every property
/// except `id`; creation is left unimplemented.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericModel;

impl Model for GenericModel {
    fn update_properties(&self, record: &RestModel) -> RestResult<Properties> {
        let mut props = record.properties();
        props.remove("id");
        Ok(props)
    }
}

/// Arguments for [`RestModel::create`]. Collaborators left as `None` are
/// resolved from a [`Container`].
#[derive(Default)]
pub struct ModelArgs {
    pub kind: String,
    pub properties: Properties,
    pub state: Option<RecordState>,
    pub store: Option<Arc<dyn Store>>,
    pub site_settings: Option<Arc<SiteSettings>>,
    pub app_events: Option<Arc<AppEvents>>,
}

impl ModelArgs {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Force the initial state instead of inferring it from `id`
    pub fn with_state(mut self, state: RecordState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_site_settings(mut self, site_settings: Arc<SiteSettings>) -> Self {
        self.site_settings = Some(site_settings);
        self
    }

    pub fn with_app_events(mut self, app_events: Arc<AppEvents>) -> Self {
        self.app_events = Some(app_events);
        self
    }
}

/// Holds the in-flight flag for the duration of a save and clears it on
/// every exit path, including early returns and dropped futures.
struct SavingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SavingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A client-side record mirroring a server-side resource
pub struct RestModel {
    kind: String,
    model: Arc<dyn Model>,
    state: RwLock<RecordState>,
    saving: AtomicBool,
    properties: RwLock<Properties>,
    store: Arc<dyn Store>,
    site_settings: Arc<SiteSettings>,
    app_events: Arc<AppEvents>,
}

impl RestModel {
    /// Build a record, filling missing collaborators from the default container
    pub fn create(model: Arc<dyn Model>, args: ModelArgs) -> RestResult<Arc<Self>> {
        Self::create_in(default_container(), model, args)
    }

    /// Build a record, filling missing collaborators from `container`
    pub fn create_in(container: &Container, model: Arc<dyn Model>, args: ModelArgs) -> RestResult<Arc<Self>> {
        let kind = StringValidator::not_empty(args.kind, "kind")?;

        let store = match args.store {
            Some(store) => store,
            None => container.require::<Arc<dyn Store>>(STORE_SERVICE)?,
        };
        let site_settings = match args.site_settings {
            Some(settings) => settings,
            None => container.require::<Arc<SiteSettings>>(SITE_SETTINGS_SERVICE)?,
        };
        let app_events = match args.app_events {
            Some(events) => events,
            None => container.require::<Arc<AppEvents>>(APP_EVENTS_SERVICE)?,
        };

        let properties = model.munge(args.properties);
        let state = args.state.unwrap_or_else(|| {
            if properties.get("id").map_or(false, |id| !id.is_null()) {
                RecordState::Created
            } else {
                RecordState::New
            }
        });

        Ok(Arc::new(Self {
            kind,
            model,
            state: RwLock::new(state),
            saving: AtomicBool::new(false),
            properties: RwLock::new(properties),
            store,
            site_settings,
            app_events,
        }))
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> RecordState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_new(&self) -> bool {
        self.state() == RecordState::New
    }

    pub fn is_created(&self) -> bool {
        self.state() == RecordState::Created
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn site_settings(&self) -> &Arc<SiteSettings> {
        &self.site_settings
    }

    pub fn app_events(&self) -> &Arc<AppEvents> {
        &self.app_events
    }

    /// The record's identity, if it has a non-null `id`
    pub fn id(&self) -> Option<Value> {
        self.get("id").filter(|id| !id.is_null())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    /// Merge `props` onto the record, overwriting existing fields
    pub fn set_properties(&self, props: Properties) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(props);
    }

    /// Snapshot of all properties
    pub fn properties(&self) -> Properties {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deserialize the current properties into a typed view
    pub fn deserialize<T: DeserializeOwned>(&self) -> RestResult<T> {
        Ok(serde_json::from_value(Value::Object(self.properties()))?)
    }

    /// Create the record if it is new, update it otherwise
    pub async fn save(self: &Arc<Self>, props: Option<Properties>) -> RestResult<Saved> {
        if self.is_new() {
            self.save_new(props).await
        } else {
            self.update(props).await
        }
    }

    /// Send changed attributes for an existing record and merge the reply
    pub async fn update(self: &Arc<Self>, props: Option<Properties>) -> RestResult<Saved> {
        let _guard = self.begin_save()?;

        let mut props = match props {
            Some(props) => props,
            None => self.model.update_properties(self)?,
        };
        self.model.before_update(self, &mut props)?;

        let id = self.id().ok_or_else(|| {
            RestError::ValidationError(format!("cannot update a {} record without an id", self.kind))
        })?;

        tracing::debug!(kind = %self.kind, id = %id, "updating record");
        let response = self.store.update(&self.kind, &id, props.clone()).await?;

        let raw = match (&response.payload, &response.response_json) {
            (Some(payload), _) => payload.clone(),
            (None, Some(Value::Object(body))) => body.clone(),
            (None, Some(other)) => {
                return Err(RestError::parse_error(
                    format!("update of {} returned a non-object body", self.kind),
                    Some(other.to_string()),
                    None::<serde_json::Error>,
                    Some(concat!(file!(), ":", line!())),
                ));
            }
            (None, None) => {
                return Err(RestError::MissingPayload {
                    kind: self.kind.clone(),
                });
            }
        };
        let payload = self.model.munge(raw);

        let (merged, body) = if payload.get("success").and_then(Value::as_str) == Some("OK") {
            tracing::warn!(
                id = "rest-model.update-attributes",
                kind = %self.kind,
                "An update call should return the updated attributes"
            );
            self.app_events.trigger(
                UPDATE_ATTRIBUTES_WARNING,
                json!({ "kind": self.kind, "id": id }),
            );
            (props.clone(), SaveBody::Submitted(props))
        } else {
            (payload, SaveBody::Response(response))
        };

        self.set_properties(merged);
        self.model.after_update(self, &body);

        Ok(Saved {
            body,
            target: Arc::clone(self),
        })
    }

    /// Create the record on the server through the kind's adapter
    pub async fn save_new(self: &Arc<Self>, props: Option<Properties>) -> RestResult<Saved> {
        let _guard = self.begin_save()?;

        let mut props = match props {
            Some(props) => props,
            None => self.model.create_properties(self)?,
        };
        self.model.before_create(self, &mut props)?;

        let adapter = self.store.adapter_for(&self.kind);

        tracing::debug!(kind = %self.kind, "creating record");
        let response = adapter
            .create_record(self.store.as_ref(), &self.kind, props)
            .await?
            .ok_or_else(|| {
                tracing::error!(kind = %self.kind, "createRecord returned no response");
                RestError::NoResponse {
                    kind: self.kind.clone(),
                }
            })?;

        // A response without a payload is fine, e.g. when the creation was queued
        if let Some(payload) = &response.payload {
            self.set_properties(self.model.munge(payload.clone()));
            self.mark_created();
        }

        let body = SaveBody::Response(response);
        self.model.after_create(self, &body);

        Ok(Saved {
            body,
            target: Arc::clone(self),
        })
    }

    /// Ask the store to delete this record. Local state is left untouched.
    pub async fn destroy_record(&self) -> RestResult<()> {
        tracing::debug!(kind = %self.kind, "destroying record");
        self.store.destroy_record(&self.kind, self).await
    }

    fn begin_save(&self) -> RestResult<SavingGuard<'_>> {
        SavingGuard::acquire(&self.saving).ok_or_else(|| {
            tracing::debug!(kind = %self.kind, "save rejected, another save is in flight");
            RestError::SaveInProgress {
                kind: self.kind.clone(),
            }
        })
    }

    fn mark_created(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == RecordState::New {
            *state = RecordState::Created;
            tracing::info!(kind = %self.kind, "record created");
        }
    }
}

impl fmt::Debug for RestModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestModel")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("is_saving", &self.is_saving())
            .field("properties", &self.properties())
            .finish()
    }
}
