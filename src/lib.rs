//! # rest-model: client-side records for REST APIs
//!
//! Records that know how to create, update and destroy themselves against a
//! REST server. Each record carries its resource kind, whether the server
//! has seen it yet, and a guard that rejects a save while another one is in
//! flight. Server replies are normalized and merged back into the record.
//!
//! ## Key Features
//!
//! - Uniform `save` that creates new records and updates existing ones
//! - Overridable payload normalization (`munge`) and lifecycle hooks
//! - Pluggable `Store` and `Adapter` traits, with an HTTP implementation
//! - A service container that wires collaborators into directly built records
//!
//! ## Basic Usage
//!
//! ```no_run
//! use rest_model::{from_env, GenericModel, RestResult};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> RestResult<()> {
//!     let store = Arc::new(from_env()?);
//!
//!     let mut props = rest_model::Properties::new();
//!     props.insert("id".into(), json!(42));
//!     let post = store.create_record(Arc::new(GenericModel), "post", props)?;
//!
//!     let mut changes = rest_model::Properties::new();
//!     changes.insert("raw".into(), json!("Edited"));
//!     let saved = post.save(Some(changes)).await?;
//!     println!("{:?}", saved.target.get("raw"));
//!
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod model;
pub mod store;
pub mod container;
pub mod http;
pub mod utils;

pub use types::{Properties, RecordState, RestError, RestResult, SaveBody, Saved, SecureApiKey, StoreResponse};
pub use model::{GenericModel, Model, ModelArgs, RestModel, UPDATE_ATTRIBUTES_WARNING};
pub use store::{Adapter, Store};
pub use container::{default_container, AppEvent, AppEvents, Container, SiteSettings};
pub use container::{APP_EVENTS_SERVICE, SITE_SETTINGS_SERVICE, STORE_SERVICE};
pub use http::{set_tls_config, HttpStore, RestAdapter, StoreConfig, TlsConfig};

pub mod prelude {
    //! Convenient imports for commonly used types and functions
    pub use crate::{Adapter, GenericModel, Model, ModelArgs, Properties, RecordState, RestError, RestModel, RestResult, Store, StoreResponse};
    pub use crate::{from_env, HttpStore, StoreConfig};
}

/// Create an HTTP store for `base_url`
pub fn new_store(base_url: impl Into<String>) -> RestResult<HttpStore> {
    HttpStore::new(StoreConfig::new(base_url))
}

/// Create an HTTP store configured from the environment
pub fn from_env() -> RestResult<HttpStore> {
    HttpStore::new(StoreConfig::from_env()?)
}
