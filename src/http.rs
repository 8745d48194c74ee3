// HTTP-backed store and adapter

use crate::container::{
    AppEvents, Container, SiteSettings, APP_EVENTS_SERVICE, SITE_SETTINGS_SERVICE, STORE_SERVICE,
};
use crate::model::{Model, ModelArgs, RestModel};
use crate::store::{Adapter, Store};
use crate::types::*;
use crate::utils::{underscore, validate, StringValidator};
use async_trait::async_trait;
use dashmap::DashMap;
use lazy_static::lazy_static;
use reqwest::{header, Client as HttpClient, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

lazy_static! {
    static ref CLIENT_CONFIG: Mutex<TlsConfig> = Mutex::new(TlsConfig::default());
}

/// Configuration for TLS
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub min_tls_version: Option<reqwest::tls::Version>,
    pub cert_verification: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_tls_version: Some(reqwest::tls::Version::TLS_1_2),
            cert_verification: true,
        }
    }
}

/// Set the TLS configuration picked up by every `StoreConfig` created afterwards
pub fn set_tls_config(config: TlsConfig) {
    if let Ok(mut cfg) = CLIENT_CONFIG.lock() {
        *cfg = config;
    }
}

fn global_tls_config() -> TlsConfig {
    match CLIENT_CONFIG.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => TlsConfig::default(),
    }
}

/// Connection settings for an [`HttpStore`]
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub api_key: Option<SecureApiKey>,
    pub api_username: Option<String>,
    /// Path segment overrides for kinds whose plural is not `kind + "s"`
    pub plurals: HashMap<String, String>,
    pub tls: TlsConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(30),
            api_key: None,
            api_username: None,
            plurals: HashMap::new(),
            tls: global_tls_config(),
        }
    }
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load settings from `REST_BASE_URL`, `REST_API_KEY`,
    /// `REST_API_USERNAME` and `REST_TIMEOUT_SECS`
    pub fn from_env() -> RestResult<Self> {
        let base_url = std::env::var("REST_BASE_URL")
            .map_err(|_| RestError::ValidationError("REST_BASE_URL is not set".into()))?;
        let mut config = Self::new(base_url);

        if let Ok(key) = std::env::var("REST_API_KEY") {
            config = config.with_api_key(key);
        }
        if let Ok(username) = std::env::var("REST_API_USERNAME") {
            config = config.with_api_username(username);
        }
        if let Ok(secs) = std::env::var("REST_TIMEOUT_SECS") {
            let secs = secs.parse::<u64>().map_err(|e| {
                RestError::ValidationError(format!("REST_TIMEOUT_SECS is not a number: {}", e))
            })?;
            config = config.with_timeout(Duration::from_secs(secs))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> RestResult<Self> {
        self.timeout = validate(timeout, |t| !t.is_zero(), "timeout must be greater than 0")?;
        Ok(self)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecureApiKey::new(key));
        self
    }

    pub fn with_api_username(mut self, username: impl Into<String>) -> Self {
        self.api_username = Some(username.into());
        self
    }

    pub fn with_plural(mut self, kind: impl Into<String>, plural: impl Into<String>) -> Self {
        self.plurals.insert(kind.into(), plural.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Check that the base URL is an absolute http(s) URL
    pub fn validate(&self) -> RestResult<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            RestError::ValidationError(format!("invalid base URL `{}`: {}", self.base_url, e))
        })?;
        validate(
            url.scheme(),
            |scheme| *scheme == "http" || *scheme == "https",
            format!("base URL must use http or https, got `{}`", url.scheme()),
        )?;
        if let Some(username) = &self.api_username {
            StringValidator::not_empty(username.as_str(), "api_username")?;
        }
        Ok(())
    }
}

/// Adapter that maps record operations onto conventional REST routes:
/// `POST /{kinds}`, `PUT /{kinds}/{id}` and `DELETE /{kinds}/{id}`.
///
/// Attributes travel wrapped under the underscored kind, and the reply's
/// entry under that same key becomes the payload.
#[derive(Clone)]
pub struct RestAdapter {
    http_client: HttpClient,
    config: Arc<StoreConfig>,
}

impl RestAdapter {
    pub fn new(config: StoreConfig) -> RestResult<Self> {
        config.validate()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let mut builder = HttpClient::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.tls.cert_verification);

        if let Some(version) = config.tls.min_tls_version {
            builder = builder.min_tls_version(version);
        }

        let http_client = builder.build()?;

        Ok(Self {
            http_client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The route segment for a kind, e.g. `user_actions` for `user-action`
    pub fn api_name_for(&self, kind: &str) -> String {
        match self.config.plurals.get(kind) {
            Some(plural) => underscore(plural),
            None => format!("{}s", underscore(kind)),
        }
    }

    /// Full URL of the collection for `kind`, or of one member when `id` is given.
    /// The id is percent-encoded as a single path segment.
    pub fn path_for(&self, kind: &str, id: Option<&Value>) -> RestResult<String> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| {
            RestError::ValidationError(format!("invalid base URL `{}`: {}", self.config.base_url, e))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RestError::ValidationError(format!("base URL `{}` cannot carry a path", self.config.base_url))
            })?;
            segments.pop_if_empty().push(&self.api_name_for(kind));
            match id {
                Some(Value::String(id)) => {
                    segments.push(id);
                }
                Some(id) => {
                    segments.push(&id.to_string());
                }
                None => {}
            }
        }
        Ok(url.to_string())
    }

    /// Send a request with the auth headers and an optional JSON body,
    /// mapping transport failures and error statuses onto `RestError`
    async fn execute(&self, method: Method, url: &str, body: Option<Value>) -> RestResult<reqwest::Response> {
        tracing::debug!(%url, %method, "sending request");

        let mut request = self.http_client.request(method.clone(), url);
        if let Some(key) = &self.config.api_key {
            request = request.header("Api-Key", key.as_str());
        }
        if let Some(username) = &self.config.api_username {
            request = request.header("Api-Username", username.as_str());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            crate::request_error!(e.to_string(), format!("{} {}", method, url), e)
        })?;
        Self::handle_error_response(response).await
    }

    fn wrap(kind: &str, props: Properties) -> Value {
        let mut body = Properties::new();
        body.insert(underscore(kind), Value::Object(props));
        Value::Object(body)
    }

    /// Split a decoded reply into payload and full body
    fn to_response(kind: &str, json: Value) -> StoreResponse {
        let payload = json
            .get(underscore(kind).as_str())
            .and_then(Value::as_object)
            .cloned();
        StoreResponse {
            payload,
            response_json: Some(json),
        }
    }

    /// Map error statuses onto `RestError`
    async fn handle_error_response(response: reqwest::Response) -> RestResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

        if status == 429 {
            let retry_after = headers
                .get(header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);

            return Err(RestError::rate_limited(retry_after));
        }

        let message = serde_json::from_str::<Value>(&error_text)
            .ok()
            .and_then(|json| {
                json.get("errors")
                    .and_then(Value::as_array)
                    .map(|errors| {
                        errors
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
            })
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| format!("request failed with status {}", status));

        Err(crate::api_error!(status, message, error_text))
    }

    /// Decode a reply body; an empty body is `None`
    async fn read_json(response: reqwest::Response) -> RestResult<Option<Value>> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Value>(&text).map(Some).map_err(|e| {
            RestError::parse_error(
                e.to_string(),
                Some(text),
                Some(e),
                Some(concat!(file!(), ":", line!())),
            )
        })
    }
}

#[async_trait]
impl Adapter for RestAdapter {
    async fn create_record(
        &self,
        _store: &dyn Store,
        kind: &str,
        props: Properties,
    ) -> RestResult<Option<StoreResponse>> {
        let url = self.path_for(kind, None)?;
        let response = self
            .execute(Method::POST, &url, Some(Self::wrap(kind, props)))
            .await?;

        Ok(Self::read_json(response)
            .await?
            .map(|json| Self::to_response(kind, json)))
    }

    async fn update(
        &self,
        _store: &dyn Store,
        kind: &str,
        id: &Value,
        props: Properties,
    ) -> RestResult<StoreResponse> {
        let url = self.path_for(kind, Some(id))?;
        let response = self
            .execute(Method::PUT, &url, Some(Self::wrap(kind, props)))
            .await?;

        // An empty reply leaves the update without a payload
        Ok(Self::read_json(response)
            .await?
            .map(|json| Self::to_response(kind, json))
            .unwrap_or_default())
    }

    async fn destroy_record(&self, _store: &dyn Store, kind: &str, record: &RestModel) -> RestResult<()> {
        let id = record.id().ok_or_else(|| {
            RestError::ValidationError(format!("cannot destroy a {} record without an id", kind))
        })?;
        let url = self.path_for(kind, Some(&id))?;
        self.execute(Method::DELETE, &url, None).await?;
        Ok(())
    }
}

/// A [`Store`] talking to a REST server over HTTP.
///
/// Every kind goes through the default [`RestAdapter`] unless a custom
/// adapter was registered for it.
pub struct HttpStore {
    default_adapter: Arc<RestAdapter>,
    adapters: DashMap<String, Arc<dyn Adapter>>,
    site_settings: Arc<SiteSettings>,
    app_events: Arc<AppEvents>,
}

impl HttpStore {
    pub fn new(config: StoreConfig) -> RestResult<Self> {
        Ok(Self {
            default_adapter: Arc::new(RestAdapter::new(config)?),
            adapters: DashMap::new(),
            site_settings: Arc::new(SiteSettings::default()),
            app_events: Arc::new(AppEvents::new()),
        })
    }

    pub fn with_site_settings(mut self, site_settings: SiteSettings) -> Self {
        self.site_settings = Arc::new(site_settings);
        self
    }

    pub fn with_app_events(mut self, app_events: Arc<AppEvents>) -> Self {
        self.app_events = app_events;
        self
    }

    /// Route all operations for `kind` through `adapter`
    pub fn register_adapter(&self, kind: &str, adapter: impl Adapter + 'static) {
        self.adapters.insert(kind.to_string(), Arc::new(adapter));
    }

    pub fn rest_adapter(&self) -> &Arc<RestAdapter> {
        &self.default_adapter
    }

    pub fn site_settings(&self) -> &Arc<SiteSettings> {
        &self.site_settings
    }

    pub fn app_events(&self) -> &Arc<AppEvents> {
        &self.app_events
    }

    /// Publish this store and its collaborators in `container`
    pub fn register_services(self: &Arc<Self>, container: &Container) {
        container.register(STORE_SERVICE, Arc::clone(self) as Arc<dyn Store>);
        container.register(SITE_SETTINGS_SERVICE, Arc::clone(&self.site_settings));
        container.register(APP_EVENTS_SERVICE, Arc::clone(&self.app_events));
    }

    /// Build a record wired to this store
    pub fn create_record(
        self: &Arc<Self>,
        model: Arc<dyn Model>,
        kind: &str,
        properties: Properties,
    ) -> RestResult<Arc<RestModel>> {
        let args = ModelArgs::new(kind)
            .with_properties(properties)
            .with_store(Arc::clone(self) as Arc<dyn Store>)
            .with_site_settings(Arc::clone(&self.site_settings))
            .with_app_events(Arc::clone(&self.app_events));
        // Every collaborator is supplied, so the container is never consulted
        RestModel::create_in(&Container::new(), model, args)
    }
}

#[async_trait]
impl Store for HttpStore {
    async fn update(&self, kind: &str, id: &Value, props: Properties) -> RestResult<StoreResponse> {
        self.adapter_for(kind).update(self, kind, id, props).await
    }

    fn adapter_for(&self, kind: &str) -> Arc<dyn Adapter> {
        match self.adapters.get(kind) {
            Some(adapter) => Arc::clone(adapter.value()),
            None => Arc::clone(&self.default_adapter) as Arc<dyn Adapter>,
        }
    }

    async fn destroy_record(&self, kind: &str, record: &RestModel) -> RestResult<()> {
        self.adapter_for(kind).destroy_record(self, kind, record).await
    }
}
