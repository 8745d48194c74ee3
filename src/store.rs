// Store and adapter traits

use crate::model::RestModel;
use crate::types::*;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Issues network requests for records, keyed by resource kind and identity.
#[async_trait]
pub trait Store: Send + Sync {
    /// Send updated attributes for an existing record
    async fn update(&self, kind: &str, id: &Value, props: Properties) -> RestResult<StoreResponse>;

    /// Resolve the adapter responsible for building creation requests of `kind`
    fn adapter_for(&self, kind: &str) -> Arc<dyn Adapter>;

    /// Remove a record on the server
    async fn destroy_record(&self, kind: &str, record: &RestModel) -> RestResult<()>;
}

/// Builds the type-specific requests behind a store.
///
/// Only `create_record` is required. `Ok(None)` means the server sent
/// nothing back at all, which callers treat as a failure; a response
/// without a payload is a valid answer (the creation may have been queued).
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn create_record(
        &self,
        store: &dyn Store,
        kind: &str,
        props: Properties,
    ) -> RestResult<Option<StoreResponse>>;

    async fn update(
        &self,
        _store: &dyn Store,
        kind: &str,
        _id: &Value,
        _props: Properties,
    ) -> RestResult<StoreResponse> {
        Err(RestError::contract_violation(format!(
            "adapter for `{}` does not support update",
            kind
        )))
    }

    async fn destroy_record(&self, _store: &dyn Store, kind: &str, _record: &RestModel) -> RestResult<()> {
        Err(RestError::contract_violation(format!(
            "adapter for `{}` does not support destroy",
            kind
        )))
    }
}
