// Core types and errors

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use std::time::Duration;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::model::RestModel;

/// The result type used throughout the crate
pub type RestResult<T> = Result<T, RestError>;

/// A bag of named record attributes, as sent to and received from the server
pub type Properties = Map<String, Value>;

/// Convert reqwest::Error to our RestError
impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        RestError::RequestError {
            message: err.to_string(),
            details: None,
            location: None,
            source: Some(Arc::new(err) as Arc<dyn std::error::Error + Send + Sync>),
        }
    }
}

impl From<serde_json::Error> for RestError {
    fn from(err: serde_json::Error) -> Self {
        RestError::ParseError {
            message: err.to_string(),
            source_text: None,
            location: None,
            source: Some(Arc::new(err) as Arc<dyn std::error::Error + Send + Sync>),
        }
    }
}

/// A secure container for API keys that automatically zeroes memory when dropped
pub struct SecureApiKey {
    key: String,
}

impl SecureApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Get a reference to the underlying key
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl Deref for SecureApiKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.key
    }
}

impl Drop for SecureApiKey {
    fn drop(&mut self) {
        // Overwrite the key bytes with zeros before the allocation is released
        unsafe {
            let bytes = self.key.as_bytes_mut();
            bytes.iter_mut().for_each(|b| *b = 0);
        }
    }
}

// Keep keys out of logs and debug output
impl fmt::Debug for SecureApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureApiKey([REDACTED])")
    }
}

impl fmt::Display for SecureApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED API KEY]")
    }
}

impl Clone for SecureApiKey {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum RestError {
    #[error("A save is already in progress for this {kind} record")]
    SaveInProgress {
        kind: String,
    },

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Received no data back from createRecord for {kind}")]
    NoResponse {
        kind: String,
    },

    #[error("Update of {kind} returned neither a payload nor a response body")]
    MissingPayload {
        kind: String,
    },

    #[error("Required service `{name}` is not registered")]
    MissingService {
        name: String,
    },

    #[error("Request failed: {message}")]
    RequestError {
        message: String,
        details: Option<String>,
        location: Option<String>,
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to parse response: {message}")]
    ParseError {
        message: String,
        source_text: Option<String>,
        location: Option<String>,
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Rate limited by server: retry after {retry_after:?}")]
    RateLimited {
        retry_after: Option<Duration>,
        location: Option<String>,
    },

    #[error("Server returned error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
        response_body: Option<String>,
        location: Option<String>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Where a record stands relative to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Not yet persisted; `save` creates it
    New,
    /// Known to the server; `save` updates it
    Created,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::New => "new",
            RecordState::Created => "created",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a store or adapter hands back for a create or update call.
///
/// `payload` carries the record attributes when the server echoed them;
/// `response_json` is the whole decoded body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Properties>,
    #[serde(rename = "responseJson", skip_serializing_if = "Option::is_none")]
    pub response_json: Option<Value>,
}

impl StoreResponse {
    /// A response whose payload holds the record attributes
    pub fn with_payload(payload: Properties) -> Self {
        Self {
            payload: Some(payload),
            response_json: None,
        }
    }

    /// A response with only a raw body
    pub fn with_body(body: Value) -> Self {
        Self {
            payload: None,
            response_json: Some(body),
        }
    }

    /// A response that carries nothing, e.g. a creation that was queued
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The result body of a save.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveBody {
    /// The store's response, used as-is
    Response(StoreResponse),
    /// The server only answered `success: "OK"`, so the submitted
    /// properties stand in for the echoed attributes
    Submitted(Properties),
}

impl SaveBody {
    pub fn response(&self) -> Option<&StoreResponse> {
        match self {
            SaveBody::Response(response) => Some(response),
            SaveBody::Submitted(_) => None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, SaveBody::Submitted(_))
    }
}

/// A finished save: its body plus the record it applied to
#[derive(Clone)]
pub struct Saved {
    pub body: SaveBody,
    pub target: Arc<RestModel>,
}

impl fmt::Debug for Saved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saved")
            .field("body", &self.body)
            .field("target", &self.target.kind())
            .finish()
    }
}

// Implementation of helper methods for RestError
impl RestError {
    pub fn request_error<T: Into<String>>(
        message: T,
        details: Option<String>,
        source: Option<impl std::error::Error + Send + Sync + 'static>,
        location: Option<&str>
    ) -> Self {
        let error = Self::RequestError {
            message: message.into(),
            details,
            location: location.map(String::from),
            source: source.map(|e| Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>),
        };

        if let Some(loc) = &error.location() {
            log::error!("{} at {}", error, loc);
        } else {
            log::error!("{}", error);
        }

        error
    }

    pub fn parse_error<T: Into<String>>(
        message: T,
        source_text: Option<String>,
        source: Option<impl std::error::Error + Send + Sync + 'static>,
        location: Option<&str>
    ) -> Self {
        let error = Self::ParseError {
            message: message.into(),
            source_text,
            location: location.map(String::from),
            source: source.map(|e| Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>),
        };

        if let Some(loc) = &error.location() {
            log::error!("{} at {}", error, loc);
        } else {
            log::error!("{}", error);
        }

        error
    }

    pub fn api_error<T: Into<String>>(
        message: T,
        status: Option<u16>,
        response_body: Option<String>,
        location: Option<&str>
    ) -> Self {
        let error = Self::ApiError {
            message: message.into(),
            status: status.unwrap_or(500),
            response_body,
            location: location.map(String::from),
        };

        if let Some(loc) = &error.location() {
            log::error!("{} at {}", error, loc);
        } else {
            log::error!("{}", error);
        }

        error
    }

    pub fn contract_violation<T: Into<String>>(message: T) -> Self {
        let error = Self::ContractViolation(message.into());
        log::error!("{}", error);
        error
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            retry_after,
            location: None,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Self::RequestError { location, .. } => location.as_deref(),
            Self::ParseError { location, .. } => location.as_deref(),
            Self::RateLimited { location, .. } => location.as_deref(),
            Self::ApiError { location, .. } => location.as_deref(),
            _ => None,
        }
    }

    /// True for the rejection returned when a save overlaps another
    pub fn is_save_in_progress(&self) -> bool {
        matches!(self, Self::SaveInProgress { .. })
    }
}

/// Create a request error for a failed transport call, carrying the file
/// and line it was raised at
#[macro_export]
macro_rules! request_error {
    ($message:expr, $details:expr, $source:expr) => {
        $crate::RestError::request_error($message, Some($details), Some($source), Some(concat!(file!(), ":", line!())))
    };
}

/// Create an API error carrying the file and line it was raised at
#[macro_export]
macro_rules! api_error {
    ($status:expr, $message:expr) => {
        $crate::RestError::api_error($message, Some($status), None, Some(concat!(file!(), ":", line!())))
    };
    ($status:expr, $message:expr, $body:expr) => {
        $crate::RestError::api_error($message, Some($status), Some($body), Some(concat!(file!(), ":", line!())))
    };
}
