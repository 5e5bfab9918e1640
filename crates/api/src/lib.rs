//! Transport layer for the remote academic-records API.
//!
//! The resolution engine talks to the API only through the [`Transport`] trait:
//! a method path plus string parameters in, a JSON document out. This crate provides
//!
//! - [`HttpTransport`]: a reqwest-backed implementation
//! - [`ApiConfig`]: base URL, token and language discovered from a config file and the environment
//! - [`ScriptedTransport`]: a test double replaying canned responses

pub mod config;
pub mod http;
pub mod scripted;

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

pub use config::{ApiConfig, ConfigError};
pub use http::HttpTransport;
pub use scripted::ScriptedTransport;

/// Request parameters, sent in insertion order.
pub type Params = IndexMap<String, String>;

/// Performs one remote method call.
pub trait Transport: Send + Sync {
    fn call_method(&self, path: &str, params: &Params) -> Result<Value, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn call_method(&self, path: &str, params: &Params) -> Result<Value, TransportError> {
        (**self).call_method(path, params)
    }
}

/// Classified transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The API rejected the request with a structured error body.
    #[error("Bad request to {path}: {message}")]
    BadRequest {
        path: String,
        /// Machine-readable error code, e.g. `object_not_found` or `param_invalid`.
        error: Option<String>,
        message: String,
        /// Name of the offending parameter, when the API reports one.
        param_name: Option<String>,
    },

    #[error("Request to {path} failed with HTTP {status}: {body}")]
    Status { path: String, status: u16, body: String },

    #[error("Network error calling {path}: {message}")]
    Network { path: String, message: String },

    #[error("Cannot decode response of {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Unexpected call: {message}")]
    Unexpected { message: String },
}

impl TransportError {
    pub fn bad_request(path: impl Into<String>, error: Option<&str>, message: impl Into<String>, param_name: Option<&str>) -> Self {
        Self::BadRequest {
            path: path.into(),
            error: error.map(str::to_string),
            message: message.into(),
            param_name: param_name.map(str::to_string),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }

    /// Error code of a [`TransportError::BadRequest`].
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::BadRequest { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}
